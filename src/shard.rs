//! Shard naming and bookkeeping.
//!
//! Shard `i` of a logical path `p` lives at `{p}.__shard__.{i}`. The name is the
//! whole contract between this crate and transform programs, so it never varies
//! with configuration.

use crate::dataset::Header;
use crate::io::glob::{expand_glob, sibling_pattern};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Infix placed between a logical path and its shard index.
pub const SHARD_MARKER: &str = "__shard__";

/// Physical path of shard `index` of `logical`.
///
/// ```
/// use shardpipe::shard::shard_path;
/// use std::path::Path;
///
/// assert_eq!(
///     shard_path(Path::new("data/tr.csv"), 3),
///     Path::new("data/tr.csv.__shard__.3"),
/// );
/// ```
#[must_use]
pub fn shard_path(logical: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(logical.as_os_str());
    name.push(format!(".{SHARD_MARKER}.{index}"));
    PathBuf::from(name)
}

/// Physical paths of shards `0..count` of `logical`, in index order.
pub fn shard_paths(logical: &Path, count: usize) -> impl Iterator<Item = PathBuf> + '_ {
    (0..count).map(move |i| shard_path(logical, i))
}

/// Shard files currently on disk for `logical`, whatever run created them,
/// as `(index, path)` sorted by index.
///
/// Files whose suffix is not a plain index are ignored. Unreadable directories
/// are logged and treated as holding no shards.
#[must_use]
pub fn discover_shards(logical: &Path) -> Vec<(usize, PathBuf)> {
    let pattern = sibling_pattern(logical, &format!(".{SHARD_MARKER}.*"));
    let files = match expand_glob(&pattern) {
        Ok(files) => files,
        Err(e) => {
            warn!(path = %logical.display(), error = %e, "could not list shard files");
            return Vec::new();
        }
    };
    let prefix = format!("{}.{SHARD_MARKER}.", logical.to_string_lossy());
    let mut found: Vec<(usize, PathBuf)> = files
        .into_iter()
        .filter_map(|p| {
            let index = p.to_string_lossy().strip_prefix(&prefix)?.parse().ok()?;
            Some((index, p))
        })
        .collect();
    found.sort_by_key(|(i, _)| *i);
    found
}

/// The shards of one logical dataset, as written by [`split`](crate::split::split).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardSet {
    logical: PathBuf,
    header: Option<Header>,
    header_in_shards: bool,
    records: Vec<u64>,
}

impl ShardSet {
    pub(crate) fn new(
        logical: PathBuf,
        header: Option<Header>,
        header_in_shards: bool,
        records: Vec<u64>,
    ) -> Self {
        Self {
            logical,
            header,
            header_in_shards,
            records,
        }
    }

    #[must_use]
    pub fn logical(&self) -> &Path {
        &self.logical
    }

    /// Header read from the source, whether or not it was copied into the shards.
    #[must_use]
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Whether each shard file starts with a copy of the header.
    #[must_use]
    pub fn header_in_shards(&self) -> bool {
        self.header_in_shards
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Data records per shard, header excluded.
    #[must_use]
    pub fn records(&self) -> &[u64] {
        &self.records
    }

    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.records.iter().sum()
    }

    #[must_use]
    pub fn path(&self, index: usize) -> PathBuf {
        shard_path(&self.logical, index)
    }

    pub fn paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        shard_paths(&self.logical, self.count())
    }
}
