//! Removing intermediate shard files.
//!
//! Cleanup is housekeeping: nothing it finds is fatal. Each file that cannot be
//! removed becomes a [`CleanupWarning`], logged and handed back to the caller.

use crate::shard::shard_path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A shard file that could not be removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub shard: usize,
    /// `true` when the file was already gone.
    pub missing: bool,
    pub reason: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not remove shard {} ({}): {}",
            self.shard,
            self.path.display(),
            self.reason
        )
    }
}

/// Delete shards `0..shard_count` of `logical`. Safe to call repeatedly.
pub fn remove(logical: impl AsRef<Path>, shard_count: usize) -> Vec<CleanupWarning> {
    let logical = logical.as_ref();
    let mut warnings = Vec::new();
    for index in 0..shard_count {
        let path = shard_path(logical, index);
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed shard"),
            Err(e) => {
                let warning = CleanupWarning {
                    missing: e.kind() == io::ErrorKind::NotFound,
                    reason: e.to_string(),
                    path,
                    shard: index,
                };
                warn!("{warning}");
                warnings.push(warning);
            }
        }
    }
    warnings
}

/// [`remove`] over several logical paths.
pub fn remove_all<P: AsRef<Path>>(logicals: &[P], shard_count: usize) -> Vec<CleanupWarning> {
    logicals
        .iter()
        .flat_map(|p| remove(p, shard_count))
        .collect()
}
