//! Reassembling shard outputs into one file.

use crate::error::{Phase, Result, ShardError};
use crate::shard::shard_path;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Concatenate shards `0..shard_count` of `logical` into `logical`, byte for byte,
/// in ascending index order. Returns the number of bytes written.
///
/// All shards are checked for existence before anything is touched. Any file
/// already at `logical` is deleted, and the new content is assembled in a
/// temporary file beside it that only replaces `logical` once every shard has
/// been copied, so a failed merge never leaves a truncated output behind.
/// The output takes the permissions of shard 0.
///
/// # Errors
/// - [`ShardError::InvalidConfig`] if `shard_count` is zero.
/// - [`ShardError::Io`] naming the shard if a shard file is missing or unreadable,
///   or naming `logical` if the output cannot be written.
pub fn merge(logical: impl AsRef<Path>, shard_count: usize) -> Result<u64> {
    let logical = logical.as_ref();
    if shard_count == 0 {
        return Err(ShardError::InvalidConfig("shard count must be at least 1".into()));
    }

    for index in 0..shard_count {
        let path = shard_path(logical, index);
        if !path.is_file() {
            return Err(ShardError::shard_io(
                Phase::Merge,
                &path,
                index,
                io::Error::new(io::ErrorKind::NotFound, "shard output is missing"),
            ));
        }
    }

    match fs::remove_file(logical) {
        Ok(()) => debug!(path = %logical.display(), "removed previous output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ShardError::io(Phase::Merge, logical, e)),
    }

    let dir = match logical.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir).map_err(|e| ShardError::io(Phase::Merge, logical, e))?;

    let mut bytes = 0u64;
    {
        let mut out = BufWriter::new(tmp.as_file());
        for index in 0..shard_count {
            let path = shard_path(logical, index);
            let mut shard =
                File::open(&path).map_err(|e| ShardError::shard_io(Phase::Merge, &path, index, e))?;
            let n = io::copy(&mut shard, &mut out).map_err(|e| {
                ShardError::shard_io(Phase::Merge, &path, index, e)
            })?;
            debug!(shard = index, bytes = n, "appended shard");
            bytes += n;
        }
        out.flush().map_err(|e| ShardError::io(Phase::Merge, logical, e))?;
    }

    // Temp files are owner-only; the output takes the mode the transform gave its shards.
    let first = shard_path(logical, 0);
    let perms = fs::metadata(&first)
        .map_err(|e| ShardError::shard_io(Phase::Merge, &first, 0, e))?
        .permissions();
    tmp.as_file()
        .set_permissions(perms)
        .map_err(|e| ShardError::io(Phase::Merge, logical, e))?;

    tmp.persist(logical)
        .map_err(|e| ShardError::io(Phase::Merge, logical, e.error))?;
    info!(path = %logical.display(), shards = shard_count, bytes, "merged shards");
    Ok(bytes)
}
