//! Glob helpers used to find shard files on disk.
//!
//! Shard names are derived from user-supplied logical paths, which may contain
//! glob metacharacters of their own (`[`, `*`, `?`). [`sibling_pattern`] escapes
//! the logical part so only the suffix is treated as a pattern.

use glob::{Pattern, glob};
use std::io;
use std::path::{Path, PathBuf};

/// Build a pattern matching `{prefix}{suffix_pattern}`, with `prefix` taken literally.
#[must_use]
pub fn sibling_pattern(prefix: &Path, suffix_pattern: &str) -> String {
    format!(
        "{}{suffix_pattern}",
        Pattern::escape(&prefix.to_string_lossy())
    )
}

/// Expand a glob pattern into a sorted list of matching regular files.
///
/// No matches is not an error; the result is simply empty.
///
/// # Errors
/// Returns [`io::ErrorKind::InvalidInput`] for a malformed pattern, or the
/// underlying error if a directory on the way cannot be read.
pub fn expand_glob(pattern: &str) -> io::Result<Vec<PathBuf>> {
    let paths = glob(pattern).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid glob pattern {pattern}: {e}"),
        )
    })?;

    let mut result = Vec::new();
    for entry in paths {
        let path = entry.map_err(io::Error::from)?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}
