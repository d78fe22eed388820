//! Error taxonomy for shard pipelines.
//!
//! Every failure names the [`Phase`] it happened in and, where one applies,
//! the shard index, so callers can report exactly what to retry.

use crate::worker::JobStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Canonical result for the library.
pub type Result<T> = std::result::Result<T, ShardError>;

/// The stage of a pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Split,
    Transform,
    Merge,
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Split => "split",
            Phase::Transform => "transform",
            Phase::Merge => "merge",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ShardError {
    /// A file could not be opened, read, created or written.
    #[error("{phase} failed on {}: {source}", .path.display())]
    Io {
        phase: Phase,
        path: PathBuf,
        shard: Option<usize>,
        #[source]
        source: io::Error,
    },

    /// A transform process exited non-zero, died, or never started.
    #[error("transform failed on shard {shard}: {status}")]
    JobFailure { shard: usize, status: JobStatus },

    /// Paired inputs were partitioned into shards of different sizes.
    #[error(
        "shard {shard} of {} holds {actual} records, expected {expected} to match the first input",
        .path.display()
    )]
    PartitionMismatch {
        path: PathBuf,
        shard: usize,
        expected: u64,
        actual: u64,
    },

    #[error("transform cancelled")]
    Cancelled,

    #[error("transform timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ShardError {
    pub(crate) fn io(phase: Phase, path: impl AsRef<Path>, source: io::Error) -> Self {
        ShardError::Io {
            phase,
            path: path.as_ref().to_path_buf(),
            shard: None,
            source,
        }
    }

    pub(crate) fn shard_io(
        phase: Phase,
        path: impl AsRef<Path>,
        shard: usize,
        source: io::Error,
    ) -> Self {
        ShardError::Io {
            phase,
            path: path.as_ref().to_path_buf(),
            shard: Some(shard),
            source,
        }
    }

    /// The phase the error surfaced in, if it belongs to one.
    ///
    /// Configuration errors are raised before any phase starts.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ShardError::Io { phase, .. } => Some(*phase),
            ShardError::PartitionMismatch { .. } => Some(Phase::Split),
            ShardError::JobFailure { .. } | ShardError::Cancelled | ShardError::Timeout(_) => {
                Some(Phase::Transform)
            }
            ShardError::InvalidConfig(_) => None,
        }
    }

    /// The shard index involved, if the error is tied to one shard.
    #[must_use]
    pub fn shard(&self) -> Option<usize> {
        match self {
            ShardError::Io { shard, .. } => *shard,
            ShardError::JobFailure { shard, .. } | ShardError::PartitionMismatch { shard, .. } => {
                Some(*shard)
            }
            _ => None,
        }
    }
}
