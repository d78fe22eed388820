//! Pipeline configuration.
//!
//! Settings are layered: [`PipelineConfig::default`] first, then an optional JSON
//! file, then `SHARDPIPE_*` environment variables, and finally whatever the caller
//! (usually the command line) overrides field by field.
//!
//! ```
//! use shardpipe::config::PipelineConfig;
//!
//! let cfg = PipelineConfig {
//!     shards: 4,
//!     max_parallel: Some(2),
//!     ..Default::default()
//! };
//! assert_eq!(cfg.concurrency(), 2);
//! ```

use crate::error::ShardError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// Number of shards used when nothing else is configured.
pub const DEFAULT_SHARDS: usize = 12;

/// Environment variable overriding [`PipelineConfig::shards`].
pub const ENV_SHARDS: &str = "SHARDPIPE_SHARDS";
/// Environment variable overriding [`PipelineConfig::max_parallel`].
pub const ENV_MAX_PARALLEL: &str = "SHARDPIPE_MAX_PARALLEL";
/// Environment variable overriding [`PipelineConfig::timeout_secs`].
pub const ENV_TIMEOUT_SECS: &str = "SHARDPIPE_TIMEOUT_SECS";

/// Knobs for one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of shards each dataset is split into (and transform processes launched).
    pub shards: usize,
    /// Upper bound on concurrently running transform processes.
    /// `None` starts every shard's process at once.
    pub max_parallel: Option<usize>,
    /// Deadline for the whole transform phase, in seconds.
    pub timeout_secs: Option<u64>,
    /// How often a running transform is polled for exit, cancellation and timeout.
    pub poll_interval_ms: u64,
    /// Leave shard files on disk after a successful run.
    pub keep_shards: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARDS,
            max_parallel: None,
            timeout_secs: None,
            poll_interval_ms: 20,
            keep_shards: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with the process environment.
    ///
    /// # Errors
    /// Returns an error if a `SHARDPIPE_*` variable is set but not a valid integer.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Load a JSON config file. Missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or is not valid JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse config {}", path.display()))
    }

    /// Overlay `SHARDPIPE_*` environment variables onto `self`.
    ///
    /// # Errors
    /// See [`PipelineConfig::from_env`].
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay variables fetched through `lookup` onto `self`.
    ///
    /// Split out from [`apply_env`](Self::apply_env) so callers can feed a map
    /// instead of mutating the real process environment.
    ///
    /// # Errors
    /// Returns an error naming the variable if a value does not parse.
    pub fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup(ENV_SHARDS) {
            self.shards = parse_var(ENV_SHARDS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_PARALLEL) {
            self.max_parallel = Some(parse_var(ENV_MAX_PARALLEL, &v)?);
        }
        if let Some(v) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = Some(parse_var(ENV_TIMEOUT_SECS, &v)?);
        }
        Ok(self)
    }

    /// Reject settings no run could honor.
    ///
    /// # Errors
    /// Returns [`ShardError::InvalidConfig`] for zero shards, zero concurrency,
    /// a zero timeout or a zero poll interval.
    pub fn validate(&self) -> crate::Result<()> {
        if self.shards == 0 {
            return Err(ShardError::InvalidConfig("shard count must be at least 1".into()));
        }
        if self.max_parallel == Some(0) {
            return Err(ShardError::InvalidConfig("max_parallel must be at least 1".into()));
        }
        if self.timeout_secs == Some(0) {
            return Err(ShardError::InvalidConfig("timeout must be at least 1 second".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ShardError::InvalidConfig("poll interval must be at least 1 ms".into()));
        }
        Ok(())
    }

    /// Number of transform processes allowed to run at once.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        concurrency_limit(self.max_parallel, self.shards)
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Processes to run at once for `shards` jobs under an optional cap: never
/// more than the shards, never less than one.
pub(crate) fn concurrency_limit(max_parallel: Option<usize>, shards: usize) -> usize {
    let shards = shards.max(1);
    max_parallel.unwrap_or(shards).clamp(1, shards)
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("parse {key}={value:?}"))
}
