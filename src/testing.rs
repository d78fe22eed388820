//! Fixtures for testing shard pipelines.
//!
//! Datasets are written with [`write_dataset`]; transforms are small POSIX shell
//! scripts run through `/bin/sh` via [`ShellTransform`], so tests need nothing
//! beyond a Unix shell and coreutils.
//!
//! ```no_run
//! use shardpipe::config::PipelineConfig;
//! use shardpipe::pipeline::Plan;
//! use shardpipe::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let src = dir.path().join("src.csv");
//! write_dataset(&src, Some("id,name"), &numbered_rows(10))?;
//!
//! let t = ShellTransform::write(dir.path(), "copy.sh", scripts::DROP_HEADER)?;
//! let dst = dir.path().join("dst.csv");
//! t.pipeline(PipelineConfig { shards: 3, ..Default::default() })
//!     .run(&Plan::new().input(&src, Default::default()).output(&dst))?;
//! assert_eq!(read_lines(&dst)?, numbered_rows(10));
//! # Ok(())
//! # }
//! ```

use crate::config::PipelineConfig;
use crate::pipeline::Pipeline;
use crate::shard::discover_shards;
use crate::worker::WorkerPool;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Shell interpreter used to run fixture scripts.
pub const SHELL: &str = "/bin/sh";

/// Transform script bodies. `$1..` are shard paths: inputs first, then outputs.
pub mod scripts {
    /// One input copied to one output unchanged.
    pub const COPY: &str = r#"cat "$1" > "$2""#;

    /// One headed input copied to one output without its header.
    pub const DROP_HEADER: &str = r#"tail -n +2 "$1" > "$2""#;

    /// One headed input to two outputs: the data rows, and the data rows upper-cased.
    pub const FAN_OUT: &str = r#"tail -n +2 "$1" > "$2"
tail -n +2 "$1" | tr 'a-z' 'A-Z' > "$3""#;

    /// Headed input joined line by line with a header-less input.
    pub const JOIN: &str = r#"tail -n +2 "$1" | paste -d, - "$2" > "$3""#;

    /// Runs far longer than any test waits. `exec` so killing the job kills the sleep.
    pub const SLEEP: &str = "exec sleep 30";

    /// `body`, except the job for shard `shard` exits with status 3 before doing anything.
    #[must_use]
    pub fn fail_on_shard(shard: usize, body: &str) -> String {
        format!("case \"$1\" in\n  *.__shard__.{shard}) exit 3 ;;\nesac\n{body}")
    }
}

/// A transform implemented as a shell script.
#[derive(Clone, Debug)]
pub struct ShellTransform {
    script: PathBuf,
}

impl ShellTransform {
    /// Write `body` to `dir/name` as a script.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write(dir: &Path, name: &str, body: &str) -> Result<Self> {
        let script = dir.join(name);
        fs::write(&script, format!("set -e\n{body}\n"))
            .with_context(|| format!("write {}", script.display()))?;
        Ok(Self { script })
    }

    #[must_use]
    pub fn script(&self) -> &Path {
        &self.script
    }

    fn args(&self) -> [String; 1] {
        [self.script.to_string_lossy().into_owned()]
    }

    /// A pipeline running this script.
    #[must_use]
    pub fn pipeline(&self, config: PipelineConfig) -> Pipeline {
        Pipeline::new(SHELL, config).leading_args(self.args())
    }

    /// A worker pool running this script.
    #[must_use]
    pub fn pool(&self) -> WorkerPool {
        WorkerPool::new(SHELL).leading_args(self.args())
    }
}

/// `n` distinct CSV rows: `1,row-1`, `2,row-2`, ...
#[must_use]
pub fn numbered_rows(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{i},row-{i}")).collect()
}

/// Write a dataset with an optional header, one `\n`-terminated line per row.
/// Creates parent directories if needed.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_dataset(path: impl AsRef<Path>, header: Option<&str>, rows: &[String]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("mkdir -p {}", parent.display()))?;
    }
    let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(f);
    for line in header.into_iter().chain(rows.iter().map(String::as_str)) {
        w.write_all(line.as_bytes())?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

/// Lines of a text file without terminators.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn read_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    BufReader::new(f)
        .lines()
        .enumerate()
        .map(|(i, line)| line.with_context(|| format!("read line {} in {}", i + 1, path.display())))
        .collect()
}

/// Shard files currently on disk for `logical`, in index order.
#[must_use]
pub fn shard_files(logical: impl AsRef<Path>) -> Vec<PathBuf> {
    discover_shards(logical.as_ref())
        .into_iter()
        .map(|(_, p)| p)
        .collect()
}
