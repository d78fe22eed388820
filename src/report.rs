//! Run reports.
//!
//! A [`RunReport`] records what a successful pipeline run did: how each input was
//! sharded, how each transform process ended, what was merged, and which cleanup
//! steps were skipped. It can be logged, printed, or saved as JSON.

use crate::cleanup::CleanupWarning;
use crate::error::Phase;
use crate::shard::ShardSet;
use crate::worker::{JobOutcome, JobStatus};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How one input was partitioned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputReport {
    pub path: PathBuf,
    pub records: u64,
    pub shard_records: Vec<u64>,
    /// Column names from the header line, empty for header-less inputs.
    pub columns: Vec<String>,
}

impl From<&ShardSet> for InputReport {
    fn from(set: &ShardSet) -> Self {
        Self {
            path: set.logical().to_path_buf(),
            records: set.total_records(),
            shard_records: set.records().to_vec(),
            columns: set
                .header()
                .map(|h| h.schema().columns().to_vec())
                .unwrap_or_default(),
        }
    }
}

/// How one transform process ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub shard: usize,
    pub status: JobStatus,
    pub elapsed_ms: u64,
}

impl From<&JobOutcome> for JobReport {
    fn from(outcome: &JobOutcome) -> Self {
        Self {
            shard: outcome.shard,
            status: outcome.status.clone(),
            elapsed_ms: millis(outcome.elapsed),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputReport {
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    pub elapsed_ms: u64,
}

/// Summary of a completed pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub shards: usize,
    pub inputs: Vec<InputReport>,
    pub jobs: Vec<JobReport>,
    pub outputs: Vec<OutputReport>,
    pub phases: Vec<PhaseTiming>,
    pub cleanup_warnings: Vec<CleanupWarning>,
    /// Whether shard files were intentionally left on disk.
    pub shards_kept: bool,
    pub elapsed_ms: u64,
}

impl RunReport {
    #[must_use]
    pub fn new(shards: usize) -> Self {
        Self {
            shards,
            ..Self::default()
        }
    }

    pub fn record_phase(&mut self, phase: Phase, elapsed: Duration) {
        self.phases.push(PhaseTiming {
            phase,
            elapsed_ms: millis(elapsed),
        });
    }

    /// Elapsed milliseconds of `phase`, if it ran.
    #[must_use]
    pub fn phase_ms(&self, phase: Phase) -> Option<u64> {
        self.phases
            .iter()
            .find(|t| t.phase == phase)
            .map(|t| t.elapsed_ms)
    }

    /// Data records read across all inputs.
    #[must_use]
    pub fn total_input_records(&self) -> u64 {
        self.inputs.iter().map(|i| i.records).sum()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("\n========== Shard Pipeline ==========");
        println!("Shards: {}  Elapsed: {} ms", self.shards, self.elapsed_ms);
        for t in &self.phases {
            println!("  {:<10} {:>8} ms", t.phase.to_string(), t.elapsed_ms);
        }
        println!("------------------------------------");
        for input in &self.inputs {
            println!(
                "in  {} : {} records {:?}",
                input.path.display(),
                input.records,
                input.shard_records
            );
        }
        for output in &self.outputs {
            println!("out {} : {} bytes", output.path.display(), output.bytes);
        }
        for w in &self.cleanup_warnings {
            println!("warning: {w}");
        }
        println!("====================================\n");
    }

    /// Save the report as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(f);
        serde_json::to_writer_pretty(&mut w, self)
            .with_context(|| format!("serialize report to {}", path.display()))?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
