//! End-to-end pipeline: split, transform in parallel, merge, clean up.
//!
//! A [`Plan`] names the logical inputs and outputs handed to the transform
//! program. Two shapes cover the common cases:
//!
//! - [`Plan::fan_out`]: one headed source, two outputs.
//! - [`Plan::join`]: a headed source plus a header-less file holding one line
//!   per source record, joined row for row into one output.
//!
//! ```no_run
//! use shardpipe::config::PipelineConfig;
//! use shardpipe::pipeline::{Pipeline, Plan};
//!
//! # fn main() -> shardpipe::Result<()> {
//! let config = PipelineConfig { shards: 8, ..Default::default() };
//! let report = Pipeline::new("./pre-a", config)
//!     .run(&Plan::fan_out("tr.csv", "tr.dense", "tr.sparse"))?;
//! assert_eq!(report.outputs.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! Shard files are the channel between this process and the transforms, so two
//! runs touching the same logical path at the same time will clobber each other.

use crate::cleanup;
use crate::config::PipelineConfig;
use crate::dataset::HeaderMode;
use crate::error::{Phase, Result, ShardError};
use crate::merge::merge;
use crate::report::{InputReport, JobReport, OutputReport, RunReport};
use crate::shard::{ShardSet, discover_shards};
use crate::split::split;
use crate::worker::{CancelToken, WorkerPool};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One logical input of a plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSpec {
    pub path: PathBuf,
    pub header: HeaderMode,
    /// Shard `i` must hold as many records as shard `i` of the first input.
    pub aligned: bool,
}

/// The logical files a run reads and writes, in transform argument order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    inputs: Vec<InputSpec>,
    outputs: Vec<PathBuf>,
}

impl Plan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// One headed source transformed into two outputs.
    pub fn fan_out(
        src: impl AsRef<Path>,
        dst1: impl AsRef<Path>,
        dst2: impl AsRef<Path>,
    ) -> Self {
        Self::new()
            .input(src, HeaderMode::Keep)
            .output(dst1)
            .output(dst2)
    }

    /// A headed source joined row for row with a header-less companion file.
    pub fn join(src1: impl AsRef<Path>, src2: impl AsRef<Path>, dst: impl AsRef<Path>) -> Self {
        Self::new()
            .input(src1, HeaderMode::Keep)
            .aligned_input(src2)
            .output(dst)
    }

    #[must_use]
    pub fn input(mut self, path: impl AsRef<Path>, header: HeaderMode) -> Self {
        self.inputs.push(InputSpec {
            path: path.as_ref().to_path_buf(),
            header,
            aligned: false,
        });
        self
    }

    /// A header-less input whose records pair up one to one with the first input's.
    #[must_use]
    pub fn aligned_input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(InputSpec {
            path: path.as_ref().to_path_buf(),
            header: HeaderMode::None,
            aligned: true,
        });
        self
    }

    #[must_use]
    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.outputs.push(path.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    #[must_use]
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.inputs.iter().map(|i| i.path.clone()).collect()
    }

    /// Every logical path the run creates shards for, inputs first.
    #[must_use]
    pub fn logical_paths(&self) -> Vec<PathBuf> {
        self.input_paths()
            .into_iter()
            .chain(self.outputs.iter().cloned())
            .collect()
    }

    /// Check the plan is runnable.
    ///
    /// # Errors
    /// Returns [`ShardError::InvalidConfig`] if there are no inputs or outputs,
    /// the first input is marked aligned, or a logical path appears twice.
    pub fn validate(&self) -> Result<()> {
        let Some(first) = self.inputs.first() else {
            return Err(ShardError::InvalidConfig("plan has no inputs".into()));
        };
        if self.outputs.is_empty() {
            return Err(ShardError::InvalidConfig("plan has no outputs".into()));
        }
        if first.aligned {
            return Err(ShardError::InvalidConfig(
                "the first input cannot be aligned to itself".into(),
            ));
        }
        let mut seen = HashSet::new();
        for path in self.logical_paths() {
            if !seen.insert(path.clone()) {
                return Err(ShardError::InvalidConfig(format!(
                    "{} is used more than once; its shard files would collide",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Runs plans with one transform program.
#[derive(Clone, Debug)]
pub struct Pipeline {
    program: PathBuf,
    leading_args: Vec<String>,
    config: PipelineConfig,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(program: impl AsRef<Path>, config: PipelineConfig) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            leading_args: Vec::new(),
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Fixed arguments passed to the program before the shard paths.
    #[must_use]
    pub fn leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle for cancelling a run from another thread.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Execute `plan`: split every input, run the transforms, merge every
    /// output, then remove the shard files.
    ///
    /// On any error the run stops before merging; shard files stay on disk for
    /// inspection or a retry and no merged output is left at the output paths.
    ///
    /// # Errors
    /// Whatever phase failed, as a [`ShardError`].
    pub fn run(&self, plan: &Plan) -> Result<RunReport> {
        self.run_phases(plan).inspect_err(|e| {
            error!(
                phase = ?e.phase(),
                shard = ?e.shard(),
                "pipeline aborted: {e}"
            );
        })
    }

    fn run_phases(&self, plan: &Plan) -> Result<RunReport> {
        self.config.validate()?;
        plan.validate()?;
        let shards = self.config.shards;
        let started = Instant::now();
        let mut report = RunReport::new(shards);

        warn_stale_shards(plan, shards);
        for output in plan.outputs() {
            remove_stale_output(output)?;
        }

        let t = Instant::now();
        let mut sets = Vec::with_capacity(plan.inputs().len());
        for input in plan.inputs() {
            sets.push(split(&input.path, shards, input.header)?);
        }
        check_alignment(plan, &sets)?;
        report.inputs = sets.iter().map(InputReport::from).collect();
        report.record_phase(Phase::Split, t.elapsed());

        let t = Instant::now();
        let pool = WorkerPool::with_config(&self.program, &self.config)
            .leading_args(self.leading_args.iter().cloned())
            .with_cancel_token(self.cancel.clone());
        let outcomes = pool.run_all(&plan.input_paths(), plan.outputs(), shards)?;
        report.jobs = outcomes.iter().map(JobReport::from).collect();
        report.record_phase(Phase::Transform, t.elapsed());

        let t = Instant::now();
        for output in plan.outputs() {
            let bytes = match merge(output, shards) {
                Ok(bytes) => bytes,
                Err(e) => {
                    // Outputs are consumed together; one missing makes the rest stale.
                    for done in &report.outputs {
                        if let Err(rm) = remove_stale_output(&done.path) {
                            warn!("{rm}");
                        }
                    }
                    return Err(e);
                }
            };
            report.outputs.push(OutputReport {
                path: output.clone(),
                bytes,
            });
        }
        report.record_phase(Phase::Merge, t.elapsed());

        if self.config.keep_shards {
            info!("keeping shard files");
            report.shards_kept = true;
        } else {
            let t = Instant::now();
            report.cleanup_warnings = cleanup::remove_all(&plan.logical_paths(), shards);
            report.record_phase(Phase::Cleanup, t.elapsed());
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            shards,
            records = report.total_input_records(),
            elapsed_ms = report.elapsed_ms,
            "pipeline finished"
        );
        Ok(report)
    }
}

/// Every aligned input must be partitioned exactly like the first input.
fn check_alignment(plan: &Plan, sets: &[ShardSet]) -> Result<()> {
    let Some(reference) = sets.first() else {
        return Ok(());
    };
    for (input, set) in plan.inputs().iter().zip(sets).skip(1) {
        if !input.aligned {
            continue;
        }
        let mismatch = reference
            .records()
            .iter()
            .zip(set.records())
            .enumerate()
            .find(|(_, (expected, actual))| expected != actual);
        if let Some((shard, (&expected, &actual))) = mismatch {
            return Err(ShardError::PartitionMismatch {
                path: input.path.clone(),
                shard,
                expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Shards from earlier runs with more shards than this one are not overwritten
/// and would be mistaken for live data by anyone listing the directory.
fn warn_stale_shards(plan: &Plan, shards: usize) {
    for logical in plan.logical_paths() {
        let stale: Vec<usize> = discover_shards(&logical)
            .into_iter()
            .map(|(i, _)| i)
            .filter(|&i| i >= shards)
            .collect();
        if !stale.is_empty() {
            warn!(
                path = %logical.display(),
                indices = ?stale,
                "found shard files from an earlier run; they will be left alone"
            );
        }
    }
}

/// A merged output from an earlier run must not survive a failed run.
fn remove_stale_output(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed previous output");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ShardError::io(Phase::Split, path, e)),
    }
}
