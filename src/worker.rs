//! Running the external transform program once per shard.
//!
//! Each [`Job`] is one OS process. The pool runs every job on its own thread of
//! a dedicated `rayon` pool; the thread spawns the child and polls it so that a
//! cancellation or deadline can kill it mid-flight. [`WorkerPool::run_all`]
//! returns only after every job has finished (the barrier), in shard order.

use crate::config::{PipelineConfig, concurrency_limit};
use crate::error::{Phase, Result, ShardError};
use crate::shard::shard_path;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How a job ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum JobStatus {
    /// The process exited with this code.
    Exited(i32),
    /// The process was terminated by a signal it did not raise on our behalf.
    Signaled,
    /// The process could not be started or waited on.
    SpawnFailed(String),
    /// The run was cancelled; the process was killed or never started.
    Cancelled,
    /// The transform deadline passed; the process was killed or never started.
    TimedOut,
}

impl JobStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Exited(0))
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            JobStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<ExitStatus> for JobStatus {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => JobStatus::Exited(code),
            None => JobStatus::Signaled,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Exited(code) => write!(f, "exit code {code}"),
            JobStatus::Signaled => f.write_str("terminated by signal"),
            JobStatus::SpawnFailed(reason) => write!(f, "could not run: {reason}"),
            JobStatus::Cancelled => f.write_str("cancelled"),
            JobStatus::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Cooperative cancellation shared by every job of a run.
///
/// Cloning yields a handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One transform invocation over one shard.
///
/// Arguments are the fixed leading arguments, then shard `i` of every logical
/// input, then shard `i` of every logical output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    shard: usize,
    program: PathBuf,
    args: Vec<PathBuf>,
}

impl Job {
    pub fn new(
        program: impl AsRef<Path>,
        leading_args: &[String],
        inputs: &[PathBuf],
        outputs: &[PathBuf],
        shard: usize,
    ) -> Self {
        let args = leading_args
            .iter()
            .map(PathBuf::from)
            .chain(inputs.iter().map(|p| shard_path(p, shard)))
            .chain(outputs.iter().map(|p| shard_path(p, shard)))
            .collect();
        Self {
            shard,
            program: program.as_ref().to_path_buf(),
            args,
        }
    }

    #[must_use]
    pub fn shard(&self) -> usize {
        self.shard
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[PathBuf] {
        &self.args
    }

    /// The process to launch: stdin closed, stdout discarded, stderr inherited.
    #[must_use]
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        cmd
    }
}

/// Outcome of one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    pub shard: usize,
    pub status: JobStatus,
    pub elapsed: Duration,
}

impl JobOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status.is_success()
    }
}

/// Fans a transform program out over the shards of a run.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    program: PathBuf,
    leading_args: Vec<String>,
    max_parallel: Option<usize>,
    timeout: Option<Duration>,
    poll_interval: Duration,
    cancel: CancelToken,
}

impl WorkerPool {
    /// A pool with no concurrency cap and no deadline.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            leading_args: Vec::new(),
            max_parallel: None,
            timeout: None,
            poll_interval: Duration::from_millis(20),
            cancel: CancelToken::new(),
        }
    }

    /// A pool taking its limits from `config`.
    pub fn with_config(program: impl AsRef<Path>, config: &PipelineConfig) -> Self {
        Self::new(program)
            .max_parallel(config.max_parallel)
            .timeout(config.timeout())
            .poll_interval(config.poll_interval())
    }

    /// Fixed arguments placed before the shard paths (e.g. a script for an interpreter).
    #[must_use]
    pub fn leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn max_parallel(mut self, limit: Option<usize>) -> Self {
        self.max_parallel = limit;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Share an externally owned cancellation flag with this pool.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The jobs [`run_all`](Self::run_all) would launch, in shard order.
    #[must_use]
    pub fn jobs(&self, inputs: &[PathBuf], outputs: &[PathBuf], shard_count: usize) -> Vec<Job> {
        (0..shard_count)
            .map(|i| Job::new(&self.program, &self.leading_args, inputs, outputs, i))
            .collect()
    }

    /// Run one job per shard and wait for all of them.
    ///
    /// Sibling jobs are left to finish when one fails; the error names the
    /// lowest failing shard and every failure is logged.
    ///
    /// # Errors
    /// - [`ShardError::InvalidConfig`] for zero shards, a zero concurrency cap,
    ///   or if the worker threads cannot be created.
    /// - [`ShardError::Timeout`] / [`ShardError::Cancelled`] if the run was cut
    ///   short; shard outputs written so far are removed.
    /// - [`ShardError::JobFailure`] if any job did not exit with status 0.
    pub fn run_all(
        &self,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
        shard_count: usize,
    ) -> Result<Vec<JobOutcome>> {
        if shard_count == 0 {
            return Err(ShardError::InvalidConfig("shard count must be at least 1".into()));
        }
        if self.max_parallel == Some(0) {
            return Err(ShardError::InvalidConfig("max_parallel must be at least 1".into()));
        }
        let threads = concurrency_limit(self.max_parallel, shard_count);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("shardpipe-worker-{i}"))
            .build()
            .map_err(|e| ShardError::InvalidConfig(format!("cannot start worker threads: {e}")))?;

        let jobs = self.jobs(inputs, outputs, shard_count);
        let deadline = self.timeout.map(|t| Instant::now() + t);
        info!(
            program = %self.program.display(),
            shards = shard_count,
            threads,
            "starting transforms"
        );

        let outcomes: Vec<JobOutcome> = pool.install(|| {
            jobs.par_iter()
                .with_max_len(1)
                .map(|job| run_job(job, &self.cancel, deadline, self.poll_interval))
                .collect()
        });

        if outcomes.iter().any(|o| o.status == JobStatus::TimedOut) {
            remove_partial_outputs(outputs, shard_count);
            // `timeout` is set whenever a job can time out.
            return Err(ShardError::Timeout(self.timeout.unwrap_or_default()));
        }
        if outcomes.iter().any(|o| o.status == JobStatus::Cancelled) {
            remove_partial_outputs(outputs, shard_count);
            return Err(ShardError::Cancelled);
        }

        let mut failures = outcomes.iter().filter(|o| !o.succeeded()).peekable();
        if let Some(first) = failures.peek().map(|o| (o.shard, o.status.clone())) {
            for failed in failures {
                error!(shard = failed.shard, status = %failed.status, "transform failed");
            }
            return Err(ShardError::JobFailure {
                shard: first.0,
                status: first.1,
            });
        }
        Ok(outcomes)
    }
}

fn run_job(
    job: &Job,
    cancel: &CancelToken,
    deadline: Option<Instant>,
    poll: Duration,
) -> JobOutcome {
    let started = Instant::now();
    let finish = |status: JobStatus| JobOutcome {
        shard: job.shard,
        status,
        elapsed: started.elapsed(),
    };

    if deadline.is_some_and(|d| started >= d) {
        return finish(JobStatus::TimedOut);
    }
    if cancel.is_cancelled() {
        return finish(JobStatus::Cancelled);
    }

    let mut child = match job.command().spawn() {
        Ok(child) => child,
        Err(e) => {
            return finish(JobStatus::SpawnFailed(format!(
                "{}: {e}",
                job.program.display()
            )));
        }
    };
    debug!(shard = job.shard, pid = child.id(), "transform started");

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let status = JobStatus::from(status);
                debug!(shard = job.shard, %status, "transform finished");
                return finish(status);
            }
            Ok(None) => {}
            Err(e) => {
                kill(&mut child, job.shard);
                return finish(JobStatus::SpawnFailed(format!("wait: {e}")));
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(shard = job.shard, "transform deadline passed, killing");
            kill(&mut child, job.shard);
            return finish(JobStatus::TimedOut);
        }
        if cancel.is_cancelled() {
            kill(&mut child, job.shard);
            return finish(JobStatus::Cancelled);
        }
        thread::sleep(poll);
    }
}

fn kill(child: &mut Child, shard: usize) {
    if let Err(e) = child.kill() {
        debug!(shard, error = %e, "kill failed, process likely already exited");
    }
    // Reap so no zombie outlives the run.
    let _ = child.wait();
}

/// Drop shard outputs of an aborted run; missing files are expected.
fn remove_partial_outputs(outputs: &[PathBuf], shard_count: usize) {
    for logical in outputs {
        for index in 0..shard_count {
            let path = shard_path(logical, index);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed partial shard output"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    phase = %Phase::Transform,
                    path = %path.display(),
                    error = %e,
                    "could not remove partial shard output"
                ),
            }
        }
    }
}
