//! Integration tests for the per-shard worker pool. Transforms are shell scripts.
#![cfg(unix)]

use shardpipe::testing::{ShellTransform, numbered_rows, read_lines, scripts, write_dataset};
use shardpipe::{Job, JobStatus, ShardError, WorkerPool, shard_path};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Write `shards` input shard files of two rows each and return the logical path.
fn input_shards(dir: &Path, shards: usize) -> anyhow::Result<PathBuf> {
    let logical = dir.join("in.txt");
    for i in 0..shards {
        let rows: Vec<String> = numbered_rows(2)
            .into_iter()
            .map(|r| format!("{i}:{r}"))
            .collect();
        write_dataset(shard_path(&logical, i), None, &rows)?;
    }
    Ok(logical)
}

#[test]
fn test_job_argument_order() {
    let job = Job::new(
        "/bin/sh",
        &["pre-b.sh".to_string()],
        &[PathBuf::from("a.csv"), PathBuf::from("b.out")],
        &[PathBuf::from("c.fm")],
        2,
    );
    assert_eq!(job.shard(), 2);
    assert_eq!(job.program(), Path::new("/bin/sh"));
    assert_eq!(
        job.args(),
        &[
            PathBuf::from("pre-b.sh"),
            PathBuf::from("a.csv.__shard__.2"),
            PathBuf::from("b.out.__shard__.2"),
            PathBuf::from("c.fm.__shard__.2"),
        ]
    );
}

#[test]
fn test_jobs_cover_every_shard() {
    let pool = WorkerPool::new("/bin/true");
    let jobs = pool.jobs(&[PathBuf::from("in")], &[PathBuf::from("out")], 4);
    let shards: Vec<usize> = jobs.iter().map(Job::shard).collect();
    assert_eq!(shards, vec![0, 1, 2, 3]);
}

#[test]
fn test_run_all_identity() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = input_shards(dir.path(), 3)?;
    let output = dir.path().join("out.txt");
    let t = ShellTransform::write(dir.path(), "copy.sh", scripts::COPY)?;

    let outcomes = t.pool().run_all(&[input.clone()], &[output.clone()], 3)?;
    assert_eq!(outcomes.len(), 3);
    for (i, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.shard, i);
        assert!(outcome.succeeded());
        assert_eq!(outcome.status.exit_code(), Some(0));
        assert_eq!(read_lines(shard_path(&output, i))?, read_lines(shard_path(&input, i))?);
    }
    Ok(())
}

#[test]
fn test_run_all_serialized() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = input_shards(dir.path(), 4)?;
    let output = dir.path().join("out.txt");
    let t = ShellTransform::write(dir.path(), "copy.sh", scripts::COPY)?;

    let outcomes = t
        .pool()
        .max_parallel(Some(1))
        .run_all(&[input], &[output.clone()], 4)?;
    assert!(outcomes.iter().all(|o| o.succeeded()));
    for i in 0..4 {
        assert!(shard_path(&output, i).exists());
    }
    Ok(())
}

#[test]
fn test_failure_reports_lowest_shard_after_all_finish() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = input_shards(dir.path(), 4)?;
    let output = dir.path().join("out.txt");
    let body = scripts::fail_on_shard(1, &scripts::fail_on_shard(3, scripts::COPY));
    let t = ShellTransform::write(dir.path(), "fail.sh", &body)?;

    let err = t.pool().run_all(&[input], &[output.clone()], 4).unwrap_err();
    match err {
        ShardError::JobFailure { shard, status } => {
            assert_eq!(shard, 1);
            assert_eq!(status, JobStatus::Exited(3));
        }
        other => panic!("expected JobFailure, got {other:?}"),
    }
    // Siblings ran to completion.
    assert!(shard_path(&output, 0).exists());
    assert!(shard_path(&output, 2).exists());
    assert!(!shard_path(&output, 1).exists());
    Ok(())
}

#[test]
fn test_missing_program_is_a_job_failure() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = input_shards(dir.path(), 2)?;
    let pool = WorkerPool::new(dir.path().join("no-such-program"));

    let err = pool
        .run_all(&[input], &[dir.path().join("out.txt")], 2)
        .unwrap_err();
    assert!(matches!(
        err,
        ShardError::JobFailure {
            shard: 0,
            status: JobStatus::SpawnFailed(_)
        }
    ));
    Ok(())
}

#[mark_flaky_tests::flaky]
#[test]
fn test_timeout_kills_jobs_and_removes_outputs() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = input_shards(dir.path(), 2)?;
    let output = dir.path().join("out.txt");
    // A shard output written before the deadline must not survive.
    std::fs::write(shard_path(&output, 0), b"partial\n")?;
    let t = ShellTransform::write(dir.path(), "sleep.sh", scripts::SLEEP)?;

    let started = Instant::now();
    let err = t
        .pool()
        .timeout(Some(Duration::from_millis(300)))
        .run_all(&[input], &[output.clone()], 2)
        .unwrap_err();
    assert!(matches!(err, ShardError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!shard_path(&output, 0).exists());
    Ok(())
}

#[test]
fn test_cancelled_before_start() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = input_shards(dir.path(), 3)?;
    let output = dir.path().join("out.txt");
    let t = ShellTransform::write(dir.path(), "copy.sh", scripts::COPY)?;

    let pool = t.pool();
    pool.cancel_token().cancel();
    let err = pool.run_all(&[input], &[output.clone()], 3).unwrap_err();
    assert!(matches!(err, ShardError::Cancelled));
    for i in 0..3 {
        assert!(!shard_path(&output, i).exists());
    }
    Ok(())
}

#[test]
fn test_invalid_limits_rejected() {
    let pool = WorkerPool::new("/bin/true");
    let err = pool.run_all(&[], &[], 0).unwrap_err();
    assert!(matches!(err, ShardError::InvalidConfig(_)));

    let err = pool.max_parallel(Some(0)).run_all(&[], &[], 2).unwrap_err();
    assert!(matches!(err, ShardError::InvalidConfig(_)));
}

#[test]
fn test_status_display() {
    assert_eq!(JobStatus::Exited(2).to_string(), "exit code 2");
    assert_eq!(JobStatus::TimedOut.to_string(), "timed out");
    assert!(!JobStatus::Signaled.is_success());
}

#[mark_flaky_tests::flaky]
#[test]
fn test_all_jobs_run_at_once() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let shards = 6;
    let input = input_shards(dir.path(), shards)?;
    let output = dir.path().join("out.txt");
    let t = ShellTransform::write(dir.path(), "slow.sh", &format!("sleep 1\n{}", scripts::COPY))?;

    let started = Instant::now();
    let outcomes = t.pool().run_all(&[input], &[output.clone()], shards)?;
    // Run one after another these would take at least `shards` seconds.
    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    assert!(outcomes.iter().all(|o| o.succeeded()));
    assert!(outcomes.iter().all(|o| o.elapsed >= Duration::from_secs(1)));
    Ok(())
}

#[mark_flaky_tests::flaky]
#[test]
fn test_cancel_kills_running_jobs() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let input = input_shards(dir.path(), 3)?;
    let output = dir.path().join("out.txt");
    std::fs::write(shard_path(&output, 1), b"partial\n")?;
    let t = ShellTransform::write(dir.path(), "sleep.sh", scripts::SLEEP)?;

    let pool = t.pool();
    let token = pool.cancel_token();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        token.cancel();
    });

    let started = Instant::now();
    let err = pool.run_all(&[input], &[output.clone()], 3).unwrap_err();
    let elapsed = started.elapsed();
    canceller.join().expect("canceller thread panicked");

    assert!(matches!(err, ShardError::Cancelled));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");
    for i in 0..3 {
        assert!(!shard_path(&output, i).exists());
    }
    Ok(())
}
