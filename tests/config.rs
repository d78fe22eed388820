use shardpipe::ShardError;
use shardpipe::config::{DEFAULT_SHARDS, ENV_MAX_PARALLEL, ENV_SHARDS, ENV_TIMEOUT_SECS, PipelineConfig};
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_defaults() {
    let cfg = PipelineConfig::default();
    assert_eq!(cfg.shards, DEFAULT_SHARDS);
    assert_eq!(cfg.max_parallel, None);
    assert_eq!(cfg.timeout(), None);
    assert_eq!(cfg.concurrency(), DEFAULT_SHARDS);
    assert!(!cfg.keep_shards);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_env_overrides() -> anyhow::Result<()> {
    let env = vars(&[
        (ENV_SHARDS, "4"),
        (ENV_MAX_PARALLEL, " 2 "),
        (ENV_TIMEOUT_SECS, "90"),
    ]);
    let cfg = PipelineConfig::default().apply_vars(|k| env.get(k).cloned())?;
    assert_eq!(cfg.shards, 4);
    assert_eq!(cfg.max_parallel, Some(2));
    assert_eq!(cfg.timeout(), Some(Duration::from_secs(90)));
    assert_eq!(cfg.concurrency(), 2);
    Ok(())
}

#[test]
fn test_env_rejects_garbage() {
    let env = vars(&[(ENV_SHARDS, "twelve")]);
    let err = PipelineConfig::default()
        .apply_vars(|k| env.get(k).cloned())
        .unwrap_err();
    assert!(err.to_string().contains(ENV_SHARDS));
}

#[test]
fn test_from_file_keeps_missing_defaults() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("shardpipe.json");
    std::fs::write(&path, r#"{ "shards": 6, "keep_shards": true }"#)?;

    let cfg = PipelineConfig::from_file(&path)?;
    assert_eq!(cfg.shards, 6);
    assert!(cfg.keep_shards);
    assert_eq!(cfg.poll_interval_ms, PipelineConfig::default().poll_interval_ms);
    Ok(())
}

#[test]
fn test_from_file_errors() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    assert!(PipelineConfig::from_file(dir.path().join("missing.json")).is_err());

    let path = dir.path().join("bad.json");
    std::fs::write(&path, "shards = 3")?;
    assert!(PipelineConfig::from_file(&path).is_err());
    Ok(())
}

#[test]
fn test_validate() {
    let invalid = [
        PipelineConfig {
            shards: 0,
            ..Default::default()
        },
        PipelineConfig {
            max_parallel: Some(0),
            ..Default::default()
        },
        PipelineConfig {
            timeout_secs: Some(0),
            ..Default::default()
        },
        PipelineConfig {
            poll_interval_ms: 0,
            ..Default::default()
        },
    ];
    for cfg in invalid {
        assert!(
            matches!(cfg.validate(), Err(ShardError::InvalidConfig(_))),
            "{cfg:?} should be rejected"
        );
    }
}

#[test]
fn test_concurrency_never_exceeds_shards() {
    let cfg = PipelineConfig {
        shards: 4,
        max_parallel: Some(64),
        ..Default::default()
    };
    assert_eq!(cfg.concurrency(), 4);
}
