//! Integration tests for merging shard outputs.

use shardpipe::merge::merge;
use shardpipe::{Phase, ShardError, shard_path};
use std::fs;
use tempfile::TempDir;

fn write_shards(logical: &std::path::Path, contents: &[&[u8]]) -> anyhow::Result<()> {
    for (i, bytes) in contents.iter().enumerate() {
        fs::write(shard_path(logical, i), bytes)?;
    }
    Ok(())
}

#[test]
fn test_merge_concatenates_in_index_order() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out.txt");
    write_shards(&out, &[b"a\n", b"", b"b\nc\n"])?;

    let bytes = merge(&out, 3)?;
    assert_eq!(bytes, 6);
    assert_eq!(fs::read(&out)?, b"a\nb\nc\n");
    Ok(())
}

#[test]
fn test_merge_is_byte_exact() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out.txt");
    // Shard boundaries need not fall on line boundaries.
    write_shards(&out, &[b"1,x\r\n2,", b"y\r\n", b"3,z"])?;

    merge(&out, 3)?;
    assert_eq!(fs::read(&out)?, b"1,x\r\n2,y\r\n3,z");
    Ok(())
}

#[test]
fn test_merge_replaces_existing_output() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out.txt");
    fs::write(&out, b"stale content that is longer than the new one\n")?;
    write_shards(&out, &[b"new\n"])?;

    merge(&out, 1)?;
    assert_eq!(fs::read(&out)?, b"new\n");
    Ok(())
}

#[test]
fn test_merge_keeps_shards_and_leaves_no_temp_files() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out.txt");
    write_shards(&out, &[b"a\n", b"b\n"])?;

    merge(&out, 2)?;
    assert!(shard_path(&out, 0).exists());
    assert!(shard_path(&out, 1).exists());
    assert_eq!(fs::read_dir(dir.path())?.count(), 3);
    Ok(())
}

#[test]
fn test_merge_missing_shard() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let out = dir.path().join("out.txt");
    fs::write(&out, b"previous\n")?;
    fs::write(shard_path(&out, 0), b"a\n")?;
    fs::write(shard_path(&out, 2), b"c\n")?;

    let err = merge(&out, 3).unwrap_err();
    assert!(matches!(
        err,
        ShardError::Io {
            phase: Phase::Merge,
            shard: Some(1),
            ..
        }
    ));
    // Nothing is touched when a shard is missing.
    assert_eq!(fs::read(&out)?, b"previous\n");
    Ok(())
}

#[test]
fn test_merge_zero_shards_rejected() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let err = merge(dir.path().join("out.txt"), 0).unwrap_err();
    assert!(matches!(err, ShardError::InvalidConfig(_)));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_merge_output_takes_shard_permissions() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new()?;
    for mode in [0o644, 0o640] {
        let out = dir.path().join(format!("out-{mode:o}.txt"));
        write_shards(&out, &[b"a\n", b"b\n"])?;
        fs::set_permissions(shard_path(&out, 0), fs::Permissions::from_mode(mode))?;

        merge(&out, 2)?;
        assert_eq!(fs::metadata(&out)?.permissions().mode() & 0o777, mode);
    }
    Ok(())
}
