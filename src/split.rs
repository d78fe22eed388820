//! Splitting a dataset into contiguous shards.
//!
//! Two streaming passes: the first counts records, the second copies them.
//! With `total` data records and `n` shards every shard receives
//! `ceil(total / n)` records until the input runs out, so trailing shards may be
//! short or empty but never larger than the rest. All `n` shard files are
//! created even when empty, because every shard gets a transform process.

use crate::dataset::{Dataset, HeaderMode};
use crate::error::{Phase, Result, ShardError};
use crate::shard::{ShardSet, shard_path};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Records each shard receives before the next one is opened.
#[must_use]
pub fn records_per_shard(total: u64, shard_count: usize) -> u64 {
    total.div_ceil(shard_count.max(1) as u64)
}

/// Split `path` into `shard_count` shard files next to it.
///
/// Existing shard files with the same names are overwritten. The source file is
/// never modified.
///
/// # Errors
/// - [`ShardError::InvalidConfig`] if `shard_count` is zero.
/// - [`ShardError::Io`] if the source cannot be read, a shard cannot be written,
///   or the source changed between the counting and copying passes. Shards left
///   behind by a failed split are incomplete and must not be handed to workers.
pub fn split(path: impl AsRef<Path>, shard_count: usize, mode: HeaderMode) -> Result<ShardSet> {
    let path = path.as_ref();
    if shard_count == 0 {
        return Err(ShardError::InvalidConfig("shard count must be at least 1".into()));
    }

    let dataset = Dataset::new(path, mode);
    let total = dataset.scan()?.records;
    let per_shard = records_per_shard(total, shard_count);

    let (header, mut lines) = dataset.open()?;
    let header_bytes = header
        .as_ref()
        .filter(|_| mode.writes_header())
        .map(|h| h.raw().to_vec());

    let mut records = Vec::with_capacity(shard_count);
    for index in 0..shard_count {
        let target = shard_path(path, index);
        let file = File::create(&target)
            .map_err(|e| ShardError::shard_io(Phase::Split, &target, index, e))?;
        let mut out = BufWriter::new(file);
        if let Some(h) = &header_bytes {
            out.write_all(h)
                .map_err(|e| ShardError::shard_io(Phase::Split, &target, index, e))?;
        }

        // The last shard drains whatever is left, so nothing is silently dropped
        // if the source grew; the count check below reports that case.
        let is_last = index + 1 == shard_count;
        let mut written = 0u64;
        while is_last || written < per_shard {
            let Some(line) = lines
                .next_line()
                .map_err(|e| ShardError::io(Phase::Split, path, e))?
            else {
                break;
            };
            out.write_all(line)
                .map_err(|e| ShardError::shard_io(Phase::Split, &target, index, e))?;
            written += 1;
        }
        out.flush()
            .map_err(|e| ShardError::shard_io(Phase::Split, &target, index, e))?;
        debug!(shard = index, records = written, path = %target.display(), "wrote shard");
        records.push(written);
    }

    let copied: u64 = records.iter().sum();
    if copied != total {
        return Err(ShardError::io(
            Phase::Split,
            path,
            io::Error::other(format!(
                "source changed while splitting: counted {total} records, copied {copied}"
            )),
        ));
    }

    info!(
        path = %path.display(),
        shards = shard_count,
        records = total,
        per_shard,
        columns = header.as_ref().map_or(0, |h| h.schema().len()),
        "split dataset"
    );
    Ok(ShardSet::new(
        path.to_path_buf(),
        header,
        header_bytes.is_some(),
        records,
    ))
}
