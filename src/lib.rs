//! # shardpipe
//!
//! Run an external, line-oriented transform program over a large dataset in
//! parallel by **sharding the file**, then put the results back together in the
//! original order.
//!
//! A run has four phases:
//!
//! 1. **Split** ([`split`]) each logical input into `N` contiguous shard files
//!    named `{path}.__shard__.{i}`. Shard sizes differ by at most the remainder
//!    of `records / N`; a header line is either repeated in every shard or
//!    left out, per input.
//! 2. **Transform** ([`worker`]) by launching one process per shard, given the
//!    shard paths of every input and then every output as arguments, and
//!    waiting for all of them. Any non-zero exit stops the run.
//! 3. **Merge** ([`merge`]) the shard outputs of every logical output, in shard
//!    order, byte for byte.
//! 4. **Clean up** ([`cleanup`]) the shard files of every input and output.
//!
//! ## Quick start
//!
//! ```no_run
//! use shardpipe::{Pipeline, PipelineConfig, Plan};
//!
//! # fn main() -> shardpipe::Result<()> {
//! let config = PipelineConfig { shards: 12, ..Default::default() };
//!
//! // raw rows -> two feature files
//! Pipeline::new("converters/pre-a", config.clone())
//!     .run(&Plan::fan_out("tr.csv", "tr.gbdt.dense", "tr.gbdt.sparse"))?;
//!
//! // raw rows + one annotation per row -> one file
//! Pipeline::new("converters/pre-b", config)
//!     .run(&Plan::join("tr.csv", "tr.gbdt.out", "tr.fm"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Transform contract
//!
//! The program is invoked once per shard with positional file paths: shard `i`
//! of each input in plan order, then shard `i` of each output in plan order.
//! It must read only its inputs, write only its outputs, and exit 0. Stdout is
//! discarded and stderr passed through. Shards may be empty (or header-only);
//! the program must still produce its outputs.
//!
//! ## Errors
//!
//! Library functions return [`ShardError`], which names the failing [`Phase`]
//! and, where one applies, the shard index. A failed run never leaves a merged
//! output behind, and keeps the shard files for inspection or a retry.
//!
//! ## Feature flags
//!
//! - `compression-gzip` - read `.gz` sources transparently
//! - `compression-zstd` - read `.zst` sources transparently
//!
//! ## Module overview
//!
//! - [`pipeline`] - plans and end-to-end runs
//! - [`split`], [`worker`], [`merge`], [`cleanup`] - the individual phases
//! - [`shard`] - shard naming and discovery
//! - [`dataset`] - line-oriented reading, headers and schemas
//! - [`config`] - run configuration
//! - [`report`] - run reports
//! - [`testing`] - fixtures for tests

pub mod cleanup;
pub mod config;
pub mod dataset;
pub mod error;
pub mod io;
pub mod merge;
pub mod pipeline;
pub mod report;
pub mod shard;
pub mod split;
pub mod testing;
pub mod worker;

pub use config::PipelineConfig;
pub use dataset::{Dataset, Header, HeaderMode, RecordSchema};
pub use error::{Phase, Result, ShardError};
pub use pipeline::{Pipeline, Plan};
pub use report::RunReport;
pub use shard::{ShardSet, shard_path};
pub use worker::{CancelToken, Job, JobOutcome, JobStatus, WorkerPool};
