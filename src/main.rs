//! shardpipe: command-line interface for sharded transform runs.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shardpipe::config::PipelineConfig;
use shardpipe::{HeaderMode, Pipeline, Plan, ShardError, cleanup, merge, split};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardpipe", version)]
#[command(
    about = "Shard a dataset, run a transform on every shard in parallel, and merge the results",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct CommonOpts {
    /// Number of shards [default: 12]
    #[arg(short = 's', long)]
    shards: Option<usize>,

    /// JSON config file (fields of PipelineConfig)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct RunOpts {
    #[command(flatten)]
    common: CommonOpts,

    /// Maximum transforms running at once [default: one per shard]
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Abort the transform phase after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Leave shard files on disk after a successful run
    #[arg(long)]
    keep_shards: bool,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Argument passed to the transform before the shard paths (repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    args: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// One headed source transformed into two outputs
    FanOut {
        #[command(flatten)]
        opts: RunOpts,
        /// Transform program
        program: PathBuf,
        src: PathBuf,
        dst1: PathBuf,
        dst2: PathBuf,
    },

    /// A headed source joined row for row with a header-less file into one output
    Join {
        #[command(flatten)]
        opts: RunOpts,
        /// Transform program
        program: PathBuf,
        src1: PathBuf,
        src2: PathBuf,
        dst: PathBuf,
    },

    /// Any number of inputs and outputs; headed inputs come first, then aligned ones
    Run {
        #[command(flatten)]
        opts: RunOpts,
        /// Transform program
        program: PathBuf,
        /// Input whose first line is a header (repeatable)
        #[arg(long = "input", required = true)]
        inputs: Vec<PathBuf>,
        /// Header-less input aligned row for row with the first input (repeatable)
        #[arg(long = "aligned-input")]
        aligned: Vec<PathBuf>,
        /// Output (repeatable)
        #[arg(long = "output", required = true)]
        outputs: Vec<PathBuf>,
    },

    /// Split a file into shards and stop
    Split {
        #[command(flatten)]
        common: CommonOpts,
        /// Treat every line as a record
        #[arg(long, conflicts_with = "strip_header")]
        no_header: bool,
        /// Read the header but leave it out of the shards
        #[arg(long)]
        strip_header: bool,
        path: PathBuf,
    },

    /// Merge existing shard files into their logical file
    Merge {
        #[command(flatten)]
        common: CommonOpts,
        path: PathBuf,
    },

    /// Remove shard files
    Clean {
        #[command(flatten)]
        common: CommonOpts,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report_failure(e: &anyhow::Error) {
    match e.downcast_ref::<ShardError>() {
        Some(err) => {
            let phase = err.phase().map_or_else(|| "setup".to_string(), |p| p.to_string());
            match err.shard() {
                Some(shard) => eprintln!("Error: {phase} failed at shard {shard}: {err}"),
                None => eprintln!("Error: {phase} failed: {err}"),
            }
        }
        None => eprintln!("Error: {e:#}"),
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::FanOut {
            opts,
            program,
            src,
            dst1,
            dst2,
        } => run_plan(&opts, program, &Plan::fan_out(src, dst1, dst2)),
        Commands::Join {
            opts,
            program,
            src1,
            src2,
            dst,
        } => run_plan(&opts, program, &Plan::join(src1, src2, dst)),
        Commands::Run {
            opts,
            program,
            inputs,
            aligned,
            outputs,
        } => {
            let plan = inputs
                .into_iter()
                .fold(Plan::new(), |plan, p| plan.input(p, HeaderMode::Keep));
            let plan = aligned.into_iter().fold(plan, Plan::aligned_input);
            let plan = outputs.into_iter().fold(plan, Plan::output);
            run_plan(&opts, program, &plan)
        }
        Commands::Split {
            common,
            no_header,
            strip_header,
            path,
        } => {
            let config = load_config(&common)?;
            let mode = if no_header {
                HeaderMode::None
            } else if strip_header {
                HeaderMode::Strip
            } else {
                HeaderMode::Keep
            };
            let set = split::split(&path, config.shards, mode)?;
            println!(
                "{}: {} records in {} shards {:?}",
                path.display(),
                set.total_records(),
                set.count(),
                set.records()
            );
            Ok(())
        }
        Commands::Merge { common, path } => {
            let config = load_config(&common)?;
            let bytes = merge::merge(&path, config.shards)?;
            println!("{}: {bytes} bytes from {} shards", path.display(), config.shards);
            Ok(())
        }
        Commands::Clean { common, paths } => {
            let config = load_config(&common)?;
            let warnings = cleanup::remove_all(&paths, config.shards);
            info!(warnings = warnings.len(), "cleanup finished");
            Ok(())
        }
    }
}

fn run_plan(opts: &RunOpts, program: PathBuf, plan: &Plan) -> Result<()> {
    let mut config = load_config(&opts.common)?;
    if let Some(limit) = opts.max_parallel {
        config.max_parallel = Some(limit);
    }
    if let Some(secs) = opts.timeout_secs {
        config.timeout_secs = Some(secs);
    }
    config.keep_shards |= opts.keep_shards;
    config.validate()?;

    let report = Pipeline::new(program, config)
        .leading_args(opts.args.iter().cloned())
        .run(plan)?;
    report.print();

    if let Some(path) = &opts.report {
        report
            .save_to_file(path)
            .with_context(|| format!("write run report {}", path.display()))?;
        info!(path = %path.display(), "wrote run report");
    }
    Ok(())
}

/// Defaults, then the config file, then `SHARDPIPE_*` variables, then `--shards`.
fn load_config(common: &CommonOpts) -> Result<PipelineConfig> {
    let base = match &common.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let mut config = base.apply_env()?;
    if let Some(shards) = common.shards {
        config.shards = shards;
    }
    config.validate()?;
    Ok(config)
}
