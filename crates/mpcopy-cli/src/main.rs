//! mpcopy - resumable parallel file copy
//!
//! Lists a source tree into a durable queue file, then drains it with a pool
//! of workers that each hand one file to `rsync` (or an in-process copy).
//! Killing the process at any point loses nothing: rerun it with the same
//! queue file and it continues where it stopped.

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use mpcopy_config::{parse_level, Config, ConfigLoader, LoggingConfig, TransferBackend};
use mpcopy_engine::{build_executor, Orchestrator, RunSettings};
use mpcopy_types::{Error, RetryPolicy, ThreadCount};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod display;
mod progress;

use progress::BarReporter;

/// mpcopy - resumable parallel file copy
#[derive(Parser, Debug)]
#[command(
    name = "mpcopy",
    version = env!("CARGO_PKG_VERSION"),
    about = "Resumable parallel file copy driven by a durable work queue",
    long_about = "mpcopy lists every file under SOURCE into a queue file and copies them into\n\
                  TARGET with a pool of workers. Without --execute nothing is changed.\n\
                  The last path component of SOURCE and TARGET must match."
)]
struct Cli {
    /// Source root
    #[arg(short, long, value_name = "SRC_PATH", required_unless_present = "generate_config")]
    source: Option<PathBuf>,

    /// Target root
    #[arg(short, long, value_name = "TRG_PATH", required_unless_present = "generate_config")]
    target: Option<PathBuf>,

    /// Number of concurrent workers (1-256)
    #[arg(short = 'n', long)]
    threads: Option<usize>,

    /// Actually copy; without this flag the run is a dry run
    #[arg(short = 'x', long)]
    execute: bool,

    /// Remove each source file once it is in place
    #[arg(long = "move")]
    move_source: bool,

    /// Compare size and modification time instead of checksums
    #[arg(long)]
    fast: bool,

    /// Log level as WARN, INFO, DEBUG, etc
    #[arg(short, long, value_name = "LEVEL")]
    log: Option<String>,

    /// Directory that receives mpcopy.log
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Create the target root if it does not exist
    #[arg(long)]
    create_target: bool,

    /// Queue file used to resume interrupted runs
    #[arg(long, value_name = "FILE")]
    queue_file: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Stop dispatching an item after this many recorded failures
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Extra attempts per failed item within one run
    #[arg(long)]
    retries: Option<u32>,

    /// Transfer backend
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Re-list the source when the previous queue was fully drained
    #[arg(long)]
    rebuild: bool,

    /// Quiet mode - no progress bar, errors only on the console
    #[arg(short, long)]
    quiet: bool,

    /// Write a default configuration file and exit; the format follows the
    /// extension (.toml, .json, otherwise YAML)
    #[arg(long, value_name = "FILE", exclusive = true)]
    generate_config: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Rsync,
    Native,
}

impl From<BackendArg> for TransferBackend {
    fn from(backend: BackendArg) -> Self {
        match backend {
            BackendArg::Rsync => TransferBackend::Rsync,
            BackendArg::Native => TransferBackend::Native,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<Error>() {
            Some(error) => {
                display::print_error(error);
                error.exit_code()
            }
            None => {
                eprintln!("{} {:#}", style("✗").red().bold(), e);
                1
            }
        },
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    if let Some(path) = &cli.generate_config {
        return generate_config(path);
    }

    let mut config = load_config(&cli)?;
    apply_overrides(&mut config, &cli)?;

    // flushed when this function returns, before the process exits
    let _guard = init_logging(&config.logging, cli.quiet)?;

    let result = copy_command(&cli, &config).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn generate_config(path: &Path) -> Result<i32> {
    if path.exists() {
        return Err(Error::validation(format!("{} already exists", path.display())).into());
    }
    ConfigLoader::generate_default_config(path)
        .map_err(Error::from)
        .context("failed to write configuration")?;
    println!(
        "{} Default configuration written to {}",
        style("✓").green().bold(),
        path.display()
    );
    Ok(0)
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load_default(),
    };
    config.map_err(Error::from).context("failed to load configuration")
}

/// Command-line flags win over the configuration file and environment
fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<(), Error> {
    let transfer = &mut config.transfer;
    if let Some(threads) = cli.threads {
        transfer.threads = ThreadCount::new(threads).map_err(Error::validation)?;
    }
    transfer.execute |= cli.execute;
    transfer.move_source |= cli.move_source;
    transfer.fast |= cli.fast;
    transfer.create_target |= cli.create_target;
    if let Some(backend) = cli.backend {
        transfer.backend = backend.into();
    }
    if let Some(retries) = cli.retries {
        transfer.retries_per_run = retries;
    }
    if let Some(max_attempts) = cli.max_attempts {
        transfer.max_attempts = Some(max_attempts);
    }
    RetryPolicy::new(transfer.retries_per_run, transfer.max_attempts).map_err(Error::validation)?;

    if let Some(queue_file) = &cli.queue_file {
        config.queue.queue_file = queue_file.clone();
    }
    if let Some(level) = &cli.log {
        parse_level(level)?;
        config.logging.level = level.clone();
    }
    if let Some(log_dir) = &cli.log_dir {
        config.logging.log_dir = log_dir.clone();
    }
    Ok(())
}

fn init_logging(logging: &LoggingConfig, quiet: bool) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{
        filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
        Layer,
    };

    let directive = logging.filter_directive().map_err(Error::from)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .context("invalid log filter")?;

    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(if quiet {
            LevelFilter::ERROR
        } else {
            LevelFilter::TRACE
        });

    if !logging.file_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init()
            .context("failed to install logger")?;
        return Ok(None);
    }

    std::fs::create_dir_all(&logging.log_dir).with_context(|| {
        format!("cannot create log directory {}", logging.log_dir.display())
    })?;
    let appender = tracing_appender::rolling::never(&logging.log_dir, "mpcopy.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_ansi(false)
        .with_thread_ids(true)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("failed to install logger")?;
    Ok(Some(guard))
}

async fn copy_command(cli: &Cli, config: &Config) -> Result<i32> {
    let (Some(source), Some(target)) = (&cli.source, &cli.target) else {
        return Err(Error::validation("--source and --target are required").into());
    };
    let mut settings = RunSettings::from_config(source, target, config)?;
    settings.rebuild = cli.rebuild;
    let dry_run = settings.options.dry_run;

    info!(
        "mpcopy v{} {} -> {}",
        env!("CARGO_PKG_VERSION"),
        settings.source.display(),
        settings.target.display()
    );
    if dry_run && !cli.quiet {
        println!(
            "{} Dry run mode - pass --execute to copy",
            style("ℹ").yellow()
        );
    }

    let executor = build_executor(
        config.transfer.backend,
        &config.rsync,
        &settings.source,
        &settings.target,
    );
    let reporter = Arc::new(BarReporter::new(cli.quiet));
    let orchestrator = Orchestrator::new(settings, executor).with_reporter(reporter);

    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight transfers, press Ctrl-C again to exit now");
            shutdown.shutdown();
            if tokio::signal::ctrl_c().await.is_ok() {
                // nothing in flight was marked done, so the queue still holds it
                eprintln!("{} aborted", style("✗").red().bold());
                std::process::exit(Error::Interrupted.exit_code());
            }
        }
    });

    let summary = orchestrator.run().await?;
    if !cli.quiet {
        display::print_summary(&summary, dry_run);
    }
    Ok(display::summary_exit_code(&summary))
}
