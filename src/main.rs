//! Covert IAT Features CLI
//!
//! Builds IAT and image-feature tables from labeled packet captures.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use covert_iat_features::{
    config::{Config, LogConfig, SourceConfig},
    core::WindowSize,
    dataset::{FeatureTableWriter, IatTableReader, IatTableWriter},
    pipeline::{Pipeline, PipelineOptions},
    stats::{create_shared_stats, SharedRunStats},
    VERSION,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iat-features")]
#[command(version = VERSION)]
#[command(about = "Image-based inter-arrival time features from packet captures", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads for both stages
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// IATs per window; must be a perfect square
    #[arg(long, global = true)]
    window_size: Option<usize>,

    /// Log filter when RUST_LOG is unset (e.g. info, debug)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Write run statistics to this JSON file
    #[arg(long, global = true)]
    stats: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Window labeled captures into the IAT table
    Extract {
        /// Capture and its label, as PATH=LABEL (repeatable)
        #[arg(long = "source")]
        sources: Vec<SourceConfig>,

        /// IAT table to write
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Compute image features for every row of an IAT table
    Features {
        /// IAT table to read
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Feature table to write
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Run both stages from the configuration
    Run,

    /// Show configuration
    Config {
        /// Save the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    apply_overrides(&mut config, &cli)?;

    init_logging(&config.log);
    debug!(path = %config_path.display(), "configuration loaded");

    match cli.command {
        Commands::Extract { .. } => with_stats(&config, |pipeline| cmd_extract(pipeline, &config)),
        Commands::Features { .. } => {
            with_stats(&config, |pipeline| cmd_features(pipeline, &config))
        }
        Commands::Run => with_stats(&config, |pipeline| cmd_run(pipeline, &config)),
        Commands::Config { write } => cmd_config(&config, &config_path, write),
    }
}

/// Fold command-line flags into the loaded configuration and validate the
/// result.
fn apply_overrides(config: &mut Config, cli: &Cli) -> Result<()> {
    if let Some(workers) = cli.workers {
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        config.workers = workers;
    }
    if let Some(size) = cli.window_size {
        config.window_size = WindowSize::new(size).context("invalid --window-size")?;
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if cli.json_logs {
        config.log.json = true;
    }
    if let Some(stats) = &cli.stats {
        config.stats_path = Some(stats.clone());
    }

    match &cli.command {
        Commands::Extract { sources, output } => {
            if !sources.is_empty() {
                config.sources = sources.clone();
            }
            if let Some(output) = output {
                config.iat_output = output.clone();
            }
        }
        Commands::Features { input, output } => {
            if let Some(input) = input {
                config.iat_output = input.clone();
            }
            if let Some(output) = output {
                config.features_output = output.clone();
            }
        }
        Commands::Run | Commands::Config { .. } => {}
    }

    config.validate().context("invalid configuration")?;
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Run `command` with a fresh pipeline, then report and persist its stats.
fn with_stats<F>(config: &Config, command: F) -> Result<()>
where
    F: FnOnce(&Pipeline) -> Result<()>,
{
    let stats: SharedRunStats = create_shared_stats();
    let pipeline = Pipeline::new(PipelineOptions::from(config), stats.clone());
    info!(run_id = %stats.run_id(), workers = config.workers, "run started");

    let result = command(&pipeline);

    println!();
    println!("{}", stats.summary());
    if let Some(path) = &config.stats_path {
        stats
            .save(path)
            .with_context(|| format!("saving run statistics to {}", path.display()))?;
        info!(path = %path.display(), "run statistics saved");
    }
    result
}

fn cmd_extract(pipeline: &Pipeline, config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        bail!("no sources configured; pass --source PATH=LABEL");
    }
    let sources = config.timestamp_sources();
    let mut writer = IatTableWriter::create(&config.iat_output, config.window_size)
        .with_context(|| format!("creating {}", config.iat_output.display()))?;
    let windows = pipeline.extract_iats(&sources, &mut writer)?;

    println!("Wrote {windows} IAT windows to {:?}", config.iat_output);
    Ok(())
}

fn cmd_features(pipeline: &Pipeline, config: &Config) -> Result<()> {
    let mut reader = IatTableReader::open(&config.iat_output)
        .with_context(|| format!("opening {}", config.iat_output.display()))?;
    let mut writer = FeatureTableWriter::create(&config.features_output)
        .with_context(|| format!("creating {}", config.features_output.display()))?;
    let vectors = pipeline.features_from_table(&mut reader, &mut writer)?;

    println!("Wrote {vectors} feature vectors to {:?}", config.features_output);
    Ok(())
}

fn cmd_run(pipeline: &Pipeline, config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        bail!("no sources configured");
    }
    let report = pipeline.run(config)?;

    println!(
        "Wrote {} IAT windows to {:?}",
        report.windows_written, config.iat_output
    );
    println!(
        "Wrote {} feature vectors to {:?}",
        report.vectors_written, config.features_output
    );
    Ok(())
}

fn cmd_config(config: &Config, path: &Path, write: bool) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);

    if write {
        config.save_to(path)?;
        println!();
        println!("Saved to {path:?}");
    }
    Ok(())
}
