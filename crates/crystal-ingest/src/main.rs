//! Crystal Ball Index Builder - command-line entry point

use anyhow::{Context, Result};
use clap::Parser;
use crystal_common::logging::{init_logging, LogConfig, LogLevel};
use crystal_ingest::cli::{Cli, Command};
use crystal_ingest::{IndexError, IndexPipeline};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("crystal-ingest")
        .filter_directives("hyper=warn,reqwest=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        },
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let stage = e
                .downcast_ref::<IndexError>()
                .map(IndexError::stage)
                .unwrap_or("setup");
            error!("{} stage failed: {:#}", stage, e);
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli
        .load_config()
        .context("Failed to load configuration")?;
    let pipeline = IndexPipeline::new(config)?;

    match cli.command {
        Command::Build => {
            pipeline.run().await?;
        },
        Command::Download => {
            let locations = pipeline.fetch_index().await?;
            let stats = pipeline.download(&locations).await?;
            info!(
                downloaded = stats.downloaded,
                failed = stats.failed,
                reused = stats.skipped_existing,
                "Download finished"
            );
        },
        Command::Extract { output } => {
            let output = output.unwrap_or_else(|| pipeline.work_path("identifiers.txt"));
            let stats = pipeline.extract(&output).await?;
            info!(
                file = %output.display(),
                identifiers = stats.identifiers,
                "Identifiers written"
            );
        },
        Command::Sort { input, output } => {
            let stats = pipeline.sort(&input, &output).await?;
            info!(
                file = %output.display(),
                unique = stats.lines_written,
                "Sorted identifiers written"
            );
        },
        Command::Partition { input } => {
            let stats = pipeline.partition(&input).await?;
            info!(
                dir = %pipeline.config().shard_output_path.display(),
                lines = stats.lines,
                shards = stats.shards.len(),
                "Shards updated"
            );
        },
    }

    Ok(())
}
