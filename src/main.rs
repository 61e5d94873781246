//! collection-runner - Resumable Concurrent Collection Processing
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use collection_runner::command::{collection_from_dir, CommandOperation};
use collection_runner::config::{AppConfig, CliArgs};
use collection_runner::coordinator::{build_runtime, Coordinator};
use collection_runner::progress::{print_header, print_summary};
use collection_runner::report::ResultDump;
use collection_runner::DirBackupStore;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(130),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the run completed (vs was interrupted)
fn run() -> Result<bool> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = AppConfig::from_args(args).context("Invalid configuration")?;

    let collection = collection_from_dir(&config.input_dir, &config.exclude_patterns)
        .with_context(|| format!("Failed to load items from {}", config.input_dir.display()))?;

    let backup_dir = config.run.backup.as_ref().map(|b| b.dir.display().to_string());

    if config.run.show_progress {
        print_header(
            &config.input_dir.display().to_string(),
            collection.len(),
            config.run.concurrency,
            backup_dir.as_deref(),
        );
    }

    let mut operation = CommandOperation::new(config.command.clone())
        .scratch_dir(config.scratch_dir.clone())
        .input_file(config.input_file.clone());
    for name in &config.output_files {
        operation = operation.output_file(name.clone());
    }

    let runtime = build_runtime(config.run.concurrency).context("Failed to create async runtime")?;

    let coordinator = Coordinator::new(config.run.clone()).context("Failed to initialize runner")?;

    // Setup signal handler for graceful shutdown
    let shutdown_flag = coordinator.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let report = runtime
        .block_on(coordinator.run(&collection, operation))
        .context("Run failed")?;

    ResultDump::new(&collection, &report)
        .write_to(&config.results_path)
        .with_context(|| format!("Failed to write {}", config.results_path.display()))?;

    if config.run.show_progress {
        let backup = config.run.backup.as_ref().and_then(|b| {
            match DirBackupStore::open(&b.dir).and_then(|store| store.total_size()) {
                Ok(size) => Some((b.dir.display().to_string(), size)),
                Err(e) => {
                    warn!(error = %e, "Could not measure backup directory");
                    None
                }
            }
        });

        print_summary(
            &report.summary,
            report.duration,
            report.completed(),
            &config.results_path.display().to_string(),
            backup.as_ref().map(|(dir, size)| (dir.as_str(), *size)),
        );
    }

    if !report.completed() {
        info!("Run was interrupted before completion");
    }

    if report.summary.failures() > 0 {
        info!(failures = report.summary.failures(), "Run completed with failures");
    }

    Ok(report.completed())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("collection_runner=debug,warn")
    } else {
        EnvFilter::new("collection_runner=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
