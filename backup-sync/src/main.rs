//! Backup Sync - Main entry point

use anyhow::{Context, Result};
use backup_sync::daemon::ShutdownCoordinator;
use backup_sync::progress::spawn_reporter;
use backup_sync::scheduler::UnitFailure;
use backup_sync::{
    utils, BackupExecutor, BackupJob, Config, HttpRemote, SharedRepository,
    SqliteDedupRepository,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up one or more directories
    Run {
        /// Directories to back up
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Device id (overrides config)
        #[arg(long)]
        device_id: Option<String>,

        /// Maximum concurrent sync units (overrides config)
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log.level = level;
    }

    let (paths, device_id, jobs) = match args.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
            return Ok(ExitCode::SUCCESS);
        }
        Command::Run {
            paths,
            device_id,
            jobs,
        } => (paths, device_id, jobs),
    };

    if let Some(device_id) = device_id {
        config.device.id = device_id;
    }
    if let Some(jobs) = jobs {
        config.sync.max_concurrent = jobs.max(1);
    }

    utils::logger::init(&config.log)?;

    tracing::info!(
        "Starting backup-sync v{} (device: {})",
        env!("CARGO_PKG_VERSION"),
        config.device.id
    );

    let repository = SqliteDedupRepository::open(&config.repository.path).with_context(|| {
        format!(
            "opening dedup cache at {}",
            config.repository.path.display()
        )
    })?;
    let repository = SharedRepository::new(repository);
    let remote = Arc::new(HttpRemote::from_config(&config.remote)?);

    let shutdown = ShutdownCoordinator::new();
    let signal_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.wait_for_signal().await })
    };

    let executor = BackupExecutor::from_config(&config, repository, remote)
        .with_cancel(shutdown.token())
        .with_error_callback(Arc::new(|failure: &UnitFailure| {
            tracing::warn!("Not synced: {} ({})", failure.local_id, failure.error);
        }));

    let reporter_stop = shutdown.token().child_token();
    let reporter = spawn_reporter(
        executor.progress().clone(),
        Duration::from_secs(2),
        reporter_stop.clone(),
    );

    let mut exit = ExitCode::SUCCESS;
    for path in paths {
        if shutdown.is_triggered() {
            break;
        }

        let job = BackupJob::from_config(&config, path.clone());
        match executor.execute(job).await {
            Ok(report) if report.storage_full => {
                tracing::error!("Remote storage is full, stopping");
                exit = ExitCode::FAILURE;
                break;
            }
            Ok(report) if !report.is_complete() => {
                tracing::warn!(
                    "Backup of {} incomplete: {}/{} nodes synced, {} entries skipped",
                    path.display(),
                    report.completed,
                    report.total,
                    report.skipped.len()
                );
                for entry in &report.skipped {
                    tracing::warn!("Skipped: {} ({})", entry.path.display(), entry.reason);
                }
                exit = ExitCode::FAILURE;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Backup of {} failed: {}", path.display(), e);
                exit = ExitCode::FAILURE;
            }
        }
    }

    reporter_stop.cancel();
    let _ = reporter.await;
    signal_task.abort();

    Ok(exit)
}
