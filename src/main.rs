//! Plex Archiver - scheduled archival of stale Plex media
//!
//! Runs the archive workflow on a cron schedule, or once with `--once`.

use std::sync::Arc;

use anyhow::Context;

use plex_archiver::cli::CliOptions;
use plex_archiver::config::Config;
use plex_archiver::db::Database;
use plex_archiver::jobs;
use plex_archiver::services::{
    ArchiveService, ArchiveSettings, OriginalCleanup, PlexClient, ScpTransfer, init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = CliOptions::from_args();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    tracing::info!("Starting Plex Archiver");
    tracing::info!("Configuration loaded");

    let db = Database::connect(&config.database_url, config.database_max_connections).await?;
    db.init_schema().await?;

    let plex = PlexClient::new(config.plex.clone())?;
    let transfer = ScpTransfer::new(
        config.archive.ssh_key_path.clone(),
        config.archive.destination.clone(),
        config.archive.backup_layout,
        config.archive.copy_timeout,
    )
    .with_program(config.archive.scp_program.clone());
    let cleanup = OriginalCleanup::new(config.archive.delete_timeout);

    let service = Arc::new(ArchiveService::new(
        Arc::new(plex),
        Arc::new(transfer),
        db,
        cleanup,
        ArchiveSettings {
            max_concurrent: config.archive.max_concurrent,
        },
    ));
    tracing::info!("Archive service initialized");

    if options.run_once {
        let report = service.run().await.context("Archive run failed")?;
        tracing::info!(
            cleaned = report.cleaned(),
            discarded = report.discarded(),
            rolled_back = report.rolled_back(),
            duplicates = report.duplicates(),
            "Single archive run finished"
        );
        return Ok(());
    }

    let schedule = options.schedule_override.as_deref().unwrap_or(&config.schedule);
    let mut scheduler = jobs::start_scheduler(service, schedule).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");
    scheduler.shutdown().await?;

    Ok(())
}
