//! Archive job

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::services::{ArchiveError, ArchiveRunReport, ArchiveService};

/// Run one archive pass and log how it went
pub async fn run_archive(service: Arc<ArchiveService>) -> Option<ArchiveRunReport> {
    info!("Running archive job");
    let started = Instant::now();

    match service.run().await {
        Ok(report) => {
            info!(
                elapsed_secs = started.elapsed().as_secs(),
                cleaned = report.cleaned(),
                discarded = report.discarded(),
                rolled_back = report.rolled_back(),
                duplicates = report.duplicates(),
                "Archive job completed"
            );
            Some(report)
        }
        Err(ArchiveError::RunInProgress) => {
            warn!("Previous archive job still running, skipping this one");
            None
        }
        Err(e) => {
            error!(elapsed_secs = started.elapsed().as_secs(), error = %e, "Archive job failed");
            None
        }
    }
}
