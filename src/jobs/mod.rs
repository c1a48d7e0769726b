//! Background job scheduling

pub mod archive;

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::services::ArchiveService;

/// Initialize and start the job scheduler
pub async fn start_scheduler(
    archive_service: Arc<ArchiveService>,
    schedule: &str,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let service = archive_service.clone();
    let archive_job = Job::new_async(schedule, move |_uuid, _l| {
        let service = service.clone();
        Box::pin(async move {
            archive::run_archive(service).await;
        })
    })?;
    scheduler.add(archive_job).await?;

    scheduler.start().await?;

    info!(schedule = %schedule, "Job scheduler started");
    Ok(scheduler)
}
