//! Background cron jobs.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! periodic catalog refresh.

use std::path::PathBuf;
use std::sync::Arc;

use lotdb_collector::Scheduler;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Builds and starts the cron scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process; dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// the cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler(
    collector: Scheduler,
    config: Arc<lotdb_core::AppConfig>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_catalog_refresh_job(
        &scheduler,
        collector,
        config.catalog_path.clone(),
        &config.catalog_refresh_cron,
    )
    .await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Re-reads the catalog on `cron` and re-enqueues incomplete entries.
/// Enqueue is idempotent, so a refresh never duplicates queued work.
async fn register_catalog_refresh_job(
    scheduler: &JobScheduler,
    collector: Scheduler,
    catalog_path: PathBuf,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let catalog_path = Arc::new(catalog_path);

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let collector = collector.clone();
        let catalog_path = Arc::clone(&catalog_path);

        Box::pin(async move {
            tracing::info!("scheduler: starting catalog refresh");
            refresh_catalog(&collector, &catalog_path).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron, "catalog refresh job registered");
    Ok(())
}

/// Loads the catalog and rebuilds the queue from it. Failures are logged;
/// the next tick tries again.
pub async fn refresh_catalog(collector: &Scheduler, catalog_path: &std::path::Path) {
    let catalog = match lotdb_core::load_catalog(catalog_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(
                path = %catalog_path.display(),
                error = %e,
                "scheduler: failed to load catalog"
            );
            return;
        }
    };

    match collector.rebuild_queue(&catalog).await {
        Ok(summary) => tracing::info!(
            enqueued = summary.enqueued,
            already_queued = summary.already_queued,
            "scheduler: catalog refresh complete"
        ),
        Err(e) => tracing::error!(error = %e, "scheduler: catalog refresh failed"),
    }
}
