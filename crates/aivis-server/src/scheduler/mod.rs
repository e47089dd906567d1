//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! recurring stale-scan sweep.

use aivis_scan::ScanCoordinator;
use chrono::{Duration, Utc};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Every minute, on the minute.
const STALE_SCAN_SCHEDULE: &str = "0 * * * * *";

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process. Dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    coordinator: ScanCoordinator,
    max_lifetime: Duration,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_stale_scan_job(&scheduler, coordinator, max_lifetime).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Register the sweep that fails modules of scans older than
/// `max_lifetime`, so no scan stays in flight forever.
async fn register_stale_scan_job(
    scheduler: &JobScheduler,
    coordinator: ScanCoordinator,
    max_lifetime: Duration,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(STALE_SCAN_SCHEDULE, move |_uuid, _lock| {
        let coordinator = coordinator.clone();
        Box::pin(async move {
            run_stale_scan_sweep(&coordinator, max_lifetime).await;
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// One sweep. Errors are logged; the next tick retries.
async fn run_stale_scan_sweep(coordinator: &ScanCoordinator, max_lifetime: Duration) -> usize {
    match coordinator.expire_stale_scans(max_lifetime, Utc::now()).await {
        Ok(0) => {
            tracing::debug!("scheduler: no stale scans");
            0
        }
        Ok(expired) => {
            tracing::info!(expired, "scheduler: expired stale scans");
            expired
        }
        Err(e) => {
            tracing::error!(error = %e, "scheduler: stale-scan sweep failed");
            0
        }
    }
}
