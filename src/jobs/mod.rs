//! Background job scheduling

pub mod scan;
pub mod schedule;

use std::sync::Arc;

use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::services::approvals::ApprovalDesk;

pub use scan::{ScanPhase, ScanReport, ScanSession, ScanSettings, Scanner};
pub use schedule::{Schedule, ScheduleError};

/// Initialize and start the job scheduler
pub async fn start_scheduler(
    scanner: Arc<Scanner>,
    schedule: Schedule,
    approvals: Option<Arc<ApprovalDesk>>,
    cancel: CancellationToken,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    // Tracker scan on the configured cadence
    let scan_scanner = scanner.clone();
    let scan_cancel = cancel.clone();
    let scan_job = Job::new_async(schedule.to_cron().as_str(), move |_uuid, _l| {
        let scanner = scan_scanner.clone();
        let cancel = scan_cancel.clone();
        Box::pin(async move {
            if cancel.is_cancelled() {
                return;
            }
            info!(job = "scan", "Running tracker scan");
            if let Err(e) = scanner.run(&cancel).await {
                tracing::error!(job = "scan", "Scan error: {:#}", e);
            }
        })
    })?;
    scheduler.add(scan_job).await?;

    // Stale approval requests - run every hour
    if let Some(desk) = approvals {
        let expiry_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let desk = desk.clone();
            Box::pin(async move {
                match desk.expire(Utc::now()) {
                    Ok(0) => {}
                    Ok(expired) => info!(job = "approvals", expired, "Expired approval requests"),
                    Err(e) => tracing::error!(job = "approvals", "Approval expiry error: {:#}", e),
                }
            })
        })?;
        scheduler.add(expiry_job).await?;
    }

    scheduler.start().await?;

    info!(
        schedule = %schedule,
        next_run = %schedule.next_fire_time(Utc::now()),
        "Job scheduler started"
    );
    Ok(scheduler)
}
