//! Periodic purge of expired OTP challenges and sessions
//!
//! Expired rows are already rejected on read; the sweep only reclaims space.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::store::{Store, StoreError};

/// Rows removed by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub challenges: u64,
    pub sessions: u64,
}

pub async fn sweep_once(store: &dyn Store, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
    let challenges = store.purge_expired_challenges(now).await?;
    let sessions = store.purge_expired_sessions(now).await?;

    Ok(SweepReport {
        challenges,
        sessions,
    })
}

/// Schedule the sweep. The returned scheduler must be kept alive.
pub async fn start(store: Arc<dyn Store>, schedule: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_, _| {
        let store = store.clone();
        Box::pin(async move {
            match sweep_once(store.as_ref(), Utc::now()).await {
                Ok(report) => info!(
                    "Expiry sweep removed {} challenges and {} sessions",
                    report.challenges, report.sessions
                ),
                Err(e) => error!("Expiry sweep failed: {}", e),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    info!("Started expiry sweep with schedule: {}", schedule);
    Ok(scheduler)
}
