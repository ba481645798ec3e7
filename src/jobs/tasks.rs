//! Worker-side recomputation jobs.
//!
//! Both jobs are idempotent and treat a vanished subscription as a no-op.
//! After their transaction they drop the aggregate total; cache errors are
//! logged and never fail the job.

use chrono::Utc;
use tracing::debug;

use super::{Job, JobKind};
use crate::cache::invalidate_total;
use crate::error::Result;
use crate::AppState;

/// Run a job against the current store state
pub async fn execute(state: &AppState, job: Job) -> Result<()> {
    match job.kind {
        JobKind::SetPrice => set_price(state, job.subscription_id).await,
        JobKind::SetLastChangeTime => set_last_change_time(state, job.subscription_id).await,
    }
}

/// Recompute the subscription price from its service and plan
pub async fn set_price(state: &AppState, subscription_id: i64) -> Result<()> {
    match state.store.recompute_price(subscription_id).await? {
        Some(price) => debug!(subscription_id, price, "Subscription price updated"),
        None => debug!(subscription_id, "Subscription gone, skipping price update"),
    }

    invalidate_total(state.cache.as_ref()).await;
    Ok(())
}

/// Stamp the subscription's last change time with the current time
pub async fn set_last_change_time(state: &AppState, subscription_id: i64) -> Result<()> {
    match state
        .store
        .touch_last_change_time(subscription_id, Utc::now())
        .await?
    {
        Some(at) => debug!(subscription_id, last_change_time = %at, "Subscription timestamp updated"),
        None => debug!(subscription_id, "Subscription gone, skipping timestamp update"),
    }

    invalidate_total(state.cache.as_ref()).await;
    Ok(())
}
