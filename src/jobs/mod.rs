//! Background job system
//!
//! Price and timestamp recomputation run as deduplicated jobs keyed by
//! (job kind, subscription id). Queue backends implement [`JobQueue`];
//! workers pull from the queue and run [`tasks`].

mod dispatcher;
mod in_memory;
mod postgres;
pub mod tasks;
mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, Result};

pub use dispatcher::Dispatcher;
pub use in_memory::{FailedJob, InMemoryJobQueue};
pub use postgres::PgJobQueue;
pub use worker::{JobWorker, WorkerPool};

/// Kind of recomputation a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    SetPrice,
    SetLastChangeTime,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::SetPrice => "set_price",
            JobKind::SetLastChangeTime => "set_last_change_time",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "set_price" => Ok(JobKind::SetPrice),
            "set_last_change_time" => Ok(JobKind::SetLastChangeTime),
            other => Err(AppError::Queue(format!("unknown job kind: {}", other))),
        }
    }
}

/// A unit of work for one subscription. Also the deduplication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Job {
    pub kind: JobKind,
    pub subscription_id: i64,
}

impl Job {
    pub fn set_price(subscription_id: i64) -> Self {
        Self {
            kind: JobKind::SetPrice,
            subscription_id,
        }
    }

    pub fn set_last_change_time(subscription_id: i64) -> Self {
        Self {
            kind: JobKind::SetLastChangeTime,
            subscription_id,
        }
    }
}

/// A job taken off the queue, with delivery metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobData {
    pub job_id: Uuid,
    pub job: Job,
    /// Failed attempts so far
    pub attempts: u32,
    pub run_at: DateTime<Utc>,
}

impl JobData {
    pub fn new(job: Job) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            job,
            attempts: 0,
            run_at: Utc::now(),
        }
    }
}

/// Outcome of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    New(Uuid),
    /// Same job already queued or running; nothing new was added
    Deduplicated,
}

/// Job queue with per-key deduplication.
///
/// At most one job per [`Job`] key is queued or running at any time. A
/// submission while the key is queued is dropped. A submission while the key
/// is running is coalesced into one follow-up run queued when the current run
/// finishes, so a change that lands mid-run is never lost.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<Enqueued>;

    /// Take the next ready job and mark it running
    async fn dequeue(&self) -> Result<Option<JobData>>;

    async fn complete(&self, data: &JobData) -> Result<()>;

    /// Record a failure; the queue decides between retry and giving up
    async fn fail(&self, data: &JobData, error: &str) -> Result<()>;
}

const MAX_RETRY_DELAY_SECONDS: u64 = 24 * 60 * 60;

/// Exponential backoff: base * 2^attempts seconds, capped at one day
pub(crate) fn retry_delay(base_seconds: u64, attempts: u32) -> chrono::Duration {
    let factor = 2_u64.saturating_pow(attempts);
    let seconds = base_seconds
        .saturating_mul(factor)
        .min(MAX_RETRY_DELAY_SECONDS);
    chrono::Duration::seconds(seconds as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_round_trips_through_name() {
        for kind in [JobKind::SetPrice, JobKind::SetLastChangeTime] {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
        }
        assert!("send_email".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(5, 0), chrono::Duration::seconds(5));
        assert_eq!(retry_delay(5, 1), chrono::Duration::seconds(10));
        assert_eq!(retry_delay(5, 3), chrono::Duration::seconds(40));
        assert_eq!(retry_delay(0, 4), chrono::Duration::seconds(0));
        assert_eq!(retry_delay(5, 60), chrono::Duration::seconds(86_400));
    }
}
