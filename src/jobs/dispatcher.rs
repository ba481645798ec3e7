//! Fire-and-forget job submission for the request path

use std::sync::Arc;
use tracing::{debug, warn};

use super::{Enqueued, Job, JobQueue};

/// Submits recomputation jobs without surfacing queue failures to callers
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Submit one job. Returns `None` when the queue rejected it; the
    /// failure is logged and never propagated.
    pub async fn dispatch(&self, job: Job) -> Option<Enqueued> {
        match self.queue.enqueue(job).await {
            Ok(outcome) => {
                match outcome {
                    Enqueued::New(job_id) => debug!(
                        job_id = %job_id,
                        job_type = %job.kind,
                        subscription_id = job.subscription_id,
                        "Job enqueued"
                    ),
                    Enqueued::Deduplicated => debug!(
                        job_type = %job.kind,
                        subscription_id = job.subscription_id,
                        "Job already pending, deduplicated"
                    ),
                }
                Some(outcome)
            }
            Err(e) => {
                warn!(
                    job_type = %job.kind,
                    subscription_id = job.subscription_id,
                    error = %e,
                    "Failed to enqueue job"
                );
                None
            }
        }
    }

    /// Price job for a newly created subscription
    pub async fn schedule_price(&self, subscription_id: i64) {
        self.dispatch(Job::set_price(subscription_id)).await;
    }

    /// Price and timestamp jobs after a service or plan change
    pub async fn schedule_recalculation(&self, subscription_id: i64) {
        self.dispatch(Job::set_price(subscription_id)).await;
        self.dispatch(Job::set_last_change_time(subscription_id)).await;
    }
}
