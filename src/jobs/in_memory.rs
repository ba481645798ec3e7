//! In-memory job queue implementation
//!
//! Suitable for development, tests and single-instance deployments. Jobs do
//! not survive a restart.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{retry_delay, Enqueued, Job, JobData, JobQueue};
use crate::error::Result;

/// Default maximum size for failed job history
const DEFAULT_MAX_HISTORY_SIZE: usize = 1_000;

/// A job that exhausted its retries
#[derive(Debug, Clone)]
pub struct FailedJob {
    pub data: JobData,
    pub error: String,
}

#[derive(Debug)]
struct Running {
    job_id: Uuid,
    /// A submission arrived while running
    rerun: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<JobData>,
    /// Keys present in `pending`
    queued: HashSet<Job>,
    running: HashMap<Job, Running>,
    /// Bounded history of failed jobs (oldest removed when full)
    failed: VecDeque<FailedJob>,
}

impl QueueState {
    fn push(&mut self, data: JobData) {
        self.queued.insert(data.job);
        self.pending.push_back(data);
    }

    /// Remove the running entry for `data`, returning whether a rerun was requested
    fn finish(&mut self, data: &JobData) -> Option<bool> {
        match self.running.get(&data.job) {
            Some(running) if running.job_id == data.job_id => {
                self.running.remove(&data.job).map(|r| r.rerun)
            }
            _ => None,
        }
    }
}

/// In-memory job queue with per-key deduplication
///
/// All bookkeeping sits behind one lock so the queued/running check and the
/// insert happen atomically.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    max_retries: u32,
    retry_backoff_seconds: u64,
    max_history_size: usize,
}

impl InMemoryJobQueue {
    /// Create a new in-memory job queue
    pub fn new(max_retries: u32, retry_backoff_seconds: u64) -> Self {
        Self::with_history_limit(max_retries, retry_backoff_seconds, DEFAULT_MAX_HISTORY_SIZE)
    }

    /// Create a new in-memory job queue with custom failed-history limit
    pub fn with_history_limit(
        max_retries: u32,
        retry_backoff_seconds: u64,
        max_history_size: usize,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            max_retries,
            retry_backoff_seconds,
            max_history_size,
        }
    }

    /// Jobs waiting to run, in queue order
    pub async fn pending_jobs(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        state.pending.iter().map(|d| d.job).collect()
    }

    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running.len()
    }

    pub async fn failed_jobs(&self) -> Vec<FailedJob> {
        self.state.lock().await.failed.iter().cloned().collect()
    }

    /// Nothing queued and nothing running
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        state.pending.is_empty() && state.running.is_empty()
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(3, 5)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<Enqueued> {
        let mut state = self.state.lock().await;

        if state.queued.contains(&job) {
            return Ok(Enqueued::Deduplicated);
        }
        if let Some(running) = state.running.get_mut(&job) {
            running.rerun = true;
            return Ok(Enqueued::Deduplicated);
        }

        let data = JobData::new(job);
        let job_id = data.job_id;
        state.push(data);
        Ok(Enqueued::New(job_id))
    }

    async fn dequeue(&self) -> Result<Option<JobData>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let Some(position) = state.pending.iter().position(|d| d.run_at <= now) else {
            return Ok(None);
        };
        let Some(data) = state.pending.remove(position) else {
            return Ok(None);
        };

        state.queued.remove(&data.job);
        state.running.insert(
            data.job,
            Running {
                job_id: data.job_id,
                rerun: false,
            },
        );
        Ok(Some(data))
    }

    async fn complete(&self, data: &JobData) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.finish(data) == Some(true) {
            state.push(JobData::new(data.job));
        }
        Ok(())
    }

    async fn fail(&self, data: &JobData, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(rerun) = state.finish(data) else {
            return Ok(());
        };

        if data.attempts < self.max_retries {
            let retry = JobData {
                job_id: data.job_id,
                job: data.job,
                attempts: data.attempts + 1,
                run_at: Utc::now() + retry_delay(self.retry_backoff_seconds, data.attempts),
            };
            state.push(retry);
            return Ok(());
        }

        if state.failed.len() >= self.max_history_size {
            state.failed.pop_front();
        }
        state.failed.push_back(FailedJob {
            data: data.clone(),
            error: error.to_string(),
        });

        if rerun {
            state.push(JobData::new(data.job));
        }
        Ok(())
    }
}
