//! Job worker system for processing background jobs
//!
//! Workers poll the job queue and run [`tasks`](super::tasks) against the
//! shared application state.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use super::{tasks, JobQueue};
use crate::error::Result;
use crate::AppState;

/// A single worker that processes jobs from a queue
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    state: AppState,
    worker_id: String,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        state: AppState,
        worker_id: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            state,
            worker_id: worker_id.into(),
            poll_interval,
        }
    }

    /// Process jobs until shutdown is requested on the channel.
    ///
    /// Shutdown is only observed between jobs; a job that has started always
    /// runs to completion.
    pub async fn start(self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(worker_id = %self.worker_id, "Job worker started");

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            let pause = match self.process_next_job().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.poll_interval,
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "Error processing job");
                    Duration::from_secs(1)
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(pause) => {},
            }
        }

        tracing::info!(worker_id = %self.worker_id, "Job worker stopped");
    }

    /// Run every ready job until the queue has nothing left to hand out.
    ///
    /// Returns the number of jobs processed. Jobs waiting on a retry backoff
    /// are left in the queue.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next_job().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Process the next available job from the queue
    pub async fn process_next_job(&self) -> Result<Option<Uuid>> {
        let Some(data) = self.queue.dequeue().await? else {
            return Ok(None);
        };

        tracing::debug!(
            worker_id = %self.worker_id,
            job_id = %data.job_id,
            job_type = %data.job.kind,
            subscription_id = data.job.subscription_id,
            attempt = data.attempts + 1,
            "Processing job"
        );

        match tasks::execute(&self.state, data.job).await {
            Ok(()) => {
                self.queue.complete(&data).await?;
                tracing::info!(
                    worker_id = %self.worker_id,
                    job_id = %data.job_id,
                    job_type = %data.job.kind,
                    subscription_id = data.job.subscription_id,
                    "Job completed"
                );
            }
            Err(e) => {
                let error = e.to_string();
                self.queue.fail(&data, &error).await?;
                tracing::warn!(
                    worker_id = %self.worker_id,
                    job_id = %data.job_id,
                    job_type = %data.job.kind,
                    subscription_id = data.job.subscription_id,
                    error = %error,
                    "Job failed"
                );
            }
        }

        Ok(Some(data.job_id))
    }
}

/// Pool of workers that process jobs concurrently
pub struct WorkerPool {
    workers: Vec<tokio::task::JoinHandle<()>>,
    shutdown_txs: Vec<mpsc::Sender<()>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        state: AppState,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Self {
        let mut workers = Vec::with_capacity(worker_count);
        let mut shutdown_txs = Vec::with_capacity(worker_count);

        for i in 0..worker_count {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            let worker = JobWorker::new(
                queue.clone(),
                state.clone(),
                format!("worker-{}", i),
                poll_interval,
            );

            workers.push(tokio::spawn(worker.start(shutdown_rx)));
            shutdown_txs.push(shutdown_tx);
        }

        Self {
            workers,
            shutdown_txs,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        tracing::info!("Shutting down worker pool...");

        for shutdown_tx in self.shutdown_txs {
            let _ = shutdown_tx.send(()).await;
        }

        for worker in self.workers {
            let _ = worker.await;
        }

        tracing::info!("Worker pool shut down");
    }
}
