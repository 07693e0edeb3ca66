//! Pooled job dispatch.
//!
//! One poll loop pulls runnable jobs out of the queue in priority order and
//! hands each to a spawned task. A semaphore bounds concurrent executions;
//! submissions and sequenced successors ring the wake notifier so an idle
//! dispatcher reacts immediately instead of waiting out the poll interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};

use crate::db::{job_repo, now_timestamp, Database};
use crate::error::{DispatchError, Result};

use super::executor::StageExecutor;

pub struct Dispatcher {
    db: Database,
    executor: Arc<StageExecutor>,
    permits: Arc<Semaphore>,
    wake: Arc<Notify>,
    shutdown: AtomicBool,
    worker_count: usize,
    poll_interval: std::time::Duration,
}

impl Dispatcher {
    pub fn new(
        db: Database,
        executor: Arc<StageExecutor>,
        worker_count: usize,
        poll_interval: std::time::Duration,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            db,
            executor,
            permits: Arc::new(Semaphore::new(worker_count)),
            wake,
            shutdown: AtomicBool::new(false),
            worker_count,
            poll_interval,
        }
    }

    /// Verify a job is dispatchable and wake the loop. The loop does the
    /// actual claim, so a submit can never double-run a job.
    pub fn submit(&self, job_id: &str) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(DispatchError::Shutdown.into());
        }
        let job = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        if job.status != "pending" {
            return Err(DispatchError::NotPending {
                job_id: job_id.to_string(),
                status: job.status,
            }
            .into());
        }
        self.wake.notify_one();
        Ok(())
    }

    /// Run the dispatch loop until [`shutdown`](Self::shutdown) is called,
    /// then drain in-flight executions.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tracing::info!(workers = self.worker_count, "dispatcher started");

        while !self.shutdown.load(Ordering::SeqCst) {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match job_repo::next_runnable(&self.db, &now_timestamp())? {
                Some(job) => {
                    let Some(claimed) = job_repo::claim(&self.db, &job.id)? else {
                        continue;
                    };
                    let executor = Arc::clone(&self.executor);
                    tokio::spawn(async move {
                        let job_id = claimed.id.clone();
                        if let Err(err) = executor.run_claimed(claimed).await {
                            tracing::error!(job_id, error = %err, "job execution errored");
                        }
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        // Wait for in-flight jobs before reporting shutdown complete.
        let _ = self.permits.acquire_many(self.worker_count as u32).await;
        tracing::info!("dispatcher stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
        self.wake.notify_one();
    }

    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }
}
