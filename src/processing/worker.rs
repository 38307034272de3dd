//! Heavy-lane dispatcher
//!
//! Pulls reserved jobs off the queue (bounded by the concurrency budget),
//! flips the document to PROCESSING and hands the work to the external
//! converter. The job then sits detached until its callback arrives or the
//! visibility timeout requeues it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::Result;
use crate::providers::ConverterClient;
use crate::types::job::{JobError, ProcessingJob};

use super::queue::ProcessingQueue;
use super::state_machine::StateMachine;

const TICK_INTERVAL: Duration = Duration::from_millis(500);

pub struct HeavyLaneDispatcher {
    queue: Arc<ProcessingQueue>,
    state_machine: Arc<StateMachine>,
    converter: Arc<dyn ConverterClient>,
    max_concurrent: usize,
}

impl HeavyLaneDispatcher {
    pub fn new(
        queue: Arc<ProcessingQueue>,
        state_machine: Arc<StateMachine>,
        converter: Arc<dyn ConverterClient>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            queue,
            state_machine,
            converter,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run until shutdown flips. In-flight reservations are released back
    /// to the queue on the way out so another worker can resume them.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(max_concurrent = self.max_concurrent, "heavy-lane dispatcher started");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.queue.tick() {
                        tracing::error!("queue tick failed: {}", e);
                    }
                    self.dispatch_available().await;
                }
                _ = self.queue.wait_for_work() => {
                    self.dispatch_available().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match self.queue.release_active() {
            Ok(released) if released > 0 => {
                tracing::info!(released, "released reserved jobs on shutdown")
            }
            Ok(_) => {}
            Err(e) => tracing::error!("failed to release reserved jobs: {}", e),
        }
        tracing::info!("heavy-lane dispatcher stopped");
    }

    /// Reserve and dispatch jobs while the concurrency budget allows.
    async fn dispatch_available(&self) {
        while self.queue.counts().active < self.max_concurrent {
            let job = match self.queue.reserve() {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("reserve failed: {}", e);
                    break;
                }
            };
            if let Err(e) = self.dispatch_one(&job).await {
                tracing::error!(job_id = %job.id, "dispatch error: {}", e);
            }
        }
    }

    async fn dispatch_one(&self, job: &ProcessingJob) -> Result<()> {
        // Every delivery is an attempt the document remembers.
        if let Err(e) = self.state_machine.begin_processing(job.document_id, true) {
            tracing::warn!(job_id = %job.id, document_id = %job.document_id,
                "cannot move document to PROCESSING: {}", e);
            self.queue
                .fail(job.id, JobError::new("STATE_CONFLICT", e.to_string()), true)?;
            return Ok(());
        }

        tracing::info!(
            job_id = %job.id,
            document_id = %job.document_id,
            attempt = job.attempts_made,
            format = %job.format,
            "dispatching job to converter"
        );

        if let Err(e) = self.converter.dispatch(job).await {
            // The converter never saw the job; this is a queue-level
            // transient failure and goes through the backoff policy.
            tracing::warn!(job_id = %job.id, "converter dispatch failed: {}", e);
            let failed = self
                .queue
                .fail(job.id, JobError::new("DISPATCH_ERROR", e.to_string()), false)?;
            if failed.state == crate::types::job::JobState::Failed {
                // Budget spent without a single successful hand-off.
                self.state_machine.mark_failed(
                    job.document_id,
                    crate::types::job::fail_codes::with_detail(
                        crate::types::job::fail_codes::PROCESSING_ERROR,
                        "converter unreachable",
                    ),
                )?;
            }
        }

        Ok(())
    }
}
