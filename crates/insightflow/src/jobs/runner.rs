use crate::error::{QueueError, QueueResult};
use crate::jobs::model::{ExtractionJob, JobStatus};
use crate::jobs::queue::ExtractionQueue;
use crate::pipeline::ExtractionPipeline;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Backoff for re-attempting a status write that hit a store error.
#[derive(Debug, Clone)]
pub struct WriteRetryConfig {
    pub base: Duration,
    pub max: Duration,
}

impl Default for WriteRetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Retrying,
    Failed,
    /// The status write never landed (claim lost, or shutdown mid-retry).
    /// The row stays as the store has it and recovery takes over.
    Abandoned,
}

impl From<JobStatus> for RunOutcome {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => RunOutcome::Completed,
            JobStatus::Failed => RunOutcome::Failed,
            _ => RunOutcome::Retrying,
        }
    }
}

/// Executes one dispatched job through the pipeline and reports the result.
#[derive(Clone)]
pub struct JobRunner {
    queue: Arc<ExtractionQueue>,
    pipeline: Arc<ExtractionPipeline>,
    write_retry: WriteRetryConfig,
}

impl JobRunner {
    pub fn new(
        queue: Arc<ExtractionQueue>,
        pipeline: Arc<ExtractionPipeline>,
        write_retry: WriteRetryConfig,
    ) -> Self {
        Self {
            queue,
            pipeline,
            write_retry,
        }
    }

    pub async fn run(
        &self,
        job: &ExtractionJob,
        worker_id: &str,
        shutdown: &watch::Receiver<bool>,
    ) -> RunOutcome {
        let start = Instant::now();
        let result = self.pipeline.run(job).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(out) => {
                let written = self
                    .durably(job, shutdown, || {
                        self.queue.report_success(job, &out.result_ref)
                    })
                    .await;
                match written {
                    Some(()) => {
                        tracing::debug!(job_id = %job.id, worker_id, latency_ms, "run succeeded");
                        RunOutcome::Completed
                    }
                    None => RunOutcome::Abandoned,
                }
            }
            Err(err) => {
                let code = err.code();
                let message = err.to_string();
                let retryable = err.is_retryable();
                tracing::warn!(
                    job_id = %job.id,
                    worker_id,
                    latency_ms,
                    code = code.as_str(),
                    retryable,
                    error = %message,
                    "run failed"
                );

                let written = self
                    .durably(job, shutdown, || {
                        self.queue.report_failure(job, code, &message, retryable)
                    })
                    .await;
                written.map(RunOutcome::from).unwrap_or(RunOutcome::Abandoned)
            }
        }
    }

    /// Repeat a status write through store errors until it lands. Gives up on
    /// a lost claim, or on shutdown.
    async fn durably<T, F, Fut>(
        &self,
        job: &ExtractionJob,
        shutdown: &watch::Receiver<bool>,
        mut write: F,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueueResult<T>>,
    {
        let mut delay = self.write_retry.base;
        loop {
            match write().await {
                Ok(v) => return Some(v),
                Err(QueueError::StaleClaim { claim_id, .. }) => {
                    tracing::warn!(job_id = %job.id, %claim_id, "claim lost before report; result discarded");
                    return None;
                }
                Err(e) => {
                    if *shutdown.borrow() {
                        tracing::error!(
                            job_id = %job.id,
                            error = %e,
                            "status write failed during shutdown; job will be recovered as orphaned"
                        );
                        return None;
                    }
                    tracing::warn!(
                        job_id = %job.id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "status write failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.write_retry.max);
                }
            }
        }
    }
}
