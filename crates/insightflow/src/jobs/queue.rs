//! The extraction queue: admission, dispatch, and every job-state write.
//!
//! All transitions go through one async mutex that guards the in-memory index
//! and is held across the store write, so a transition is committed before the
//! next one for the same key or job can start. Status and health reads go
//! straight to the store or take the lock briefly.

use crate::error::{QueueError, QueueResult};
use crate::jobs::admission::{AdmissionConfig, AdmissionGuard};
use crate::jobs::attempts::AttemptStatus;
use crate::jobs::error_codes::ErrorCode;
use crate::jobs::index::QueueIndex;
use crate::jobs::maintenance::{stale_cutoff, MaintenanceReport};
use crate::jobs::model::{
    ExtractionJob, FollowReceipt, JobRef, JobSnapshot, JobStatus, NewJob, QueueHealth, Requester,
};
use crate::jobs::repo::{FailureRecord, FailureTransition, InsertOutcome, JobsRepo};
use crate::jobs::retry::{next_delay_seconds, RetryConfig};
use crate::topics::{normalize, TopicValidator, TopicsRepo};
use chrono::{Duration, Utc};
use rand::{rngs::StdRng, SeedableRng};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempt ceiling stamped onto each new job.
    pub max_attempts: i32,
    /// Priority for user follows. Higher dispatches first.
    pub user_priority: i64,
    /// A running job older than this is treated as orphaned by `maintain`.
    pub stale_after: Duration,
    pub retry: RetryConfig,
    pub admission: AdmissionConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            user_priority: 1,
            stale_after: Duration::minutes(15),
            retry: RetryConfig::default(),
            admission: AdmissionConfig::default(),
        }
    }
}

pub struct ExtractionQueue {
    jobs: JobsRepo,
    topics: TopicsRepo,
    validator: TopicValidator,
    admission: AdmissionGuard,
    cfg: QueueConfig,
    index: Mutex<QueueIndex>,
    work_ready: Notify,
    workers_active: AtomicUsize,
}

impl ExtractionQueue {
    /// Load the in-flight rows into a fresh index. Does not touch `running`
    /// rows; call [`recover_orphans`](Self::recover_orphans) for that once it is
    /// known no other process owns them.
    pub async fn open(
        pool: SqlitePool,
        cfg: QueueConfig,
        validator: TopicValidator,
    ) -> QueueResult<Self> {
        let jobs = JobsRepo::new(pool.clone());
        let mut index = QueueIndex::new();
        index.rebuild(jobs.load_in_flight().await?);

        tracing::debug!(
            outstanding = index.outstanding(),
            running = index.running(),
            "queue index loaded"
        );

        Ok(Self {
            jobs,
            topics: TopicsRepo::new(pool),
            validator,
            admission: AdmissionGuard::new(cfg.admission.clone()),
            cfg,
            index: Mutex::new(index),
            work_ready: Notify::new(),
            workers_active: AtomicUsize::new(0),
        })
    }

    pub fn jobs(&self) -> &JobsRepo {
        &self.jobs
    }

    pub fn topics(&self) -> &TopicsRepo {
        &self.topics
    }

    // ----------------------------
    // Admission
    // ----------------------------

    pub async fn enqueue(
        &self,
        topic: &str,
        requester: &Requester,
        priority: i64,
    ) -> QueueResult<Uuid> {
        self.submit(topic, requester, priority)
            .await
            .map(|r| r.job_id)
    }

    /// `enqueue`, reporting whether the request attached to an in-flight job.
    pub async fn submit(
        &self,
        topic: &str,
        requester: &Requester,
        priority: i64,
    ) -> QueueResult<FollowReceipt> {
        self.admit(topic, requester, priority, false).await
    }

    /// Record `requester` as a follower and enqueue at the user priority.
    pub async fn follow(&self, topic: &str, requester: &Requester) -> QueueResult<FollowReceipt> {
        self.admit(topic, requester, self.cfg.user_priority, true)
            .await
    }

    async fn admit(
        &self,
        raw_topic: &str,
        requester: &Requester,
        priority: i64,
        record_follower: bool,
    ) -> QueueResult<FollowReceipt> {
        let mut index = self.index.lock().await;

        let registered = self.topics.list_keys().await?;
        let validated = self.validator.validate(raw_topic, &registered)?;
        let key = validated.canonical_key;
        let display = validated.display;
        if let Some(c) = &validated.collapsed {
            tracing::debug!(
                requested = %c.requested,
                canonical_key = %key,
                score = c.score,
                "near-duplicate topic collapsed"
            );
        }

        let now = Utc::now();
        let follower = (record_follower && !requester.is_system()).then(|| requester.as_str());

        // Attaching adds no row, so it is allowed even when the queue is full.
        if let Some((job_id, status)) = index.in_flight(&key) {
            if let Some(r) = follower {
                self.topics.add_follower(&key, r, now).await?;
            }
            tracing::info!(%job_id, canonical_key = %key, requester = requester.as_str(), "attached to in-flight job");
            return Ok(FollowReceipt {
                job_id,
                canonical_key: key,
                status,
                attached: true,
            });
        }

        self.admission.check(index.outstanding())?;

        let new_job = NewJob {
            topic: display,
            canonical_key: key.clone(),
            requester: requester.clone(),
            priority,
            max_attempts: self.cfg.max_attempts,
        };

        match self.jobs.insert(&new_job, follower, now).await? {
            InsertOutcome::Inserted(job) => {
                index.track(&job);
                self.work_ready.notify_one();
                tracing::info!(
                    job_id = %job.id,
                    canonical_key = %key,
                    priority,
                    requester = requester.as_str(),
                    "job queued"
                );
                Ok(FollowReceipt {
                    job_id: job.id,
                    canonical_key: key,
                    status: job.status,
                    attached: false,
                })
            }
            InsertOutcome::Existing(job) => {
                // Another process inserted it; our index is behind.
                index.rebuild(self.jobs.load_in_flight().await?);
                tracing::info!(job_id = %job.id, canonical_key = %key, "attached to job from another writer");
                Ok(FollowReceipt {
                    job_id: job.id,
                    canonical_key: key,
                    status: job.status,
                    attached: true,
                })
            }
        }
    }

    // ----------------------------
    // Dispatch and reports
    // ----------------------------

    /// Claim the best eligible job for `worker_id`, or None if nothing is ready.
    pub async fn dispatch(&self, worker_id: &str) -> QueueResult<Option<ExtractionJob>> {
        let mut index = self.index.lock().await;

        // Second pass only after a resync with the store.
        for _ in 0..2 {
            let now = Utc::now();
            let Some(job_id) = index.peek(now) else {
                return Ok(None);
            };

            let claim_id = Uuid::new_v4();
            match self.jobs.claim(job_id, claim_id, worker_id, now).await? {
                Some(job) => {
                    index.mark_running(job_id);
                    tracing::info!(
                        %job_id,
                        worker_id,
                        canonical_key = %job.canonical_key,
                        attempts = job.attempts,
                        "job dispatched"
                    );
                    return Ok(Some(job));
                }
                None => {
                    tracing::warn!(%job_id, "index out of sync with store; rebuilding");
                    index.rebuild(self.jobs.load_in_flight().await?);
                }
            }
        }

        Ok(None)
    }

    pub async fn report_success(&self, job: &ExtractionJob, result_ref: &str) -> QueueResult<()> {
        let claim_id = claim_of(job)?;
        let mut index = self.index.lock().await;

        if !self.jobs.complete(job, claim_id, result_ref, Utc::now()).await? {
            return Err(QueueError::StaleClaim {
                job_id: job.id,
                claim_id,
            });
        }
        index.finish(job.id);

        tracing::info!(job_id = %job.id, canonical_key = %job.canonical_key, result_ref, "job completed");
        Ok(())
    }

    /// Consume one attempt. Retryable failures under the ceiling go to
    /// `retrying` with backoff; everything else is terminal `failed`.
    pub async fn report_failure(
        &self,
        job: &ExtractionJob,
        code: ErrorCode,
        message: &str,
        retryable: bool,
    ) -> QueueResult<JobStatus> {
        let claim_id = claim_of(job)?;
        let mut index = self.index.lock().await;
        self.fail_locked(
            &mut index,
            job,
            claim_id,
            code,
            message,
            retryable,
            AttemptStatus::Failed,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail_locked(
        &self,
        index: &mut QueueIndex,
        job: &ExtractionJob,
        claim_id: Uuid,
        code: ErrorCode,
        message: &str,
        retryable: bool,
        attempt_status: AttemptStatus,
    ) -> QueueResult<JobStatus> {
        let now = Utc::now();
        let attempts = job.attempts + 1;

        let transition = if retryable && attempts < job.max_attempts {
            let mut rng = StdRng::from_entropy();
            let delay_secs = next_delay_seconds(attempts, &self.cfg.retry, &mut rng);
            FailureTransition::Retry {
                run_at: now + Duration::seconds(delay_secs),
            }
        } else {
            FailureTransition::Fail
        };

        let record = FailureRecord {
            attempts,
            error_code: code.as_str(),
            error_message: message,
            attempt_status,
            transition: transition.clone(),
        };
        if !self.jobs.record_failure(job, claim_id, &record, now).await? {
            return Err(QueueError::StaleClaim {
                job_id: job.id,
                claim_id,
            });
        }

        match transition {
            FailureTransition::Retry { run_at } => {
                index.mark_retrying(job.id, run_at);
                tracing::warn!(
                    job_id = %job.id,
                    canonical_key = %job.canonical_key,
                    attempts,
                    max_attempts = job.max_attempts,
                    code = code.as_str(),
                    %run_at,
                    "job failed; retry scheduled"
                );
                Ok(JobStatus::Retrying)
            }
            FailureTransition::Fail => {
                index.finish(job.id);
                tracing::error!(
                    job_id = %job.id,
                    canonical_key = %job.canonical_key,
                    attempts,
                    max_attempts = job.max_attempts,
                    code = code.as_str(),
                    error = message,
                    "job failed permanently"
                );
                Ok(JobStatus::Failed)
            }
        }
    }

    // ----------------------------
    // Recovery and maintenance
    // ----------------------------

    /// Treat every `running` row as orphaned by a dead process: one retryable
    /// failure each. Only safe when no live worker owns those rows.
    pub async fn recover_orphans(&self) -> QueueResult<usize> {
        let mut index = self.index.lock().await;
        let running = self.jobs.list_running().await?;
        let recovered = self
            .interrupt(
                &mut index,
                running,
                ErrorCode::Orphaned,
                "worker exited while the job was running",
            )
            .await?;

        index.rebuild(self.jobs.load_in_flight().await?);
        if recovered > 0 {
            tracing::warn!(recovered, "orphaned jobs recovered");
            self.work_ready.notify_waiters();
        }
        Ok(recovered)
    }

    /// Reap stale running jobs, promote retries whose backoff elapsed, and
    /// resync the index with the store.
    pub async fn maintain(&self) -> QueueResult<MaintenanceReport> {
        let mut index = self.index.lock().await;
        let now = Utc::now();

        let stale = self
            .jobs
            .list_stale_running(stale_cutoff(now, self.cfg.stale_after))
            .await?;
        let stale_reaped = self
            .interrupt(
                &mut index,
                stale,
                ErrorCode::Stale,
                "job exceeded the running time limit",
            )
            .await?;

        let promoted = self.jobs.promote_due(now).await?;
        index.rebuild(self.jobs.load_in_flight().await?);
        self.work_ready.notify_waiters();

        Ok(MaintenanceReport {
            stale_reaped,
            promoted,
            outstanding: index.outstanding(),
        })
    }

    async fn interrupt(
        &self,
        index: &mut QueueIndex,
        jobs: Vec<ExtractionJob>,
        code: ErrorCode,
        message: &str,
    ) -> QueueResult<usize> {
        let mut n = 0;
        for job in jobs {
            let Some(claim_id) = job.claim_id else {
                tracing::warn!(job_id = %job.id, "running job without a claim; skipped");
                continue;
            };
            match self
                .fail_locked(
                    index,
                    &job,
                    claim_id,
                    code,
                    message,
                    true,
                    AttemptStatus::Interrupted,
                )
                .await
            {
                Ok(_) => n += 1,
                Err(QueueError::StaleClaim { .. }) => {
                    tracing::debug!(job_id = %job.id, "job moved on before it could be reaped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }

    // ----------------------------
    // Reads
    // ----------------------------

    /// Look a job up by id, or by topic (its most recent job).
    pub async fn status(&self, lookup: &JobRef) -> QueueResult<JobSnapshot> {
        let job = match lookup {
            JobRef::Id(id) => self.jobs.get_job(*id).await?,
            JobRef::Topic(raw) => {
                let normalized = normalize(raw);
                match self.jobs.latest_for_key(&normalized).await? {
                    Some(job) => Some(job),
                    None => {
                        let registered = self.topics.list_keys().await?;
                        let (key, collapsed) = self.validator.resolve(normalized, &registered);
                        match collapsed {
                            Some(_) => self.jobs.latest_for_key(&key).await?,
                            None => None,
                        }
                    }
                }
            }
        };

        job.map(|j| JobSnapshot::from(&j))
            .ok_or_else(|| QueueError::NotFound(lookup.to_string()))
    }

    pub async fn health(&self) -> QueueHealth {
        let index = self.index.lock().await;
        QueueHealth {
            queue_size: index.queue_size(),
            workers_active: self.workers_active.load(Ordering::SeqCst),
            jobs_running: index.running(),
        }
    }

    // ----------------------------
    // Worker plumbing
    // ----------------------------

    /// Wait until new work is signalled or `idle` elapses.
    pub async fn wait_for_work(&self, idle: std::time::Duration) {
        let _ = tokio::time::timeout(idle, self.work_ready.notified()).await;
    }

    pub(crate) fn worker_online(self: &Arc<Self>) -> ActiveWorker {
        self.workers_active.fetch_add(1, Ordering::SeqCst);
        ActiveWorker {
            queue: Arc::clone(self),
        }
    }
}

/// Counts toward `workers_active` until dropped.
pub(crate) struct ActiveWorker {
    queue: Arc<ExtractionQueue>,
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.queue.workers_active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn claim_of(job: &ExtractionJob) -> QueueResult<Uuid> {
    job.claim_id.ok_or(QueueError::StaleClaim {
        job_id: job.id,
        claim_id: Uuid::nil(),
    })
}
