use crate::jobs::attempts::{self, AttemptFinish, AttemptStatus};
use crate::jobs::model::{ExtractionJob, JobStatus, NewJob};
use crate::topics::repo as topics;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Outcome of inserting a job under the in-flight unique index.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(ExtractionJob),
    /// Another writer got there first; this is its in-flight job.
    Existing(ExtractionJob),
}

/// How a running job leaves the running state after a failure.
#[derive(Debug, Clone)]
pub enum FailureTransition {
    Retry { run_at: DateTime<Utc> },
    Fail,
}

#[derive(Debug, Clone)]
pub struct FailureRecord<'a> {
    pub attempts: i32,
    pub error_code: &'a str,
    pub error_message: &'a str,
    pub attempt_status: AttemptStatus,
    pub transition: FailureTransition,
}

#[derive(Clone)]
pub struct JobsRepo {
    pool: SqlitePool,
}

impl JobsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Admission
    // ----------------------------

    /// Registers the topic (and follower, if any) and inserts a queued job in
    /// one transaction.
    pub async fn insert(
        &self,
        job: &NewJob,
        follower: Option<&str>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        topics::register_topic(&mut tx, &job.canonical_key, &job.topic, now).await?;
        if let Some(requester) = follower {
            topics::add_follower(&mut tx, &job.canonical_key, requester, now).await?;
        }

        let inserted = sqlx::query_as::<_, ExtractionJob>(
            r#"
            INSERT INTO extraction_jobs (
                id, topic, canonical_key, requester, priority, status,
                attempts, max_attempts, run_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&job.topic)
        .bind(&job.canonical_key)
        .bind(job.requester.as_str())
        .bind(job.priority)
        .bind(JobStatus::Queued.as_str())
        .bind(job.max_attempts)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(row) => {
                tx.commit().await?;
                Ok(InsertOutcome::Inserted(row))
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                // The follower row still belongs to the in-flight job's topic.
                tx.commit().await?;
                let existing = self
                    .in_flight_for_key(&job.canonical_key)
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "in-flight conflict for {} but no in-flight row found",
                            job.canonical_key
                        )
                    })?;
                Ok(InsertOutcome::Existing(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<ExtractionJob>> {
        let job = sqlx::query_as::<_, ExtractionJob>("SELECT * FROM extraction_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    pub async fn latest_for_key(&self, canonical_key: &str) -> anyhow::Result<Option<ExtractionJob>> {
        let job = sqlx::query_as::<_, ExtractionJob>(
            r#"
            SELECT *
            FROM extraction_jobs
            WHERE canonical_key = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(canonical_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn in_flight_for_key(
        &self,
        canonical_key: &str,
    ) -> anyhow::Result<Option<ExtractionJob>> {
        let job = sqlx::query_as::<_, ExtractionJob>(
            r#"
            SELECT *
            FROM extraction_jobs
            WHERE canonical_key = ?
              AND status IN ('queued', 'running', 'retrying')
            LIMIT 1
            "#,
        )
        .bind(canonical_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// Every in-flight job in creation order; the queue index is rebuilt from this.
    pub async fn load_in_flight(&self) -> anyhow::Result<Vec<ExtractionJob>> {
        let rows = sqlx::query_as::<_, ExtractionJob>(
            r#"
            SELECT *
            FROM extraction_jobs
            WHERE status IN ('queued', 'running', 'retrying')
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_running(&self) -> anyhow::Result<Vec<ExtractionJob>> {
        let rows = sqlx::query_as::<_, ExtractionJob>(
            r#"
            SELECT *
            FROM extraction_jobs
            WHERE status = 'running'
            ORDER BY started_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_stale_running(
        &self,
        started_before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ExtractionJob>> {
        let rows = sqlx::query_as::<_, ExtractionJob>(
            r#"
            SELECT *
            FROM extraction_jobs
            WHERE status = 'running'
              AND started_at < ?
            ORDER BY started_at ASC
            "#,
        )
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_jobs(&self) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM extraction_jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    // ----------------------------
    // Transitions
    // ----------------------------

    /// queued/retrying -> running under a fresh claim, plus the attempt row.
    /// Returns None if the row is no longer dispatchable.
    pub async fn claim(
        &self,
        job_id: Uuid,
        claim_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<ExtractionJob>> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, ExtractionJob>(
            r#"
            UPDATE extraction_jobs
            SET status = 'running',
                claim_id = ?,
                started_at = ?,
                error = NULL,
                updated_at = ?
            WHERE id = ?
              AND (status = 'queued' OR (status = 'retrying' AND run_at <= ?))
            RETURNING *
            "#,
        )
        .bind(claim_id)
        .bind(now)
        .bind(now)
        .bind(job_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        attempts::start_attempt(&mut tx, job_id, claim_id, worker_id, now).await?;
        tx.commit().await?;

        Ok(Some(job))
    }

    /// running -> completed. False if the claim no longer holds the row.
    pub async fn complete(
        &self,
        job: &ExtractionJob,
        claim_id: Uuid,
        result_ref: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'completed',
                result_ref = ?,
                error = NULL,
                updated_at = ?
            WHERE id = ?
              AND status = 'running'
              AND claim_id = ?
            "#,
        )
        .bind(result_ref)
        .bind(now)
        .bind(job.id)
        .bind(claim_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        attempts::finish_attempt(
            &mut tx,
            job.id,
            claim_id,
            AttemptFinish {
                status: AttemptStatus::Succeeded,
                error_code: None,
                error_message: None,
                latency_ms: latency_ms(job.started_at, now),
            },
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(true)
    }

    /// running -> retrying or failed. False if the claim no longer holds the row.
    pub async fn record_failure(
        &self,
        job: &ExtractionJob,
        claim_id: Uuid,
        failure: &FailureRecord<'_>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let error = format!("{}: {}", failure.error_code, failure.error_message);
        let (status, run_at) = match &failure.transition {
            FailureTransition::Retry { run_at } => (JobStatus::Retrying, *run_at),
            FailureTransition::Fail => (JobStatus::Failed, job.run_at),
        };

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = ?,
                attempts = ?,
                run_at = ?,
                error = ?,
                updated_at = ?
            WHERE id = ?
              AND status = 'running'
              AND claim_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(failure.attempts)
        .bind(run_at)
        .bind(&error)
        .bind(now)
        .bind(job.id)
        .bind(claim_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        attempts::finish_attempt(
            &mut tx,
            job.id,
            claim_id,
            AttemptFinish {
                status: failure.attempt_status,
                error_code: Some(failure.error_code),
                error_message: Some(failure.error_message),
                latency_ms: latency_ms(job.started_at, now),
            },
            now,
        )
        .await?;
        tx.commit().await?;

        Ok(true)
    }

    /// retrying -> queued once the backoff has elapsed.
    pub async fn promote_due(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let n = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'queued',
                error = NULL,
                updated_at = ?
            WHERE status = 'retrying'
              AND run_at <= ?
            "#,
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n)
    }
}

fn latency_ms(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    started_at.map(|s| (now - s).num_milliseconds().max(0))
}
