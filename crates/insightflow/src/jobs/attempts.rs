use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt_no: i32,
    pub claim_id: Uuid,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub status: String,

    pub error_code: Option<String>,
    pub error_message: Option<String>,

    pub latency_ms: Option<i64>,
    pub worker_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
    /// The worker never reported back (crash, kill, or stale run).
    Interrupted,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Running => "running",
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Interrupted => "interrupted",
        }
    }
}

#[derive(Clone)]
pub struct AttemptsRepo {
    pool: SqlitePool,
}

impl AttemptsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_attempts_for_job(&self, job_id: Uuid) -> anyhow::Result<Vec<JobAttempt>> {
        let rows = sqlx::query_as::<_, JobAttempt>(
            r#"
            SELECT *
            FROM job_attempts
            WHERE job_id = ?
            ORDER BY attempt_no ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Insert a "running" attempt; attempt_no counts up per job.
pub(crate) async fn start_attempt(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    claim_id: Uuid,
    worker_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<i32> {
    let attempt_no = sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO job_attempts (id, job_id, attempt_no, claim_id, worker_id, status, started_at)
        VALUES (
          ?1,
          ?2,
          COALESCE((SELECT MAX(attempt_no) FROM job_attempts WHERE job_id = ?2), 0) + 1,
          ?3,
          ?4,
          ?5,
          ?6
        )
        RETURNING attempt_no
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job_id)
    .bind(claim_id)
    .bind(worker_id)
    .bind(AttemptStatus::Running.as_str())
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(attempt_no)
}

pub(crate) struct AttemptFinish<'a> {
    pub status: AttemptStatus,
    pub error_code: Option<&'a str>,
    pub error_message: Option<&'a str>,
    pub latency_ms: Option<i64>,
}

pub(crate) async fn finish_attempt(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    claim_id: Uuid,
    finish: AttemptFinish<'_>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE job_attempts
        SET status = ?,
            finished_at = ?,
            latency_ms = ?,
            error_code = ?,
            error_message = ?
        WHERE job_id = ?
          AND claim_id = ?
          AND status = 'running'
        "#,
    )
    .bind(finish.status.as_str())
    .bind(now)
    .bind(finish.latency_ms)
    .bind(finish.error_code)
    .bind(finish.error_message)
    .bind(job_id)
    .bind(claim_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
