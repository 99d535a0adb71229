use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use crate::error::QueueError;

/// Requester id reserved for scheduler-originated jobs.
pub const SYSTEM_REQUESTER: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retrying => "retrying",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "retrying" => Some(JobStatus::Retrying),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Running | JobStatus::Retrying
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requester {
    System,
    User(String),
}

impl Requester {
    pub fn user(id: impl Into<String>) -> Result<Self, QueueError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(QueueError::InvalidRequester("requester id is empty".into()));
        }
        if trimmed == SYSTEM_REQUESTER {
            return Err(QueueError::InvalidRequester(format!(
                "'{SYSTEM_REQUESTER}' is reserved for scheduled refreshes"
            )));
        }
        Ok(Requester::User(trimmed.to_string()))
    }

    pub fn from_stored(s: &str) -> Self {
        if s == SYSTEM_REQUESTER {
            Requester::System
        } else {
            Requester::User(s.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Requester::System => SYSTEM_REQUESTER,
            Requester::User(id) => id,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Requester::System)
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub id: Uuid,
    pub topic: String,
    pub canonical_key: String,
    pub requester: String,
    pub priority: i64,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,

    /// Earliest dispatch time; pushed forward by retry backoff.
    pub run_at: DateTime<Utc>,

    pub claim_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
    pub result_ref: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionJob {
    pub fn requester(&self) -> Requester {
        Requester::from_stored(&self.requester)
    }
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for ExtractionJob {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = JobStatus::parse(&status).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: format!("unknown job status {status:?}").into(),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            canonical_key: row.try_get("canonical_key")?,
            requester: row.try_get("requester")?,
            priority: row.try_get("priority")?,
            status,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            run_at: row.try_get("run_at")?,
            claim_id: row.try_get("claim_id")?,
            started_at: row.try_get("started_at")?,
            error: row.try_get("error")?,
            result_ref: row.try_get("result_ref")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub topic: String,
    pub canonical_key: String,
    pub requester: Requester,
    pub priority: i64,
    pub max_attempts: i32,
}

/// Read-only view handed to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub topic: String,
    pub canonical_key: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ExtractionJob> for JobSnapshot {
    fn from(job: &ExtractionJob) -> Self {
        Self {
            job_id: job.id,
            topic: job.topic.clone(),
            canonical_key: job.canonical_key.clone(),
            status: job.status,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            error: job.error.clone(),
            result_ref: job.result_ref.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Result of an admission: the job the request ended up on.
#[derive(Debug, Clone, Serialize)]
pub struct FollowReceipt {
    pub job_id: Uuid,
    pub canonical_key: String,
    pub status: JobStatus,
    /// True when the request joined a job that was already in flight.
    pub attached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    pub queue_size: usize,
    pub workers_active: usize,
    pub jobs_running: usize,
}

/// Lookup key for `status`: a job id, or a topic resolved to its latest job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRef {
    Id(Uuid),
    Topic(String),
}

impl JobRef {
    pub fn parse(s: &str) -> Self {
        match Uuid::parse_str(s.trim()) {
            Ok(id) => JobRef::Id(id),
            Err(_) => JobRef::Topic(s.to_string()),
        }
    }
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobRef::Id(id) => write!(f, "job {id}"),
            JobRef::Topic(topic) => write!(f, "topic '{}'", topic.trim()),
        }
    }
}
