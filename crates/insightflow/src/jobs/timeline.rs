use crate::jobs::error_codes;
use crate::jobs::model::{JobSnapshot, JobStatus};
use crate::jobs::{AttemptsRepo, JobsRepo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct JobTimeline {
    pub job: JobSnapshot,
    pub requester: String,
    pub priority: i64,

    pub next_run_at: Option<DateTime<Utc>>,
    pub last_worker_id: Option<String>,
    pub last_error: Option<LastError>,

    pub attempts: Vec<TimelineAttempt>,
}

#[derive(Debug, Serialize)]
pub struct TimelineAttempt {
    pub attempt_no: i32,
    pub status: String,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i64>,
    pub suggested_action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LastError {
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

pub async fn build_timeline(
    jobs: &JobsRepo,
    attempts: &AttemptsRepo,
    job_id: Uuid,
) -> anyhow::Result<Option<JobTimeline>> {
    let job = match jobs.get_job(job_id).await? {
        Some(j) => j,
        None => return Ok(None),
    };

    let raw_attempts = attempts.list_attempts_for_job(job_id).await?;

    let last_worker_id = raw_attempts.last().map(|a| a.worker_id.clone());
    let last_error = raw_attempts
        .iter()
        .rev()
        .find(|a| a.error_code.is_some())
        .map(|a| LastError {
            error_code: a.error_code.clone(),
            error_message: a.error_message.clone(),
        });

    let next_run_at = match job.status {
        JobStatus::Queued | JobStatus::Retrying => Some(job.run_at),
        _ => None,
    };

    let attempts_out = raw_attempts
        .into_iter()
        .map(|a| TimelineAttempt {
            suggested_action: a
                .error_code
                .as_deref()
                .map(|code| error_codes::suggested_action(code).to_string()),
            attempt_no: a.attempt_no,
            status: a.status,
            worker_id: a.worker_id,
            started_at: a.started_at,
            finished_at: a.finished_at,
            error_code: a.error_code,
            error_message: a.error_message,
            latency_ms: a.latency_ms,
        })
        .collect();

    Ok(Some(JobTimeline {
        job: JobSnapshot::from(&job),
        requester: job.requester,
        priority: job.priority,
        next_run_at,
        last_worker_id,
        last_error,
        attempts: attempts_out,
    }))
}
