use crate::topics::RejectionReason;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the extraction queue to its callers.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid topic: {0}")]
    Validation(#[from] RejectionReason),

    #[error("queue full: {outstanding} outstanding jobs (limit {limit}), retry later")]
    QueueFull { outstanding: usize, limit: usize },

    #[error("invalid requester: {0}")]
    InvalidRequester(String),

    #[error("no job found for {0}")]
    NotFound(String),

    #[error("job {job_id} is no longer held by claim {claim_id}")]
    StaleClaim { job_id: Uuid, claim_id: Uuid },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl QueueError {
    /// Whether the caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::Store(_))
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.into())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
