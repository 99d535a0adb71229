use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of fetched content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Stable identifier from the source; "already seen" is an exact match on it.
    pub id: String,
    pub published_at: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub source_url: Option<String>,
}

/// Maximum age of content considered fresh for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecencyWindow {
    pub days: u32,
}

impl RecencyWindow {
    pub fn days(days: u32) -> Self {
        Self { days }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days))
    }
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("content source unavailable: {0}")]
    Unavailable(String),
    #[error("content source rate limited: {0}")]
    RateLimited(String),
    #[error("content source rejected the topic: {0}")]
    Rejected(String),
    #[error("content source returned malformed output: {0}")]
    Malformed(String),
}

/// The external content-extraction collaborator.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(
        &self,
        topic: &str,
        window: RecencyWindow,
    ) -> Result<Vec<ContentItem>, FetchError>;
}
