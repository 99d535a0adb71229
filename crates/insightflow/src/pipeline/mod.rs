//! Turns one extraction job into persisted results:
//! fetch within the recency window, drop already-seen items, collapse near
//! duplicates (within the batch and against what earlier runs kept), then
//! write everything in one transaction.

pub mod dedup;
pub mod fetch;
pub mod store;

pub use dedup::{collapse_near_duplicates, DedupOutcome};
pub use fetch::{ContentFetcher, ContentItem, FetchError, RecencyWindow};
pub use store::{ContentRepo, ExtractedItem, ExtractionResult, RunCounts};

use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::{ExtractionJob, Requester};
use crate::jobs::retry::{classify, ErrorClass};
use crate::similarity::Similarity;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Items scoring strictly above this against a kept item are collapsed.
    pub content_similarity_threshold: f64,
    pub follow_window: RecencyWindow,
    pub refresh_window: RecencyWindow,
    pub fetch_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            content_similarity_threshold: 0.7,
            follow_window: RecencyWindow::days(30),
            refresh_window: RecencyWindow::days(2),
            fetch_timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("fetch timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("malformed content: {0}")]
    MalformedContent(String),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Fetch(FetchError::Unavailable(_)) => ErrorCode::FetchUnavailable,
            PipelineError::Fetch(FetchError::RateLimited(_)) => ErrorCode::RateLimit,
            PipelineError::Fetch(FetchError::Rejected(_)) => ErrorCode::Rejected,
            PipelineError::Fetch(FetchError::Malformed(_)) => ErrorCode::MalformedContent,
            PipelineError::Timeout(_) => ErrorCode::Timeout,
            PipelineError::MalformedContent(_) => ErrorCode::MalformedContent,
            PipelineError::Store(_) => ErrorCode::Store,
        }
    }

    pub fn is_retryable(&self) -> bool {
        classify(self.code()) == ErrorClass::Retryable
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub result_ref: String,
    pub window: RecencyWindow,
    pub counts: RunCounts,
    pub persisted: usize,
}

pub struct ExtractionPipeline {
    fetcher: Arc<dyn ContentFetcher>,
    similarity: Arc<dyn Similarity>,
    store: ContentRepo,
    cfg: PipelineConfig,
}

impl ExtractionPipeline {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        similarity: Arc<dyn Similarity>,
        store: ContentRepo,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            similarity,
            store,
            cfg,
        }
    }

    /// Scheduled refreshes look back a short window; a fresh follow gets a
    /// longer backfill.
    pub fn window_for(&self, requester: &Requester) -> RecencyWindow {
        if requester.is_system() {
            self.cfg.refresh_window
        } else {
            self.cfg.follow_window
        }
    }

    pub async fn run(&self, job: &ExtractionJob) -> Result<PipelineOutcome, PipelineError> {
        let window = self.window_for(&job.requester());

        let fetched = tokio::time::timeout(
            self.cfg.fetch_timeout,
            self.fetcher.fetch(&job.topic, window),
        )
        .await
        .map_err(|_| PipelineError::Timeout(self.cfg.fetch_timeout))??;

        let now = Utc::now();
        let cutoff = window.cutoff(now);
        let mut counts = RunCounts {
            fetched: fetched.len(),
            ..RunCounts::default()
        };

        let mut fresh = Vec::with_capacity(fetched.len());
        let mut batch_ids = HashSet::new();
        for item in fetched {
            if item.id.trim().is_empty() {
                return Err(PipelineError::MalformedContent(
                    "content item without an id".into(),
                ));
            }
            if item.text.trim().is_empty() {
                return Err(PipelineError::MalformedContent(format!(
                    "content item {} has no text",
                    item.id
                )));
            }
            if item.published_at < cutoff {
                counts.stale += 1;
                continue;
            }
            if !batch_ids.insert(item.id.clone()) {
                counts.duplicates += 1;
                continue;
            }
            fresh.push(item);
        }

        let ids: Vec<&str> = fresh.iter().map(|i| i.id.as_str()).collect();
        let seen = self.store.seen_ids(&job.canonical_key, job.id, &ids).await?;
        let unseen: Vec<ContentItem> = fresh
            .into_iter()
            .filter(|i| !seen.contains(&i.id))
            .collect();
        counts.seen = seen.len();

        let prior = self
            .store
            .recent_bodies(&job.canonical_key, job.id, cutoff)
            .await?;
        let deduped = collapse_near_duplicates(
            unseen,
            &prior,
            self.similarity.as_ref(),
            self.cfg.content_similarity_threshold,
        );
        counts.duplicates += deduped.collapsed;

        let (result_ref, persisted) = self
            .store
            .persist(job, window, &deduped.kept, counts, now)
            .await?;

        tracing::info!(
            job_id = %job.id,
            canonical_key = %job.canonical_key,
            window_days = window.days,
            fetched = counts.fetched,
            stale = counts.stale,
            seen = counts.seen,
            duplicates = counts.duplicates,
            persisted,
            "extraction run persisted"
        );

        Ok(PipelineOutcome {
            result_ref,
            window,
            counts,
            persisted,
        })
    }
}
