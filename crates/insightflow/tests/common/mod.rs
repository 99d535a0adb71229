#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use insightflow::db;
use insightflow::jobs::repo::JobsRepo;
use insightflow::jobs::retry::RetryConfig;
use insightflow::jobs::{ExtractionQueue, JobRef, JobSnapshot, QueueConfig, Requester};
use insightflow::pipeline::{
    ContentFetcher, ContentItem, ContentRepo, ExtractionPipeline, FetchError, PipelineConfig,
    RecencyWindow,
};
use insightflow::similarity::{LexicalSimilarity, Similarity};
use insightflow::topics::{TopicValidator, ValidatorConfig};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// A throwaway database file. Keep the struct alive for the whole test; the
/// directory is removed on drop.
pub struct TestDb {
    _dir: TempDir,
    pub url: String,
    pub pool: SqlitePool,
}

impl TestDb {
    /// A second pool on the same file, as a restarted process would open it.
    pub async fn reopen(&self) -> SqlitePool {
        db::make_pool(&self.url).await.expect("reopen pool")
    }
}

pub async fn setup_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("insightflow.db").display());

    let pool = db::make_pool(&url).await.expect("open sqlite pool");
    db::run_migrations(&pool).await.expect("migrations failed");

    TestDb {
        _dir: dir,
        url,
        pool,
    }
}

/// Retries become eligible immediately and without jitter.
pub fn fast_retry_config() -> QueueConfig {
    QueueConfig {
        retry: RetryConfig {
            base_seconds: 0,
            max_seconds: 0,
            jitter_pct: 0.0,
        },
        ..QueueConfig::default()
    }
}

pub fn similarity() -> Arc<dyn Similarity> {
    Arc::new(LexicalSimilarity::new())
}

pub async fn open_queue(pool: &SqlitePool, cfg: QueueConfig) -> Arc<ExtractionQueue> {
    let validator = TopicValidator::new(ValidatorConfig::default(), similarity());
    Arc::new(
        ExtractionQueue::open(pool.clone(), cfg, validator)
            .await
            .expect("open queue"),
    )
}

pub fn user(id: &str) -> Requester {
    Requester::user(id).expect("valid requester")
}

pub fn item(id: &str, age_hours: i64, text: &str) -> ContentItem {
    ContentItem {
        id: id.into(),
        published_at: Utc::now() - ChronoDuration::hours(age_hours),
        text: text.into(),
        source_url: Some(format!("https://news.example/{id}")),
    }
}

pub async fn job_rows(pool: &SqlitePool) -> i64 {
    JobsRepo::new(pool.clone())
        .count_jobs()
        .await
        .expect("count jobs")
}

pub async fn snapshot(queue: &ExtractionQueue, id: Uuid) -> JobSnapshot {
    queue.status(&JobRef::Id(id)).await.expect("job exists")
}

/// Poll until `done` holds for the job or `within` elapses.
pub async fn wait_for(
    queue: &ExtractionQueue,
    id: Uuid,
    within: Duration,
    done: impl Fn(&JobSnapshot) -> bool,
) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let snap = snapshot(queue, id).await;
        if done(&snap) {
            return snap;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} still {} after {within:?}",
            snap.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Fetcher with scripted responses. Once the script runs out every call gets
/// `fallback`.
pub struct StubFetcher {
    script: Mutex<VecDeque<Result<Vec<ContentItem>, FetchError>>>,
    fallback: Result<Vec<ContentItem>, FetchError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, RecencyWindow)>>,
}

impl StubFetcher {
    pub fn returning(items: Vec<ContentItem>) -> Self {
        Self::with_fallback(Ok(items))
    }

    pub fn failing(err: FetchError) -> Self {
        Self::with_fallback(Err(err))
    }

    fn with_fallback(fallback: Result<Vec<ContentItem>, FetchError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// One response per call in order, then empty results.
    pub fn scripted(responses: Vec<Result<Vec<ContentItem>, FetchError>>) -> Self {
        let stub = Self::with_fallback(Ok(Vec::new()));
        *stub.script.lock().unwrap() = responses.into();
        stub
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, RecencyWindow)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentFetcher for StubFetcher {
    async fn fetch(
        &self,
        topic: &str,
        window: RecencyWindow,
    ) -> Result<Vec<ContentItem>, FetchError> {
        self.calls.lock().unwrap().push((topic.to_string(), window));
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn pipeline(
    pool: &SqlitePool,
    fetcher: Arc<StubFetcher>,
    cfg: PipelineConfig,
) -> Arc<ExtractionPipeline> {
    Arc::new(ExtractionPipeline::new(
        fetcher,
        similarity(),
        ContentRepo::new(pool.clone()),
        cfg,
    ))
}
