use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Debug, Default, Serialize)]
pub struct Metrics {
    pub at: DateTime<Utc>,

    pub queued: i64,
    pub running: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,

    // last 60s window, from the attempt log
    pub succeeded_last_60s: i64,
    pub failed_last_60s: i64,
    pub mean_latency_ms: f64,
}

#[derive(Clone)]
pub struct MetricsRepo {
    pool: SqlitePool,
}

impl MetricsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn snapshot(&self) -> anyhow::Result<Metrics> {
        let now = Utc::now();
        let mut m = Metrics {
            at: now,
            ..Metrics::default()
        };

        let counts = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM extraction_jobs
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (status, n) in counts {
            match status.as_str() {
                "queued" => m.queued = n,
                "running" => m.running = n,
                "retrying" => m.retrying = n,
                "completed" => m.completed = n,
                "failed" => m.failed = n,
                _ => {}
            }
        }

        let (succeeded, failed, mean_latency_ms) = sqlx::query_as::<_, (i64, i64, f64)>(
            r#"
            SELECT
              COALESCE(SUM(CASE WHEN status = 'succeeded' THEN 1 ELSE 0 END), 0),
              COALESCE(SUM(CASE WHEN status IN ('failed', 'interrupted') THEN 1 ELSE 0 END), 0),
              COALESCE(AVG(latency_ms), 0.0)
            FROM job_attempts
            WHERE finished_at IS NOT NULL
              AND finished_at >= ?
            "#,
        )
        .bind(now - Duration::seconds(60))
        .fetch_one(&self.pool)
        .await?;

        m.succeeded_last_60s = succeeded;
        m.failed_last_60s = failed;
        m.mean_latency_ms = mean_latency_ms;

        Ok(m)
    }
}
