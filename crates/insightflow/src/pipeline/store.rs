use crate::jobs::model::ExtractionJob;
use crate::pipeline::fetch::{ContentItem, RecencyWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

// Keeps each IN (...) list well under SQLite's bound-parameter limit.
const SEEN_CHUNK: usize = 500;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunCounts {
    pub fetched: usize,
    pub stale: usize,
    pub seen: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExtractionResult {
    pub id: String,
    pub job_id: Uuid,
    pub canonical_key: String,
    pub window_days: i64,
    pub fetched_count: i64,
    pub stale_count: i64,
    pub seen_count: i64,
    pub duplicate_count: i64,
    pub persisted_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ExtractedItem {
    pub canonical_key: String,
    pub content_id: String,
    pub job_id: Uuid,
    pub result_ref: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
    pub source_url: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ContentRepo {
    pool: SqlitePool,
}

impl ContentRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Which of `ids` were already extracted for this topic by another job.
    /// Items an earlier attempt of `job_id` wrote do not count.
    pub async fn seen_ids(
        &self,
        canonical_key: &str,
        job_id: Uuid,
        ids: &[&str],
    ) -> anyhow::Result<HashSet<String>> {
        let mut seen = HashSet::new();

        for chunk in ids.chunks(SEEN_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT content_id FROM extracted_items WHERE canonical_key = ",
            );
            qb.push_bind(canonical_key);
            qb.push(" AND job_id <> ");
            qb.push_bind(job_id);
            qb.push(" AND content_id IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            let rows: Vec<String> = qb
                .build_query_scalar()
                .fetch_all(&self.pool)
                .await?;
            seen.extend(rows);
        }

        Ok(seen)
    }

    /// Bodies other jobs extracted for this topic, published after `since`.
    pub async fn recent_bodies(
        &self,
        canonical_key: &str,
        job_id: Uuid,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT body
            FROM extracted_items
            WHERE canonical_key = ?
              AND job_id <> ?
              AND published_at >= ?
            ORDER BY published_at ASC
            "#,
        )
        .bind(canonical_key)
        .bind(job_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Write the run record and its surviving items in one transaction.
    /// Items an earlier attempt of the same job left under an unreported
    /// result move to this one. Returns the result reference (the run
    /// record's id) and how many items it now holds.
    pub async fn persist(
        &self,
        job: &ExtractionJob,
        window: RecencyWindow,
        items: &[ContentItem],
        counts: RunCounts,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(String, usize)> {
        let result_ref = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO extraction_results (
                id, job_id, canonical_key, window_days,
                fetched_count, stale_count, seen_count, duplicate_count, persisted_count,
                created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&result_ref)
        .bind(job.id)
        .bind(&job.canonical_key)
        .bind(i64::from(window.days))
        .bind(counts.fetched as i64)
        .bind(counts.stale as i64)
        .bind(counts.seen as i64)
        .bind(counts.duplicates as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO extracted_items (
                    canonical_key, content_id, job_id, result_ref,
                    published_at, body, source_url, extracted_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (canonical_key, content_id) DO NOTHING
                "#,
            )
            .bind(&job.canonical_key)
            .bind(&item.id)
            .bind(job.id)
            .bind(&result_ref)
            .bind(item.published_at)
            .bind(&item.text)
            .bind(&item.source_url)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE extracted_items SET result_ref = ? WHERE job_id = ? AND result_ref <> ?",
        )
        .bind(&result_ref)
        .bind(job.id)
        .bind(&result_ref)
        .execute(&mut *tx)
        .await?;

        let persisted = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM extracted_items WHERE result_ref = ?",
        )
        .bind(&result_ref)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE extraction_results SET persisted_count = ? WHERE id = ?")
            .bind(persisted)
            .bind(&result_ref)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((result_ref, persisted as usize))
    }

    pub async fn get_result(&self, result_ref: &str) -> anyhow::Result<Option<ExtractionResult>> {
        let row = sqlx::query_as::<_, ExtractionResult>(
            "SELECT * FROM extraction_results WHERE id = ?",
        )
        .bind(result_ref)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn items_for_result(&self, result_ref: &str) -> anyhow::Result<Vec<ExtractedItem>> {
        let rows = sqlx::query_as::<_, ExtractedItem>(
            r#"
            SELECT *
            FROM extracted_items
            WHERE result_ref = ?
            ORDER BY published_at ASC, content_id ASC
            "#,
        )
        .bind(result_ref)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_items(&self, canonical_key: &str) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM extracted_items WHERE canonical_key = ?",
        )
        .bind(canonical_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}
