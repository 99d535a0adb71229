use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ActiveTopic {
    pub canonical_key: String,
    pub display_name: String,
    pub followers: i64,
}

#[derive(Clone)]
pub struct TopicsRepo {
    pool: SqlitePool,
}

impl TopicsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_keys(&self) -> anyhow::Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            r#"
            SELECT canonical_key
            FROM topics
            ORDER BY created_at ASC, canonical_key ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    /// Topics with at least `min_followers` followers, most followed first.
    pub async fn active_topics(
        &self,
        min_followers: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<ActiveTopic>> {
        let rows = sqlx::query_as::<_, ActiveTopic>(
            r#"
            SELECT
                t.canonical_key AS canonical_key,
                t.display_name AS display_name,
                COUNT(f.requester) AS followers
            FROM topics t
            LEFT JOIN topic_followers f ON f.canonical_key = t.canonical_key
            GROUP BY t.canonical_key, t.display_name, t.created_at
            HAVING COUNT(f.requester) >= ?
            ORDER BY followers DESC, t.created_at ASC
            LIMIT ?
            "#,
        )
        .bind(min_followers)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn follower_count(&self, canonical_key: &str) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM topic_followers WHERE canonical_key = ?",
        )
        .bind(canonical_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(n)
    }

    pub async fn add_follower(
        &self,
        canonical_key: &str,
        requester: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        add_follower(&mut conn, canonical_key, requester, now).await
    }
}

/// First spelling wins the display name.
pub(crate) async fn register_topic(
    conn: &mut SqliteConnection,
    canonical_key: &str,
    display_name: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO topics (canonical_key, display_name, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT (canonical_key) DO NOTHING
        "#,
    )
    .bind(canonical_key)
    .bind(display_name)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn add_follower(
    conn: &mut SqliteConnection,
    canonical_key: &str,
    requester: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO topic_followers (canonical_key, requester, followed_at)
        VALUES (?, ?, ?)
        ON CONFLICT (canonical_key, requester) DO NOTHING
        "#,
    )
    .bind(canonical_key)
    .bind(requester)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
