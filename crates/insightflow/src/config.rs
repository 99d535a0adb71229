use crate::jobs::admission::AdmissionConfig;
use crate::jobs::pool::PoolConfig;
use crate::jobs::queue::QueueConfig;
use crate::jobs::retry::RetryConfig;
use crate::pipeline::{PipelineConfig, RecencyWindow};
use crate::scheduler::RefreshConfig;
use crate::topics::ValidatorConfig;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://insightflow.db";

// Typed runtime configuration, loaded once from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub maintenance_interval: Duration,
    /// External extraction command; only the worker needs it.
    pub extractor_cmd: Option<String>,

    pub pool: PoolConfig,
    pub queue: QueueConfig,
    pub validator: ValidatorConfig,
    pub pipeline: PipelineConfig,
    pub refresh: RefreshConfig,
}

impl Config {
    /// Reads `INSIGHTFLOW_<NAME>`, falling back to `<NAME>`, after loading `.env`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            env_var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let worker_id = env_var("WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let pool = PoolConfig {
            workers: env_parse("WORKERS")?.unwrap_or(2),
            worker_id,
            idle_poll: Duration::from_millis(env_parse("IDLE_POLL_MS")?.unwrap_or(250)),
        };
        if pool.workers == 0 {
            anyhow::bail!("WORKERS must be at least 1");
        }

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            base_seconds: env_parse("RETRY_BASE_SECONDS")?.unwrap_or(retry_defaults.base_seconds),
            max_seconds: env_parse("RETRY_MAX_SECONDS")?.unwrap_or(retry_defaults.max_seconds),
            jitter_pct: env_parse("RETRY_JITTER_PCT")?.unwrap_or(retry_defaults.jitter_pct),
        };

        let queue = QueueConfig {
            max_attempts: env_parse("MAX_ATTEMPTS")?.unwrap_or(3),
            user_priority: env_parse("USER_PRIORITY")?.unwrap_or(1),
            stale_after: chrono::Duration::seconds(env_parse("STALE_AFTER_SECS")?.unwrap_or(900)),
            retry,
            admission: AdmissionConfig {
                max_outstanding: env_parse("MAX_OUTSTANDING")?.unwrap_or(500),
            },
        };
        if queue.max_attempts < 1 {
            anyhow::bail!("MAX_ATTEMPTS must be at least 1");
        }

        let validator = ValidatorConfig {
            max_chars: env_parse("TOPIC_MAX_LEN")?.unwrap_or(50),
            similarity_threshold: env_parse("TOPIC_SIMILARITY")?.unwrap_or(0.85),
        };

        let pipeline = PipelineConfig {
            content_similarity_threshold: env_parse("CONTENT_SIMILARITY")?.unwrap_or(0.7),
            follow_window: RecencyWindow::days(env_parse("FOLLOW_WINDOW_DAYS")?.unwrap_or(30)),
            refresh_window: RecencyWindow::days(env_parse("REFRESH_WINDOW_DAYS")?.unwrap_or(2)),
            fetch_timeout: Duration::from_secs(env_parse("FETCH_TIMEOUT_SECS")?.unwrap_or(600)),
        };

        let refresh = RefreshConfig {
            priority: env_parse("REFRESH_PRIORITY")?.unwrap_or(10),
            min_followers: env_parse("REFRESH_MIN_FOLLOWERS")?.unwrap_or(1),
            limit: env_parse("REFRESH_LIMIT")?.unwrap_or(20),
        };

        let maintenance_interval =
            Duration::from_secs(env_parse("MAINTENANCE_INTERVAL_SECS")?.unwrap_or(30));

        Ok(Self {
            database_url,
            maintenance_interval,
            extractor_cmd: env_var("EXTRACTOR_CMD"),
            pool,
            queue,
            validator,
            pipeline,
            refresh,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_var(name: &str) -> Option<String> {
    env_or_fallback(&format!("INSIGHTFLOW_{name}"), name)
}

/// Unset is None; set but unparsable is an error rather than a silent default.
fn env_parse<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{name}={raw:?} is invalid: {e}")),
    }
}
