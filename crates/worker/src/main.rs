use insightflow::config;
use insightflow::db;
use insightflow::jobs::maintenance;
use insightflow::jobs::{ExtractionQueue, JobRunner, WorkerPool, WriteRetryConfig};
use insightflow::pipeline::{ContentRepo, ExtractionPipeline};
use insightflow::similarity::{LexicalSimilarity, Similarity};
use insightflow::topics::TopicValidator;

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod fetcher;
use fetcher::CommandFetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = config::Config::from_env()?;
    let extractor_cmd = cfg
        .extractor_cmd
        .clone()
        .context("EXTRACTOR_CMD is required by the worker")?;

    tracing::info!(
        worker_id = %cfg.pool.worker_id,
        workers = cfg.pool.workers,
        database_url = %cfg.database_url,
        max_attempts = cfg.queue.max_attempts,
        max_outstanding = cfg.queue.admission.max_outstanding,
        stale_after_secs = cfg.queue.stale_after.num_seconds(),
        maintenance_interval_secs = cfg.maintenance_interval.as_secs(),
        extractor = %extractor_cmd,
        "insightflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    let similarity: Arc<dyn Similarity> = Arc::new(LexicalSimilarity::new());
    let validator = TopicValidator::new(cfg.validator.clone(), Arc::clone(&similarity));
    let queue = Arc::new(ExtractionQueue::open(pool.clone(), cfg.queue.clone(), validator).await?);

    // Anything still running belongs to a previous process of ours that died.
    let recovered = queue.recover_orphans().await?;
    tracing::info!(recovered, "startup recovery done");

    let pipeline = Arc::new(ExtractionPipeline::new(
        Arc::new(CommandFetcher::from_cmdline(&extractor_cmd)?),
        similarity,
        ContentRepo::new(pool.clone()),
        cfg.pipeline.clone(),
    ));
    let runner = JobRunner::new(Arc::clone(&queue), pipeline, WriteRetryConfig::default());

    let workers = WorkerPool::spawn(Arc::clone(&queue), runner, cfg.pool.clone());

    let maintenance_handle = tokio::spawn(maintenance::run_loop(
        Arc::clone(&queue),
        cfg.maintenance_interval,
        workers.shutdown_signal(),
    ));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested; waiting for running jobs to finish");

    workers.shutdown().await;
    maintenance_handle.await?;
    pool.close().await;

    tracing::info!("worker stopped");
    Ok(())
}
