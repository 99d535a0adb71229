mod common;

use common::{
    fast_retry_config, item, open_queue, pipeline, setup_db, user, wait_for, StubFetcher,
};
use insightflow::jobs::{
    JobRunner, JobStatus, PoolConfig, QueueConfig, WorkerPool, WriteRetryConfig,
};
use insightflow::pipeline::{ContentRepo, FetchError, PipelineConfig};
use std::sync::Arc;
use std::time::Duration;

fn pool_config(workers: usize) -> PoolConfig {
    PoolConfig {
        workers,
        worker_id: "test".into(),
        idle_poll: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn followed_topic_runs_to_completion() {
    let db = setup_db().await;
    let queue = open_queue(&db.pool, fast_retry_config()).await;
    let fetcher = Arc::new(StubFetcher::returning(vec![
        item("a", 1, "Cranelift backend lands on nightly"),
        item("b", 2, "Polonius enters beta testing"),
    ]));
    let runner = JobRunner::new(
        Arc::clone(&queue),
        pipeline(&db.pool, fetcher, PipelineConfig::default()),
        WriteRetryConfig::default(),
    );
    let workers = WorkerPool::spawn(Arc::clone(&queue), runner, pool_config(2));

    let receipt = queue.follow("rust compilers", &user("u1")).await.unwrap();
    let snap = wait_for(&queue, receipt.job_id, Duration::from_secs(5), |s| {
        s.status.is_terminal()
    })
    .await;

    assert_eq!(snap.status, JobStatus::Completed);
    let result_ref = snap.result_ref.expect("result reference");
    let stored = ContentRepo::new(db.pool.clone())
        .get_result(&result_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.persisted_count, 2);

    assert_eq!(queue.health().await.workers_active, 2);
    workers.shutdown().await;
    assert_eq!(queue.health().await.workers_active, 0);
}

#[tokio::test]
async fn failing_source_exhausts_attempts() {
    let db = setup_db().await;
    let cfg = QueueConfig {
        max_attempts: 2,
        ..fast_retry_config()
    };
    let queue = open_queue(&db.pool, cfg).await;
    let fetcher = Arc::new(StubFetcher::failing(FetchError::Unavailable(
        "connection refused".into(),
    )));
    let runner = JobRunner::new(
        Arc::clone(&queue),
        pipeline(&db.pool, Arc::clone(&fetcher), PipelineConfig::default()),
        WriteRetryConfig::default(),
    );
    let workers = WorkerPool::spawn(Arc::clone(&queue), runner, pool_config(1));

    let receipt = queue.follow("rust compilers", &user("u1")).await.unwrap();
    let snap = wait_for(&queue, receipt.job_id, Duration::from_secs(5), |s| {
        s.status.is_terminal()
    })
    .await;
    workers.shutdown().await;

    assert_eq!(snap.status, JobStatus::Failed);
    assert_eq!(snap.attempts, 2);
    assert!(snap.error.unwrap().starts_with("FETCH_UNAVAILABLE"));
    assert_eq!(fetcher.calls().len(), 2);
}

#[tokio::test]
async fn rejected_topic_is_tried_once() {
    let db = setup_db().await;
    let queue = open_queue(&db.pool, fast_retry_config()).await;
    let fetcher = Arc::new(StubFetcher::failing(FetchError::Rejected(
        "topic not allowed".into(),
    )));
    let runner = JobRunner::new(
        Arc::clone(&queue),
        pipeline(&db.pool, Arc::clone(&fetcher), PipelineConfig::default()),
        WriteRetryConfig::default(),
    );
    let workers = WorkerPool::spawn(Arc::clone(&queue), runner, pool_config(1));

    let receipt = queue.follow("sourdough baking", &user("u1")).await.unwrap();
    let snap = wait_for(&queue, receipt.job_id, Duration::from_secs(5), |s| {
        s.status.is_terminal()
    })
    .await;
    workers.shutdown().await;

    assert_eq!(snap.status, JobStatus::Failed);
    assert_eq!(snap.attempts, 1);
    assert_eq!(fetcher.calls().len(), 1);
}

#[tokio::test]
async fn workers_never_run_more_jobs_than_the_pool_size() {
    let db = setup_db().await;
    let queue = open_queue(&db.pool, fast_retry_config()).await;
    let fetcher = Arc::new(
        StubFetcher::returning(vec![item("a", 1, "Marathon taper week tips")])
            .slow(Duration::from_millis(100)),
    );
    let runner = JobRunner::new(
        Arc::clone(&queue),
        pipeline(&db.pool, fetcher, PipelineConfig::default()),
        WriteRetryConfig::default(),
    );

    let mut ids = Vec::new();
    for topic in ["rust compilers", "sourdough baking", "marathon training", "climate policy"] {
        ids.push(queue.enqueue(topic, &user("u1"), 1).await.unwrap());
    }

    let workers = WorkerPool::spawn(Arc::clone(&queue), runner, pool_config(2));

    let mut peak = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let health = queue.health().await;
        peak = peak.max(health.jobs_running);
        if health.queue_size == 0 && health.jobs_running == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "pool did not drain");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    workers.shutdown().await;

    assert!(peak <= 2, "peak running {peak}");
    for id in ids {
        let snap = common::snapshot(&queue, id).await;
        assert_eq!(snap.status, JobStatus::Completed);
    }
}
