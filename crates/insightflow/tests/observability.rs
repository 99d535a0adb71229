mod common;

use common::{fast_retry_config, open_queue, setup_db, user};
use insightflow::jobs::timeline::build_timeline;
use insightflow::jobs::{AttemptsRepo, ErrorCode, JobRef, JobStatus, MetricsRepo};
use insightflow::QueueError;

#[tokio::test]
async fn status_resolves_ids_and_topics() {
    let db = setup_db().await;
    let queue = open_queue(&db.pool, fast_retry_config()).await;
    let id = queue
        .enqueue("Rust async runtime", &user("u1"), 1)
        .await
        .unwrap();

    for lookup in [
        JobRef::parse(&id.to_string()),
        JobRef::parse("rust ASYNC runtime"),
        JobRef::parse("rust async runtimes"),
    ] {
        let snap = queue.status(&lookup).await.unwrap();
        assert_eq!(snap.job_id, id, "{lookup}");
        assert_eq!(snap.status, JobStatus::Queued);
    }

    let err = queue
        .status(&JobRef::parse("sourdough baking"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn timeline_records_each_attempt() {
    let db = setup_db().await;
    let queue = open_queue(&db.pool, fast_retry_config()).await;
    let id = queue.enqueue("rust compilers", &user("u1"), 1).await.unwrap();

    let job = queue.dispatch("w1").await.unwrap().unwrap();
    queue
        .report_failure(&job, ErrorCode::RateLimit, "429 from source", true)
        .await
        .unwrap();
    let job = queue.dispatch("w2").await.unwrap().unwrap();
    queue.report_success(&job, "result-1").await.unwrap();

    let timeline = build_timeline(queue.jobs(), &AttemptsRepo::new(db.pool.clone()), id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(timeline.job.status, JobStatus::Completed);
    assert_eq!(timeline.requester, "u1");
    assert_eq!(timeline.priority, 1);
    assert_eq!(timeline.next_run_at, None);
    assert_eq!(timeline.last_worker_id.as_deref(), Some("w2"));

    let last_error = timeline.last_error.unwrap();
    assert_eq!(last_error.error_code.as_deref(), Some("RATE_LIMIT"));
    assert_eq!(last_error.error_message.as_deref(), Some("429 from source"));

    assert_eq!(timeline.attempts.len(), 2);
    let first = &timeline.attempts[0];
    assert_eq!(first.attempt_no, 1);
    assert_eq!(first.status, "failed");
    assert_eq!(first.worker_id, "w1");
    assert!(first.finished_at.is_some());
    assert!(first.suggested_action.is_some());

    let second = &timeline.attempts[1];
    assert_eq!(second.attempt_no, 2);
    assert_eq!(second.status, "succeeded");
    assert_eq!(second.error_code, None);
    assert_eq!(second.suggested_action, None);

    assert!(
        build_timeline(queue.jobs(), &AttemptsRepo::new(db.pool.clone()), uuid::Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn metrics_count_jobs_by_status_and_recent_attempts() {
    let db = setup_db().await;
    let queue = open_queue(&db.pool, fast_retry_config()).await;

    queue.enqueue("rust compilers", &user("u1"), 1).await.unwrap();
    queue.enqueue("sourdough baking", &user("u1"), 1).await.unwrap();
    queue.enqueue("marathon training", &user("u1"), 1).await.unwrap();

    let job = queue.dispatch("w1").await.unwrap().unwrap();
    queue.report_success(&job, "result-1").await.unwrap();
    let job = queue.dispatch("w1").await.unwrap().unwrap();
    queue
        .report_failure(&job, ErrorCode::Rejected, "blocked", false)
        .await
        .unwrap();

    let m = MetricsRepo::new(db.pool.clone()).snapshot().await.unwrap();
    assert_eq!(m.queued, 1);
    assert_eq!(m.running, 0);
    assert_eq!(m.completed, 1);
    assert_eq!(m.failed, 1);
    assert_eq!(m.succeeded_last_60s, 1);
    assert_eq!(m.failed_last_60s, 1);
    assert!(m.mean_latency_ms >= 0.0);
}
