use crate::jobs::queue::ExtractionQueue;
use crate::jobs::runner::JobRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent executors; also the cap on simultaneous fetches.
    pub workers: usize,
    /// Prefix for per-executor ids ("<prefix>-<n>").
    pub worker_id: String,
    pub idle_poll: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            worker_id: "worker".into(),
            idle_poll: Duration::from_millis(250),
        }
    }
}

/// A fixed set of symmetric executors pulling from one queue.
pub struct WorkerPool {
    tasks: JoinSet<()>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn spawn(queue: Arc<ExtractionQueue>, runner: JobRunner, cfg: PoolConfig) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for n in 1..=cfg.workers.max(1) {
            let worker_id = format!("{}-{}", cfg.worker_id, n);
            tasks.spawn(worker_loop(
                Arc::clone(&queue),
                runner.clone(),
                worker_id,
                cfg.idle_poll,
                rx.clone(),
            ));
        }

        Self { tasks, shutdown }
    }

    /// Receiver that flips to true when [`shutdown`](Self::shutdown) starts.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Let every executor finish its current job, then wait for all of them.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    queue: Arc<ExtractionQueue>,
    runner: JobRunner,
    worker_id: String,
    idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let _online = queue.worker_online();
    tracing::info!(worker_id = %worker_id, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.dispatch(&worker_id).await {
            Ok(Some(job)) => {
                let outcome = runner.run(&job, &worker_id, &shutdown).await;
                tracing::debug!(worker_id = %worker_id, job_id = %job.id, ?outcome, "job finished");
            }
            Ok(None) => {
                tokio::select! {
                    _ = queue.wait_for_work(idle) => {}
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(worker_id = %worker_id, error = %e, "dispatch failed");
                tokio::select! {
                    _ = tokio::time::sleep(idle) => {}
                    res = shutdown.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::info!(worker_id = %worker_id, "worker stopped");
}
