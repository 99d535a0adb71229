//! Daily refresh: enqueue a system job for every active topic.
//!
//! The trigger (cron, systemd timer) lives outside this crate; `insightctl
//! refresh` is the entry point it calls.

use crate::error::QueueResult;
use crate::jobs::model::Requester;
use crate::jobs::queue::ExtractionQueue;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Sorts above user follows so a burst of follows cannot starve refreshes.
    pub priority: i64,
    pub min_followers: i64,
    pub limit: i64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            priority: 10,
            min_followers: 1,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// Dry run: would have been enqueued.
    Planned,
    Queued { job_id: Uuid },
    Attached { job_id: Uuid },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshEntry {
    pub canonical_key: String,
    pub display_name: String,
    pub followers: i64,
    #[serde(flatten)]
    pub outcome: RefreshOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub dry_run: bool,
    pub entries: Vec<RefreshEntry>,
}

impl RefreshReport {
    pub fn planned(&self) -> usize {
        self.count(|o| matches!(o, RefreshOutcome::Planned))
    }

    pub fn queued(&self) -> usize {
        self.count(|o| matches!(o, RefreshOutcome::Queued { .. }))
    }

    pub fn attached(&self) -> usize {
        self.count(|o| matches!(o, RefreshOutcome::Attached { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RefreshOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&RefreshOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

pub struct DailyRefresh {
    queue: Arc<ExtractionQueue>,
    cfg: RefreshConfig,
}

impl DailyRefresh {
    pub fn new(queue: Arc<ExtractionQueue>, cfg: RefreshConfig) -> Self {
        Self { queue, cfg }
    }

    /// Enumerate active topics and enqueue each one (or only log it when
    /// `dry_run`). One topic failing to enqueue does not stop the rest.
    pub async fn run(&self, dry_run: bool) -> QueueResult<RefreshReport> {
        let topics = self
            .queue
            .topics()
            .active_topics(self.cfg.min_followers, self.cfg.limit)
            .await?;

        tracing::info!(
            topics = topics.len(),
            dry_run,
            min_followers = self.cfg.min_followers,
            limit = self.cfg.limit,
            "daily refresh starting"
        );

        let mut entries = Vec::with_capacity(topics.len());
        for topic in topics {
            let outcome = if dry_run {
                tracing::info!(
                    canonical_key = %topic.canonical_key,
                    followers = topic.followers,
                    priority = self.cfg.priority,
                    "would enqueue refresh"
                );
                RefreshOutcome::Planned
            } else {
                match self
                    .queue
                    .submit(&topic.display_name, &Requester::System, self.cfg.priority)
                    .await
                {
                    Ok(r) if r.attached => RefreshOutcome::Attached { job_id: r.job_id },
                    Ok(r) => RefreshOutcome::Queued { job_id: r.job_id },
                    Err(e) => {
                        tracing::warn!(canonical_key = %topic.canonical_key, error = %e, "refresh enqueue failed");
                        RefreshOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };

            entries.push(RefreshEntry {
                canonical_key: topic.canonical_key,
                display_name: topic.display_name,
                followers: topic.followers,
                outcome,
            });
        }

        let report = RefreshReport { dry_run, entries };
        tracing::info!(
            planned = report.planned(),
            queued = report.queued(),
            attached = report.attached(),
            failed = report.failed(),
            "daily refresh finished"
        );
        Ok(report)
    }
}
