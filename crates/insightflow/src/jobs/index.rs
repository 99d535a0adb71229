//! In-memory dispatch index over the in-flight rows of the job store.
//!
//! Holds nothing the store does not: it can always be thrown away and rebuilt
//! with [`QueueIndex::rebuild`].

use crate::jobs::model::{ExtractionJob, JobStatus};
use chrono::{DateTime, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadyEntry {
    priority: i64,
    created_at: DateTime<Utc>,
    seq: u64,
    job_id: Uuid,
}

// Max-heap: higher priority first, then earlier creation, then insertion order.
impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    canonical_key: String,
    priority: i64,
    created_at: DateTime<Utc>,
    seq: u64,
    status: JobStatus,
}

#[derive(Debug, Default)]
pub struct QueueIndex {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BinaryHeap<Reverse<(DateTime<Utc>, u64, Uuid)>>,
    by_key: HashMap<String, Uuid>,
    jobs: HashMap<Uuid, Tracked>,
    next_seq: u64,
}

impl QueueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index with `jobs`, which must be the store's in-flight
    /// rows in creation order.
    pub fn rebuild(&mut self, jobs: impl IntoIterator<Item = ExtractionJob>) {
        *self = Self::default();
        for job in jobs {
            self.track(&job);
        }
    }

    pub fn track(&mut self, job: &ExtractionJob) {
        if !job.status.is_in_flight() {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;

        self.by_key.insert(job.canonical_key.clone(), job.id);
        self.jobs.insert(
            job.id,
            Tracked {
                canonical_key: job.canonical_key.clone(),
                priority: job.priority,
                created_at: job.created_at,
                seq,
                status: job.status,
            },
        );

        match job.status {
            JobStatus::Queued => self.push_ready(job.id),
            JobStatus::Retrying => self.delayed.push(Reverse((job.run_at, seq, job.id))),
            _ => {}
        }
    }

    pub fn in_flight(&self, canonical_key: &str) -> Option<(Uuid, JobStatus)> {
        let id = self.by_key.get(canonical_key)?;
        self.jobs.get(id).map(|t| (*id, t.status))
    }

    /// queued + retrying + running
    pub fn outstanding(&self) -> usize {
        self.jobs.len()
    }

    /// Jobs waiting for a worker, whether or not their backoff has elapsed.
    pub fn queue_size(&self) -> usize {
        self.jobs
            .values()
            .filter(|t| matches!(t.status, JobStatus::Queued | JobStatus::Retrying))
            .count()
    }

    pub fn running(&self) -> usize {
        self.jobs
            .values()
            .filter(|t| t.status == JobStatus::Running)
            .count()
    }

    /// Best dispatchable job at `now`, without removing it.
    pub fn peek(&mut self, now: DateTime<Utc>) -> Option<Uuid> {
        while let Some(Reverse((at, seq, id))) = self.delayed.peek().cloned() {
            if at > now {
                break;
            }
            self.delayed.pop();
            let due = self
                .jobs
                .get(&id)
                .is_some_and(|t| t.seq == seq && t.status == JobStatus::Retrying);
            if due {
                self.push_ready(id);
            }
        }

        // Entries go stale when a job changes state underneath them.
        while let Some(top) = self.ready.peek() {
            let live = self.jobs.get(&top.job_id).is_some_and(|t| {
                t.seq == top.seq && matches!(t.status, JobStatus::Queued | JobStatus::Retrying)
            });
            if live {
                return Some(top.job_id);
            }
            self.ready.pop();
        }
        None
    }

    pub fn mark_running(&mut self, job_id: Uuid) {
        if self.ready.peek().is_some_and(|top| top.job_id == job_id) {
            self.ready.pop();
        }
        if let Some(t) = self.jobs.get_mut(&job_id) {
            t.status = JobStatus::Running;
        }
    }

    pub fn mark_retrying(&mut self, job_id: Uuid, run_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(t) = self.jobs.get_mut(&job_id) {
            t.status = JobStatus::Retrying;
            t.seq = seq;
            self.delayed.push(Reverse((run_at, seq, job_id)));
        }
    }

    /// Drop a job that reached a terminal state.
    pub fn finish(&mut self, job_id: Uuid) {
        if let Some(t) = self.jobs.remove(&job_id) {
            if self.by_key.get(&t.canonical_key) == Some(&job_id) {
                self.by_key.remove(&t.canonical_key);
            }
        }
    }

    fn push_ready(&mut self, job_id: Uuid) {
        if let Some(t) = self.jobs.get(&job_id) {
            self.ready.push(ReadyEntry {
                priority: t.priority,
                created_at: t.created_at,
                seq: t.seq,
                job_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(key: &str, priority: i64, created_at: DateTime<Utc>) -> ExtractionJob {
        ExtractionJob {
            id: Uuid::new_v4(),
            topic: key.to_string(),
            canonical_key: key.to_string(),
            requester: "u1".into(),
            priority,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: 3,
            run_at: created_at,
            claim_id: None,
            started_at: None,
            error: None,
            result_ref: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn drain(index: &mut QueueIndex, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut out = Vec::new();
        while let Some(id) = index.peek(now) {
            index.mark_running(id);
            out.push(id);
        }
        out
    }

    #[test]
    fn priority_then_fifo() {
        let t0 = Utc::now();
        let a = job("a", 1, t0);
        let b = job("b", 10, t0 + Duration::milliseconds(1));
        let c = job("c", 1, t0 + Duration::milliseconds(2));

        let mut index = QueueIndex::new();
        for j in [&a, &b, &c] {
            index.track(j);
        }

        assert_eq!(drain(&mut index, t0), vec![b.id, a.id, c.id]);
        assert_eq!(index.running(), 3);
        assert_eq!(index.queue_size(), 0);
    }

    #[test]
    fn same_timestamp_falls_back_to_insertion_order() {
        let t0 = Utc::now();
        let a = job("a", 5, t0);
        let b = job("b", 5, t0);
        let mut index = QueueIndex::new();
        index.track(&a);
        index.track(&b);
        assert_eq!(drain(&mut index, t0), vec![a.id, b.id]);
    }

    #[test]
    fn retrying_job_waits_for_backoff() {
        let t0 = Utc::now();
        let a = job("a", 1, t0);
        let mut index = QueueIndex::new();
        index.track(&a);

        assert_eq!(index.peek(t0), Some(a.id));
        index.mark_running(a.id);
        index.mark_retrying(a.id, t0 + Duration::seconds(30));

        assert_eq!(index.peek(t0 + Duration::seconds(29)), None);
        assert_eq!(index.queue_size(), 1);
        assert_eq!(index.peek(t0 + Duration::seconds(30)), Some(a.id));
    }

    #[test]
    fn finish_releases_the_key() {
        let a = job("a", 1, Utc::now());
        let mut index = QueueIndex::new();
        index.track(&a);
        assert_eq!(index.in_flight("a"), Some((a.id, JobStatus::Queued)));

        index.mark_running(a.id);
        index.finish(a.id);
        assert_eq!(index.in_flight("a"), None);
        assert_eq!(index.outstanding(), 0);
    }

    #[test]
    fn rebuild_ignores_terminal_rows() {
        let t0 = Utc::now();
        let mut done = job("done", 1, t0);
        done.status = JobStatus::Completed;
        let mut running = job("running", 1, t0);
        running.status = JobStatus::Running;
        let queued = job("queued", 1, t0);

        let mut index = QueueIndex::new();
        index.rebuild(vec![done, running.clone(), queued.clone()]);

        assert_eq!(index.outstanding(), 2);
        assert_eq!(index.running(), 1);
        assert_eq!(index.peek(t0), Some(queued.id));
        assert_eq!(index.in_flight("running"), Some((running.id, JobStatus::Running)));
    }
}
