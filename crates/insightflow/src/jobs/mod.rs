pub mod admission;
pub mod attempts;
pub mod error_codes;
pub mod index;
pub mod model;
pub mod pool;
pub mod queue;
pub mod repo;
pub mod retry;
pub mod runner;
pub mod timeline;

pub mod maintenance;
pub use maintenance::MaintenanceReport;

pub mod metrics;
pub use metrics::{Metrics, MetricsRepo};

pub use attempts::AttemptsRepo;
pub use error_codes::ErrorCode;
pub use model::{
    ExtractionJob, FollowReceipt, JobRef, JobSnapshot, JobStatus, NewJob, QueueHealth, Requester,
    SYSTEM_REQUESTER,
};
pub use pool::{PoolConfig, WorkerPool};
pub use queue::{ExtractionQueue, QueueConfig};
pub use repo::JobsRepo;
pub use runner::{JobRunner, RunOutcome, WriteRetryConfig};
