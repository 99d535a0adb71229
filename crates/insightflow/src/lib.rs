pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod scheduler;
pub mod similarity;
pub mod topics;

pub use error::{QueueError, QueueResult};
