pub mod repo;
pub mod validator;

pub use repo::{ActiveTopic, TopicsRepo};
pub use validator::{
    check, normalize, Collapsed, RejectionReason, TopicValidator, Validated, ValidatorConfig,
};
