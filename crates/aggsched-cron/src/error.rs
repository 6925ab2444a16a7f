//! Scheduler error taxonomy.

use std::time::Duration;

use thiserror::Error;

use aggsched_config::ConfigError;
use aggsched_storage::StorageError;
use aggsched_types::JobId;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCronExpression { expression: String, message: String },
    #[error("No strategy for the duration: {0}")]
    UnknownDurationStrategy(String),
    #[error("Unsupported duration '{duration}' for filter '{filter}'")]
    UnsupportedDurationFilter { duration: String, filter: String },
    #[error("Job {0} not found")]
    NotFound(JobId),
    #[error("Job {0} is not scheduled")]
    NotScheduled(JobId),
    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StorageError),
    #[error("Forwarding failure: {0}")]
    ForwardingFailure(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Scheduler is shut down")]
    ShutDown,
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
