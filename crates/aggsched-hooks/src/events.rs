//! Job event types.

use serde::Serialize;
use serde_json::Value;

use aggsched_types::Job;

/// Phase of a job firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Started,
    Completed,
    Failed,
}

/// Events emitted while a job fires. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum JobEvent {
    /// The firing began.
    Started { job: Job },
    /// The firing finished. `result` is `None` when the query returned no rows.
    Completed {
        job: Job,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    /// Query execution or result forwarding failed.
    Failed { job: Job, error: String },
}

impl JobEvent {
    pub fn phase(&self) -> JobPhase {
        match self {
            JobEvent::Started { .. } => JobPhase::Started,
            JobEvent::Completed { .. } => JobPhase::Completed,
            JobEvent::Failed { .. } => JobPhase::Failed,
        }
    }

    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Started { job }
            | JobEvent::Completed { job, .. }
            | JobEvent::Failed { job, .. } => job,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            JobEvent::Completed { result, .. } => result.as_ref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            JobEvent::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}
