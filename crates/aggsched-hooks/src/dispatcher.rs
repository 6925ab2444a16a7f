//! Event dispatcher fanning job events out to registered listeners.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, warn};

use aggsched_types::Job;

use crate::events::JobEvent;
use crate::logging::LoggingListener;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Observer of job lifecycle events.
pub trait JobListener: Send + Sync {
    /// Name used when reporting listener failures.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_event(&self, event: &JobEvent) -> Result<(), ListenerError>;
}

/// Delivers events synchronously, in registration order.
///
/// A listener that errors or panics is reported and skipped; the remaining
/// listeners still receive the event.
#[derive(Default)]
pub struct JobEventDispatcher {
    listeners: Vec<Arc<dyn JobListener>>,
}

impl JobEventDispatcher {
    /// Create a dispatcher with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher with the built-in [`LoggingListener`] registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_listener(Arc::new(LoggingListener));
        dispatcher
    }

    pub fn register_listener(&mut self, listener: Arc<dyn JobListener>) {
        self.listeners.push(listener);
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Dispatch an event to every listener.
    pub fn emit(&self, event: &JobEvent) {
        for listener in &self.listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    listener = listener.name(),
                    job_id = event.job().id,
                    "Job listener failed: {e}"
                ),
                Err(_) => error!(
                    listener = listener.name(),
                    job_id = event.job().id,
                    "Job listener panicked"
                ),
            }
        }
    }

    pub fn emit_started(&self, job: &Job) {
        self.emit(&JobEvent::Started { job: job.clone() });
    }

    pub fn emit_completed(&self, job: &Job, result: Option<Value>) {
        self.emit(&JobEvent::Completed {
            job: job.clone(),
            result,
        });
    }

    pub fn emit_failed(&self, job: &Job, error: impl ToString) {
        self.emit(&JobEvent::Failed {
            job: job.clone(),
            error: error.to_string(),
        });
    }
}
