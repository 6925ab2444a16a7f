//! Built-in listener that records job transitions through `tracing`.

use tracing::{error, info};

use crate::dispatcher::{JobListener, ListenerError};
use crate::events::JobEvent;

pub struct LoggingListener;

impl JobListener for LoggingListener {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_event(&self, event: &JobEvent) -> Result<(), ListenerError> {
        let job = event.job();
        match event {
            JobEvent::Started { .. } => {
                info!(job_id = job.id, job_name = %job.name, "Job started");
            }
            JobEvent::Completed { result, .. } => {
                let rows = result
                    .as_ref()
                    .and_then(|r| r.as_array())
                    .map_or(0, |rows| rows.len());
                info!(job_id = job.id, job_name = %job.name, rows, "Job completed");
            }
            JobEvent::Failed { error, .. } => {
                error!(job_id = job.id, job_name = %job.name, error = %error, "Job failed");
            }
        }
        Ok(())
    }
}
