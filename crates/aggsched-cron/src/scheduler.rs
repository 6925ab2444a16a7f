//! Scheduling engine over persistence, triggers, strategies and forwarding.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use aggsched_config::SchedulerSettings;
use aggsched_hooks::JobEventDispatcher;
use aggsched_storage::{JobStore, JobUpdate, NewJob};
use aggsched_types::{Job, JobId, JobSpec, JobSummary, format_timestamp};

use crate::error::{Result, SchedulerError};
use crate::registry::CronRegistry;
use crate::sink::ResultSink;
use crate::strategy::StrategyResolver;

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Bound on store calls made while a job fires.
    pub bookkeeping_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            bookkeeping_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerOptions {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            bookkeeping_timeout: Duration::from_secs(settings.bookkeeping_timeout_secs),
        }
    }
}

/// Owns the job lifecycle: creation, activation, firing and removal.
pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    registry: Arc<CronRegistry>,
    dispatcher: Arc<JobEventDispatcher>,
    resolver: StrategyResolver,
    sink: Arc<dyn ResultSink>,
    options: SchedulerOptions,
}

impl JobScheduler {
    /// Create an engine with default options.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<CronRegistry>,
        dispatcher: Arc<JobEventDispatcher>,
        resolver: StrategyResolver,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
            resolver,
            sink,
            options: SchedulerOptions::default(),
        }
    }

    /// Replace the engine options.
    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// The trigger registry.
    pub fn registry(&self) -> &Arc<CronRegistry> {
        &self.registry
    }

    /// Activate every enabled job. Jobs that fail to activate are logged and skipped.
    ///
    /// Returns how many jobs were activated.
    pub async fn load_and_schedule_jobs(self: &Arc<Self>) -> Result<usize> {
        let jobs = self.store.list_enabled_jobs().await?;
        let mut activated = 0;
        for job in &jobs {
            match self.activate(job).await {
                Ok(_) => activated += 1,
                Err(e) => warn!(job_id = job.id, job_name = %job.name, "Skipping job: {e}"),
            }
        }
        info!("Scheduled {activated} of {} enabled jobs", jobs.len());
        Ok(activated)
    }

    /// Persist and activate a validated job.
    ///
    /// The cron expression is checked before anything is written. If
    /// activation fails afterwards the row stays persisted.
    pub async fn add_job(self: &Arc<Self>, spec: JobSpec) -> Result<Job> {
        let now = Utc::now();
        let next = self.registry.compute_next_fire_time(&spec.cron_expression, now)?;
        let mut job = self
            .store
            .create_job(NewJob {
                name: spec.name,
                cron_expression: spec.cron_expression,
                table: spec.table,
                field: spec.field,
                aggregation: spec.aggregation,
                duration: spec.duration,
                duration_filter: spec.duration_filter,
                created_at: format_timestamp(now),
                next_run: format_timestamp(next),
            })
            .await?;
        let first = self.activate(&job).await?;
        job.next_run = format_timestamp(first);
        info!(job_id = job.id, job_name = %job.name, "Job added");
        Ok(job)
    }

    /// Disable a job and stop its trigger. The row is kept.
    pub async fn remove_job(&self, id: JobId) -> Result<()> {
        if self.store.get_job(id).await?.is_none() {
            return Err(SchedulerError::NotFound(id));
        }
        self.store.update_job_fields(id, JobUpdate::disable()).await?;
        self.registry.deactivate(id).await?;
        info!(job_id = id, "Job removed");
        Ok(())
    }

    /// Every persisted job, enabled or not.
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let jobs = self.store.list_jobs().await?;
        Ok(jobs.into_iter().map(JobSummary::from).collect())
    }

    /// Run one firing of `job`. Failures are reported through events and logs only.
    pub async fn execute_job(&self, job: &Job) {
        self.dispatcher.emit_started(job);
        self.record_run(job).await;

        let strategy = match self.resolver.resolve(&job.duration) {
            Ok(strategy) => strategy,
            Err(e) => {
                error!(job_id = job.id, "Cannot resolve query strategy: {e}");
                return;
            }
        };
        let query = match strategy.generate_query(job) {
            Ok(query) => query,
            Err(e) => {
                error!(job_id = job.id, "Cannot build query: {e}");
                return;
            }
        };
        debug!(job_id = job.id, %query, "Running aggregation query");

        let rows = match self.bounded(self.store.run_aggregation_query(&query)).await {
            Ok(rows) => rows,
            Err(e) => {
                self.dispatcher.emit_failed(job, e);
                return;
            }
        };
        if rows.is_empty() {
            debug!(job_id = job.id, "Query returned no rows, nothing to forward");
            self.dispatcher.emit_completed(job, None);
            return;
        }

        match self.sink.post_result(&rows).await {
            Ok(()) => {
                let payload = Value::Array(rows.into_iter().map(Value::Object).collect());
                self.dispatcher.emit_completed(job, Some(payload));
            }
            Err(e) => self.dispatcher.emit_failed(job, e),
        }
    }

    /// Stop all triggers. In-flight firings run to completion.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }

    /// Install the trigger for `job` and refresh its persisted `next_run`.
    async fn activate(self: &Arc<Self>, job: &Job) -> Result<chrono::DateTime<Utc>> {
        let scheduler = Arc::downgrade(self);
        let fired = job.clone();
        let next = self
            .registry
            .activate(job, move || {
                let scheduler = scheduler.clone();
                let job = fired.clone();
                async move {
                    if let Some(scheduler) = scheduler.upgrade() {
                        scheduler.execute_job(&job).await;
                    }
                }
            })
            .await?;

        let update = JobUpdate::next_run(format_timestamp(next));
        if let Err(e) = self.bounded(self.store.update_job_fields(job.id, update)).await {
            warn!(job_id = job.id, "Failed to record next run: {e}");
        }
        Ok(next)
    }

    async fn record_run(&self, job: &Job) {
        let now = Utc::now();
        let mut update = JobUpdate {
            last_run: Some(format_timestamp(now)),
            ..Default::default()
        };
        match self.registry.compute_next_fire_time(&job.cron_expression, now) {
            Ok(next) => update.next_run = Some(format_timestamp(next)),
            Err(e) => warn!(job_id = job.id, "Cannot compute next run: {e}"),
        }
        if let Err(e) = self.bounded(self.store.update_job_fields(job.id, update)).await {
            warn!(job_id = job.id, "Failed to record run: {e}");
        }
    }

    async fn bounded<T, E>(&self, call: impl Future<Output = std::result::Result<T, E>>) -> Result<T>
    where
        SchedulerError: From<E>,
    {
        let limit = self.options.bookkeeping_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SchedulerError::Timeout(limit)),
        }
    }
}
