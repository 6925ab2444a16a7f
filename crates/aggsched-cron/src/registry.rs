//! Cron registry mapping job identity to its live trigger.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aggsched_types::{Job, JobId};

use crate::error::{Result, SchedulerError};
use crate::schedule::{next_fire_time, parse_schedule};

/// Owns one trigger task per scheduled job.
///
/// The lock guards only the id → handle map; trigger callbacks run outside it.
pub struct CronRegistry {
    entries: Mutex<HashMap<JobId, CancellationToken>>,
    shutdown: CancellationToken,
}

impl CronRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Install a trigger for `job` that awaits `on_fire()` on every firing.
    ///
    /// Returns the first fire time. Nothing is registered if the expression
    /// does not parse or the registry is shut down. An existing trigger for
    /// the same id is stopped and replaced.
    pub async fn activate<F, Fut>(&self, job: &Job, on_fire: F) -> Result<DateTime<Utc>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = parse_schedule(&job.cron_expression)?;
        let first = schedule.upcoming(Utc).next().ok_or_else(|| {
            SchedulerError::InvalidCronExpression {
                expression: job.cron_expression.clone(),
                message: "schedule has no upcoming fire time".to_string(),
            }
        })?;

        let mut entries = self.entries.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        let cancel = self.shutdown.child_token();
        tokio::spawn(run_trigger(job.id, schedule, cancel.clone(), on_fire));

        if let Some(previous) = entries.insert(job.id, cancel) {
            previous.cancel();
            warn!(job_id = job.id, "Replaced an existing trigger");
        }
        info!(job_id = job.id, job_name = %job.name, next_fire = %first, "Job scheduled");
        Ok(first)
    }

    /// Stop and forget the trigger for `job_id`.
    pub async fn deactivate(&self, job_id: JobId) -> Result<()> {
        let cancel = self
            .entries
            .lock()
            .await
            .remove(&job_id)
            .ok_or(SchedulerError::NotScheduled(job_id))?;
        cancel.cancel();
        info!(job_id, "Job unscheduled");
        Ok(())
    }

    /// First fire time of `expression` strictly after `from`. Does not touch the map.
    pub fn compute_next_fire_time(
        &self,
        expression: &str,
        from: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        next_fire_time(expression, from)
    }

    /// Whether `job_id` currently has a trigger.
    pub async fn is_scheduled(&self, job_id: JobId) -> bool {
        self.entries.lock().await.contains_key(&job_id)
    }

    /// Scheduled ids in ascending order.
    pub async fn scheduled_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.entries.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of scheduled jobs.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no job is scheduled.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Stop every trigger. Entries stay in the map; in-flight firings finish.
    /// Later activations are refused.
    pub fn shutdown(&self) {
        info!("Stopping cron triggers");
        self.shutdown.cancel();
    }
}

impl Default for CronRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep until each fire time and run the callback to completion.
/// Fire times that pass while the callback runs are skipped.
async fn run_trigger<F, Fut>(
    job_id: JobId,
    schedule: Schedule,
    cancel: CancellationToken,
    on_fire: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        let now = Utc::now();
        let after = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.after(&after).next() else {
            debug!(job_id, "Schedule exhausted");
            break;
        };
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(job_id, "Trigger stopped");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        last_fire = Some(next);
        on_fire().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggsched_types::Aggregation;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn job(id: JobId, cron_expression: &str) -> Job {
        Job {
            id,
            name: format!("job-{id}"),
            cron_expression: cron_expression.into(),
            enabled: true,
            table: "registration".into(),
            field: "weight".into(),
            aggregation: Aggregation::Count,
            duration: "daily".into(),
            duration_filter: "timestamp".into(),
            created_at: String::new(),
            last_run: String::new(),
            next_run: String::new(),
        }
    }

    fn counter() -> (Arc<AtomicU64>, impl Fn() -> futures::future::Ready<()> + Send + Sync + 'static) {
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        })
    }

    #[tokio::test]
    async fn test_activate_and_deactivate() {
        let registry = CronRegistry::new();
        let (_, on_fire) = counter();
        let first = registry.activate(&job(1, "@hourly"), on_fire).await.unwrap();
        assert!(first > Utc::now());
        assert!(registry.is_scheduled(1).await);
        assert_eq!(registry.scheduled_ids().await, vec![1]);

        let next = registry.compute_next_fire_time("@hourly", first).unwrap();
        assert_eq!(next - first, chrono::Duration::hours(1));

        registry.deactivate(1).await.unwrap();
        assert!(!registry.is_scheduled(1).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_deactivate_twice_reports_not_scheduled() {
        let registry = CronRegistry::new();
        let (_, on_fire) = counter();
        registry.activate(&job(3, "*/5 * * * *"), on_fire).await.unwrap();
        registry.deactivate(3).await.unwrap();
        assert!(matches!(
            registry.deactivate(3).await,
            Err(SchedulerError::NotScheduled(3))
        ));
    }

    #[tokio::test]
    async fn test_invalid_expression_is_not_registered() {
        let registry = CronRegistry::new();
        let (_, on_fire) = counter();
        let err = registry.activate(&job(2, "not a cron"), on_fire).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCronExpression { .. }));
        assert!(!registry.is_scheduled(2).await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_reactivation_replaces_trigger() {
        let registry = CronRegistry::new();
        let (_, first) = counter();
        let (_, second) = counter();
        registry.activate(&job(4, "@daily"), first).await.unwrap();
        registry.activate(&job(4, "@hourly"), second).await.unwrap();
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_trigger_fires_every_second() {
        let registry = CronRegistry::new();
        let (count, on_fire) = counter();
        registry.activate(&job(5, "* * * * * *"), on_fire).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 1, "expected at least one firing, got {fired}");

        registry.deactivate(5).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_shutdown_stops_triggers_but_keeps_entries() {
        let registry = CronRegistry::new();
        let (count, on_fire) = counter();
        registry.activate(&job(6, "* * * * * *"), on_fire).await.unwrap();
        registry.shutdown();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(registry.is_scheduled(6).await);
    }

    #[tokio::test]
    async fn test_activate_after_shutdown_is_refused() {
        let registry = CronRegistry::new();
        registry.shutdown();
        let (_, on_fire) = counter();
        let err = registry.activate(&job(7, "@hourly"), on_fire).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ShutDown));
        assert!(!registry.is_scheduled(7).await);
        assert!(registry.is_empty().await);
    }
}
