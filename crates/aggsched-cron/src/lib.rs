//! aggsched-cron: Cron-driven aggregation jobs.
//!
//! A [`JobScheduler`] keeps one trigger per enabled job in its [`CronRegistry`].
//! On each firing it resolves the job's duration to a [`QueryStrategy`], runs
//! the generated query against the store and hands non-empty results to a
//! [`ResultSink`], reporting every transition through job events.

pub mod error;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod sink;
pub mod strategy;

pub use error::{Result, SchedulerError};
pub use registry::CronRegistry;
pub use schedule::{next_fire_time, parse_schedule};
pub use scheduler::{JobScheduler, SchedulerOptions};
pub use sink::{HttpResultSink, ResultSink};
pub use strategy::{DurationCategory, QueryStrategy, StrategyParams, StrategyResolver};
