//! Query strategies: a job's duration category becomes aggregation SQL.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;

use aggsched_config::{ConfigError, StrategyConfig};
use aggsched_types::Job;

use crate::error::{Result, SchedulerError};

/// Duration categories a job may be stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationCategory {
    Daily,
    RecentWeek,
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
}

impl DurationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationCategory::Daily => "daily",
            DurationCategory::RecentWeek => "recent_week",
            DurationCategory::Today => "today",
            DurationCategory::Yesterday => "yesterday",
            DurationCategory::Last7Days => "last_7_days",
            DurationCategory::Last30Days => "last_30_days",
        }
    }
}

impl fmt::Display for DurationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurationCategory {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "daily" => Ok(DurationCategory::Daily),
            "recent_week" => Ok(DurationCategory::RecentWeek),
            "today" => Ok(DurationCategory::Today),
            "yesterday" => Ok(DurationCategory::Yesterday),
            "last_7_days" => Ok(DurationCategory::Last7Days),
            "last_30_days" => Ok(DurationCategory::Last30Days),
            other => Err(SchedulerError::UnknownDurationStrategy(other.to_string())),
        }
    }
}

/// Fixed dates the strategies are anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyParams {
    pub reference_date: NaiveDate,
    pub recent_week: String,
    pub recent_year: String,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            reference_date: NaiveDate::from_ymd_opt(2022, 12, 22).unwrap_or_default(),
            recent_week: "50".to_string(),
            recent_year: "2022".to_string(),
        }
    }
}

impl StrategyParams {
    pub fn from_config(config: &StrategyConfig) -> std::result::Result<Self, ConfigError> {
        let reference_date = config.reference_date()?;
        let digits = |key: &'static str, value: &str| {
            if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
                Ok(value.to_string())
            } else {
                Err(ConfigError::Invalid {
                    key,
                    message: format!("expected digits, got '{value}'"),
                })
            }
        };
        Ok(Self {
            reference_date,
            recent_week: digits("strategy.recent_week", &config.recent_week)?,
            recent_year: digits("strategy.recent_year", &config.recent_year)?,
        })
    }
}

/// One way of building the aggregation query for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStrategy {
    /// One row per distinct date over the whole table.
    Daily,
    /// The aggregate for a single `%W` week of a single year.
    RecentWeek { week: String, year: String },
    /// A single aggregate over a window relative to `reference_date`.
    Generic { reference_date: NaiveDate },
}

impl QueryStrategy {
    /// Build the query text for `job`. Pure: the same job always yields the same text.
    pub fn generate_query(&self, job: &Job) -> Result<String> {
        let agg = job.aggregation.sql_keyword();
        let field = &job.field;
        let table = &job.table;
        let filter = &job.duration_filter;

        match self {
            QueryStrategy::Daily => Ok(format!(
                "SELECT {agg}({field}) AS result, date({filter}) AS date FROM {table} GROUP BY 2"
            )),
            QueryStrategy::RecentWeek { week, year } => Ok(format!(
                "WITH week_aggregate AS (\
                 SELECT {agg}({field}) AS result, strftime('%W', {filter}) AS week_number, strftime('%Y', {filter}) AS year \
                 FROM {table} GROUP BY 2, 3) \
                 SELECT result, week_number FROM week_aggregate WHERE week_number = '{week}' AND year = '{year}'"
            )),
            QueryStrategy::Generic { reference_date } => {
                let unsupported = || SchedulerError::UnsupportedDurationFilter {
                    duration: job.duration.clone(),
                    filter: filter.clone(),
                };
                if !is_identifier(filter) {
                    return Err(unsupported());
                }
                let offset = match job.duration.parse::<DurationCategory>() {
                    Ok(DurationCategory::Today) => "",
                    Ok(DurationCategory::Yesterday) => ", '-1 day'",
                    Ok(DurationCategory::Last7Days) => ", '-7 day'",
                    Ok(DurationCategory::Last30Days) => ", '-1 month'",
                    _ => return Err(unsupported()),
                };
                let date = reference_date.format("%Y-%m-%d");
                Ok(format!(
                    "SELECT {agg}({field}) AS result FROM {table} WHERE date({filter}) = date('{date}'{offset})"
                ))
            }
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Maps duration categories to strategies.
#[derive(Debug, Clone, Default)]
pub struct StrategyResolver {
    params: StrategyParams,
}

impl StrategyResolver {
    pub fn new(params: StrategyParams) -> Self {
        Self { params }
    }

    pub fn from_config(config: &StrategyConfig) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(StrategyParams::from_config(config)?))
    }

    pub fn resolve(&self, duration: &str) -> Result<QueryStrategy> {
        Ok(match duration.parse::<DurationCategory>()? {
            DurationCategory::Daily => QueryStrategy::Daily,
            DurationCategory::RecentWeek => QueryStrategy::RecentWeek {
                week: self.params.recent_week.clone(),
                year: self.params.recent_year.clone(),
            },
            DurationCategory::Today
            | DurationCategory::Yesterday
            | DurationCategory::Last7Days
            | DurationCategory::Last30Days => QueryStrategy::Generic {
                reference_date: self.params.reference_date,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aggsched_types::Aggregation;

    fn job(duration: &str, aggregation: Aggregation) -> Job {
        Job {
            id: 1,
            name: "weights".into(),
            cron_expression: "@hourly".into(),
            enabled: true,
            table: "registration".into(),
            field: "weight".into(),
            aggregation,
            duration: duration.into(),
            duration_filter: "timestamp".into(),
            created_at: String::new(),
            last_run: String::new(),
            next_run: String::new(),
        }
    }

    fn query(duration: &str, aggregation: Aggregation) -> Result<String> {
        let resolver = StrategyResolver::default();
        resolver
            .resolve(duration)?
            .generate_query(&job(duration, aggregation))
    }

    #[test]
    fn test_today_avg() {
        assert_eq!(
            query("today", Aggregation::Avg).unwrap(),
            "SELECT AVG(weight) AS result FROM registration WHERE date(timestamp) = date('2022-12-22')"
        );
    }

    #[test]
    fn test_generic_offsets() {
        assert!(query("yesterday", Aggregation::Min).unwrap().ends_with("date('2022-12-22', '-1 day')"));
        assert!(query("last_7_days", Aggregation::Max).unwrap().ends_with("date('2022-12-22', '-7 day')"));
        assert!(query("last_30_days", Aggregation::Count).unwrap().ends_with("date('2022-12-22', '-1 month')"));
    }

    #[test]
    fn test_daily_groups_by_date() {
        assert_eq!(
            query("daily", Aggregation::Count).unwrap(),
            "SELECT COUNT(weight) AS result, date(timestamp) AS date FROM registration GROUP BY 2"
        );
    }

    #[test]
    fn test_recent_week_uses_configured_pair() {
        let resolver = StrategyResolver::new(StrategyParams {
            recent_week: "07".into(),
            recent_year: "2023".into(),
            ..Default::default()
        });
        let sql = resolver
            .resolve("recent_week")
            .unwrap()
            .generate_query(&job("recent_week", Aggregation::Avg))
            .unwrap();
        assert!(sql.contains("strftime('%W', timestamp) AS week_number"));
        assert!(sql.contains("GROUP BY 2, 3"));
        assert!(sql.ends_with("WHERE week_number = '07' AND year = '2023'"));
    }

    #[test]
    fn test_unknown_duration() {
        assert!(matches!(
            query("monthly", Aggregation::Avg),
            Err(SchedulerError::UnknownDurationStrategy(d)) if d == "monthly"
        ));
    }

    #[test]
    fn test_generic_rejects_unsupported_filters() {
        let generic = QueryStrategy::Generic {
            reference_date: StrategyParams::default().reference_date,
        };
        // Category outside the predicate table
        assert!(matches!(
            generic.generate_query(&job("daily", Aggregation::Avg)),
            Err(SchedulerError::UnsupportedDurationFilter { .. })
        ));

        let mut injected = job("today", Aggregation::Avg);
        injected.duration_filter = "timestamp) OR 1=1 --".into();
        assert!(matches!(
            generic.generate_query(&injected),
            Err(SchedulerError::UnsupportedDurationFilter { .. })
        ));
    }

    #[test]
    fn test_generate_query_is_pure() {
        let strategy = StrategyResolver::default().resolve("today").unwrap();
        let job = job("today", Aggregation::Avg);
        assert_eq!(
            strategy.generate_query(&job).unwrap(),
            strategy.generate_query(&job).unwrap()
        );
    }

    #[test]
    fn test_params_from_config() {
        let params = StrategyParams::from_config(&StrategyConfig::default()).unwrap();
        assert_eq!(params, StrategyParams::default());

        let bad = StrategyConfig {
            recent_week: "fifty".into(),
            ..Default::default()
        };
        assert!(matches!(
            StrategyParams::from_config(&bad),
            Err(ConfigError::Invalid { key: "strategy.recent_week", .. })
        ));
    }
}
