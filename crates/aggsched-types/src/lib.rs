use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ──────────────────── Timestamps ────────────────────

/// Textual timestamp format shared with previously stored job rows.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC instant as `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Empty strings (a job that never ran) yield `None`.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if text.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

// ──────────────────── Job Types ────────────────────

/// Identity assigned to a job by the store at creation time.
pub type JobId = i64;

/// SQL aggregate applied to the job's field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Min,
    Max,
    Avg,
    Count,
}

impl Aggregation {
    pub const ALL: [Aggregation; 4] = [
        Aggregation::Min,
        Aggregation::Max,
        Aggregation::Avg,
        Aggregation::Count,
    ];

    /// Lowercase name, as persisted and accepted in requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
        }
    }

    /// SQL aggregate keyword.
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
            Aggregation::Avg => "AVG",
            Aggregation::Count => "COUNT",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Aggregation::ALL
            .into_iter()
            .find(|agg| agg.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidAggregation(s.to_string()))
    }
}

/// A persisted aggregation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Human label, not unique.
    pub name: String,
    /// 5-field, 6-field (with seconds) or `@descriptor` expression.
    pub cron_expression: String,
    /// `false` means logically deleted.
    pub enabled: bool,
    pub table: String,
    pub field: String,
    pub aggregation: Aggregation,
    /// Duration category; kept as text so unknown stored values surface at firing time.
    pub duration: String,
    /// Timestamp-bearing column bounding the query window.
    pub duration_filter: String,
    pub created_at: String,
    /// Empty until the first firing.
    pub last_run: String,
    pub next_run: String,
}

/// Listing shape returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub table: String,
    pub field: String,
    pub aggregation: String,
    pub duration: String,
    pub duration_filter: String,
    pub created_at: String,
    pub last_run: String,
    pub next_run: String,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            cron_expression: job.cron_expression.clone(),
            enabled: job.enabled,
            table: job.table.clone(),
            field: job.field.clone(),
            aggregation: job.aggregation.to_string(),
            duration: job.duration.clone(),
            duration_filter: job.duration_filter.clone(),
            created_at: job.created_at.clone(),
            last_run: job.last_run.clone(),
            next_run: job.next_run.clone(),
        }
    }
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        JobSummary::from(&job)
    }
}

// ──────────────────── Requests ────────────────────

/// Job creation request as received from the HTTP layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub aggregation: String,
    #[serde(default)]
    pub duration_filter: String,
    #[serde(default)]
    pub duration_option: String,
    #[serde(default)]
    pub cron_schedule: String,
}

impl CreateJobRequest {
    /// Check the request against the metric catalog.
    pub fn validate(&self, catalog: &MetricCatalog) -> Result<JobSpec, ValidationError> {
        catalog.validate(self)
    }
}

/// A job definition that passed catalog validation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub name: String,
    pub cron_expression: String,
    pub table: String,
    pub field: String,
    pub aggregation: Aggregation,
    pub duration: String,
    pub duration_filter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid table: {0}")]
    InvalidTable(String),
    #[error("invalid field '{field}' for table '{table}'")]
    InvalidField { table: String, field: String },
    #[error("invalid aggregation: {0}")]
    InvalidAggregation(String),
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("invalid duration filter '{filter}' for table '{table}'")]
    InvalidDurationFilter { table: String, filter: String },
}

// ──────────────────── Metric Catalog ────────────────────

/// Duration options accepted by default.
pub const DURATION_OPTIONS: [&str; 6] = [
    "today",
    "yesterday",
    "last_7_days",
    "last_30_days",
    "recent_week",
    "daily",
];

/// One aggregatable table and what may be asked of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub table: String,
    pub fields: Vec<String>,
    pub aggregations: Vec<String>,
    pub duration_filter: Vec<String>,
    pub durations: Vec<String>,
}

/// Closed allow-list of tables, fields and options a job may reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricCatalog {
    pub metrics: Vec<MetricConfig>,
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self {
            metrics: vec![MetricConfig {
                table: "registration".to_string(),
                fields: vec!["weight".to_string()],
                aggregations: Aggregation::ALL.iter().map(|a| a.to_string()).collect(),
                duration_filter: vec!["timestamp".to_string()],
                durations: DURATION_OPTIONS.iter().map(|d| d.to_string()).collect(),
            }],
        }
    }
}

impl MetricCatalog {
    pub fn find(&self, table: &str) -> Option<&MetricConfig> {
        self.metrics.iter().find(|m| m.table == table)
    }

    /// Enforce the allow-list on a creation request.
    pub fn validate(&self, request: &CreateJobRequest) -> Result<JobSpec, ValidationError> {
        let metric = self
            .find(&request.table)
            .ok_or_else(|| ValidationError::InvalidTable(request.table.clone()))?;

        if !metric.fields.iter().any(|f| f == &request.field) {
            return Err(ValidationError::InvalidField {
                table: request.table.clone(),
                field: request.field.clone(),
            });
        }

        let aggregation: Aggregation = request.aggregation.parse()?;
        if !metric.aggregations.iter().any(|a| a == aggregation.as_str()) {
            return Err(ValidationError::InvalidAggregation(request.aggregation.clone()));
        }

        if !metric.durations.iter().any(|d| d == &request.duration_option) {
            return Err(ValidationError::InvalidDuration(request.duration_option.clone()));
        }

        if !metric.duration_filter.iter().any(|f| f == &request.duration_filter) {
            return Err(ValidationError::InvalidDurationFilter {
                table: request.table.clone(),
                filter: request.duration_filter.clone(),
            });
        }

        Ok(JobSpec {
            name: request.name.clone(),
            cron_expression: request.cron_schedule.clone(),
            table: request.table.clone(),
            field: request.field.clone(),
            aggregation,
            duration: request.duration_option.clone(),
            duration_filter: request.duration_filter.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request() -> CreateJobRequest {
        CreateJobRequest {
            name: "avg weight".into(),
            table: "registration".into(),
            field: "weight".into(),
            aggregation: "avg".into(),
            duration_filter: "timestamp".into(),
            duration_option: "today".into(),
            cron_schedule: "*/5 * * * *".into(),
        }
    }

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2022, 12, 22, 8, 5, 9).unwrap();
        assert_eq!(format_timestamp(at), "2022-12-22 08:05:09");
        assert_eq!(parse_timestamp("2022-12-22 08:05:09"), Some(at));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2022-12-22T08:05:09Z"), None);
    }

    #[test]
    fn test_aggregation_keywords() {
        assert_eq!("avg".parse::<Aggregation>().unwrap().sql_keyword(), "AVG");
        assert_eq!("count".parse::<Aggregation>().unwrap(), Aggregation::Count);
        assert!("AVG".parse::<Aggregation>().is_err());
        assert_eq!(serde_json::to_string(&Aggregation::Max).unwrap(), "\"max\"");
    }

    #[test]
    fn test_validate_accepts_default_catalog_request() {
        let spec = request().validate(&MetricCatalog::default()).unwrap();
        assert_eq!(spec.aggregation, Aggregation::Avg);
        assert_eq!(spec.duration, "today");
        assert_eq!(spec.cron_expression, "*/5 * * * *");
    }

    #[test]
    fn test_validate_rejects_unknown_values() {
        let catalog = MetricCatalog::default();

        let mut req = request();
        req.table = "users".into();
        assert_eq!(
            req.validate(&catalog),
            Err(ValidationError::InvalidTable("users".into()))
        );

        let mut req = request();
        req.field = "height".into();
        assert!(matches!(
            req.validate(&catalog),
            Err(ValidationError::InvalidField { .. })
        ));

        let mut req = request();
        req.aggregation = "sum".into();
        assert_eq!(
            req.validate(&catalog),
            Err(ValidationError::InvalidAggregation("sum".into()))
        );

        let mut req = request();
        req.duration_option = "monthly".into();
        assert_eq!(
            req.validate(&catalog),
            Err(ValidationError::InvalidDuration("monthly".into()))
        );

        let mut req = request();
        req.duration_filter = "1=1; DROP TABLE cron_jobs".into();
        assert!(matches!(
            req.validate(&catalog),
            Err(ValidationError::InvalidDurationFilter { .. })
        ));
    }

    #[test]
    fn test_catalog_serializes_as_list() {
        let json = serde_json::to_value(MetricCatalog::default()).unwrap();
        assert_eq!(json[0]["table"], "registration");
        assert_eq!(json[0]["durations"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_create_request_wire_names() {
        let json = r#"{"name":"n","table":"registration","field":"weight","aggregation":"min",
            "duration_filter":"timestamp","duration_option":"daily","cron_schedule":"@hourly"}"#;
        let req: CreateJobRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.duration_option, "daily");
        assert_eq!(req.cron_schedule, "@hourly");
    }
}
