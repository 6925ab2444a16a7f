//! aggsched-storage: SQLite-based persistence for aggregation jobs.
//!
//! Job definitions live in the `cron_jobs` table next to the metric tables
//! they aggregate, so the same connection also runs the generated queries.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;

use aggsched_types::{Aggregation, Job, JobId};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Job {0} not found")]
    NotFound(JobId),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One result row of an aggregation query, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Fields of a job that does not have an identity yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub name: String,
    pub cron_expression: String,
    pub table: String,
    pub field: String,
    pub aggregation: Aggregation,
    pub duration: String,
    pub duration_filter: String,
    pub created_at: String,
    pub next_run: String,
}

/// Partial update of a stored job. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub enabled: Option<bool>,
    pub last_run: Option<String>,
    pub next_run: Option<String>,
}

impl JobUpdate {
    pub fn disable() -> Self {
        Self {
            enabled: Some(false),
            ..Default::default()
        }
    }

    pub fn next_run(next_run: impl Into<String>) -> Self {
        Self {
            next_run: Some(next_run.into()),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.last_run.is_none() && self.next_run.is_none()
    }
}

/// Persistence operations the scheduler depends on.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All jobs with `enabled = true`.
    async fn list_enabled_jobs(&self) -> Result<Vec<Job>>;

    /// All jobs, enabled or not.
    async fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Insert a job and return it with its assigned identity.
    async fn create_job(&self, job: NewJob) -> Result<Job>;

    /// Look up a job by identity.
    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Apply a partial update. Fails with `NotFound` if no row matched.
    async fn update_job_fields(&self, id: JobId, update: JobUpdate) -> Result<()>;

    /// Run a generated aggregation query and collect its rows.
    async fn run_aggregation_query(&self, sql: &str) -> Result<Vec<Row>>;
}

const SCHEMA: &str = r#"CREATE TABLE IF NOT EXISTS cron_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    enabled NUMERIC NOT NULL DEFAULT true,
    "table" TEXT NOT NULL,
    field TEXT NOT NULL,
    aggregation TEXT NOT NULL,
    duration TEXT NOT NULL,
    duration_filter TEXT NOT NULL,
    created_at DATETIME,
    last_run DATETIME,
    next_run DATETIME
);"#;

const JOB_COLUMNS: &str = r#"id, name, cron_expression, enabled, "table", field, aggregation, duration, duration_filter, created_at, last_run, next_run"#;

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Job store opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run arbitrary statements, e.g. to create or seed metric tables.
    pub async fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await?
    }

    async fn query_jobs(&self, filter: &'static str) -> Result<Vec<Job>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt =
                conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM cron_jobs {filter} ORDER BY id"))?;
            let jobs = stmt
                .query_map([], job_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(jobs)
        })
        .await?
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn list_enabled_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs("WHERE enabled = 1").await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs("").await
    }

    async fn create_job(&self, job: NewJob) -> Result<Job> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                r#"INSERT INTO cron_jobs
                    (name, cron_expression, enabled, "table", field, aggregation, duration, duration_filter, created_at, last_run, next_run)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6, ?7, ?8, '', ?9)"#,
                rusqlite::params![
                    job.name,
                    job.cron_expression,
                    job.table,
                    job.field,
                    job.aggregation.as_str(),
                    job.duration,
                    job.duration_filter,
                    job.created_at,
                    job.next_run,
                ],
            )?;
            let id = conn.last_insert_rowid();
            tracing::debug!(job_id = id, name = %job.name, "Job row inserted");
            Ok(Job {
                id,
                name: job.name,
                cron_expression: job.cron_expression,
                enabled: true,
                table: job.table,
                field: job.field,
                aggregation: job.aggregation,
                duration: job.duration,
                duration_filter: job.duration_filter,
                created_at: job.created_at,
                last_run: String::new(),
                next_run: job.next_run,
            })
        })
        .await?
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let job = conn
                .query_row(
                    &format!("SELECT {JOB_COLUMNS} FROM cron_jobs WHERE id = ?1"),
                    rusqlite::params![id],
                    job_from_row,
                )
                .optional()?;
            Ok(job)
        })
        .await?
    }

    async fn update_job_fields(&self, id: JobId, update: JobUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut assignments = Vec::new();
            let mut values: Vec<SqlValue> = Vec::new();
            if let Some(enabled) = update.enabled {
                assignments.push("enabled = ?");
                values.push(SqlValue::Integer(enabled as i64));
            }
            if let Some(last_run) = update.last_run {
                assignments.push("last_run = ?");
                values.push(SqlValue::Text(last_run));
            }
            if let Some(next_run) = update.next_run {
                assignments.push("next_run = ?");
                values.push(SqlValue::Text(next_run));
            }
            values.push(SqlValue::Integer(id));

            let sql = format!("UPDATE cron_jobs SET {} WHERE id = ?", assignments.join(", "));
            let conn = conn.blocking_lock();
            let changed = conn.execute(&sql, rusqlite::params_from_iter(values))?;
            if changed == 0 {
                return Err(StorageError::NotFound(id));
            }
            Ok(())
        })
        .await?
    }

    async fn run_aggregation_query(&self, sql: &str) -> Result<Vec<Row>> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query([])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut object = Row::new();
                for (idx, column) in columns.iter().enumerate() {
                    object.insert(column.clone(), json_value(row.get_ref(idx)?));
                }
                out.push(object);
            }
            Ok(out)
        })
        .await?
    }
}

fn job_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let aggregation: String = row.get(6)?;
    let aggregation = aggregation
        .parse::<Aggregation>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        cron_expression: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        table: row.get(4)?,
        field: row.get(5)?,
        aggregation,
        duration: row.get(7)?,
        duration_filter: row.get(8)?,
        created_at: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        last_run: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        next_run: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
    })
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}
