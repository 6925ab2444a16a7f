//! `aggsched jobs`: print the stored jobs.

use aggsched_config::AggSchedConfig;
use aggsched_storage::{JobStore, SqliteJobStore};
use aggsched_types::JobSummary;

pub async fn run_jobs(config: &AggSchedConfig) -> anyhow::Result<()> {
    let store = SqliteJobStore::open(&config.sqlite.db_path()?)?;
    let jobs: Vec<JobSummary> = store
        .list_jobs()
        .await?
        .into_iter()
        .map(JobSummary::from)
        .collect();

    if jobs.is_empty() {
        println!("No jobs stored.");
        return Ok(());
    }
    print!("{}", render_table(&jobs));
    Ok(())
}

const HEADERS: [&str; 8] = [
    "ID", "NAME", "SCHEDULE", "ENABLED", "METRIC", "DURATION", "LAST RUN", "NEXT RUN",
];

fn render_table(jobs: &[JobSummary]) -> String {
    let rows: Vec<[String; 8]> = jobs
        .iter()
        .map(|job| {
            [
                job.id.to_string(),
                job.name.clone(),
                job.cron_expression.clone(),
                if job.enabled { "yes" } else { "no" }.to_string(),
                format!("{}({}.{})", job.aggregation, job.table, job.field),
                format!("{} by {}", job.duration, job.duration_filter),
                or_dash(&job.last_run),
                or_dash(&job.next_run),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = render_line(&HEADERS, &widths);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        out.push_str(&render_line(&cells, &widths));
    }
    out
}

fn render_line(cells: &[&str], widths: &[usize]) -> String {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    format!("{}\n", line.join("  ").trim_end())
}

fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: i64, name: &str, enabled: bool, last_run: &str) -> JobSummary {
        JobSummary {
            id,
            name: name.into(),
            cron_expression: "*/5 * * * *".into(),
            enabled,
            table: "registration".into(),
            field: "weight".into(),
            aggregation: "avg".into(),
            duration: "today".into(),
            duration_filter: "timestamp".into(),
            created_at: "2024-01-01 00:00:00".into(),
            last_run: last_run.into(),
            next_run: "2024-01-01 00:05:00".into(),
        }
    }

    #[test]
    fn test_render_table() {
        let table = render_table(&[
            summary(1, "avg weight", true, ""),
            summary(12, "w", false, "2024-01-01 00:00:00"),
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID  NAME"));
        assert!(lines[1].contains("avg(registration.weight)"));
        assert!(lines[1].contains("today by timestamp"));
        assert!(lines[1].contains(" - "));
        assert!(lines[2].starts_with("12"));
        assert!(lines[2].contains(" no "));
        // Columns line up under their headers
        let name_col = lines[0].find("NAME").unwrap();
        assert_eq!(lines[1].find("avg weight"), Some(name_col));
    }
}
