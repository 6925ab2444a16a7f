//! `aggsched check`: preview when a cron expression fires.

use chrono::{DateTime, Utc};

use aggsched_cron::next_fire_time;

pub fn run_check(expression: &str, count: usize) -> anyhow::Result<()> {
    let times = upcoming(expression, Utc::now(), count)?;
    println!("{expression}");
    for at in times {
        println!("  {}", aggsched_types::format_timestamp(at));
    }
    Ok(())
}

fn upcoming(
    expression: &str,
    from: DateTime<Utc>,
    count: usize,
) -> aggsched_cron::Result<Vec<DateTime<Utc>>> {
    let mut times = Vec::with_capacity(count);
    let mut cursor = from;
    for _ in 0..count {
        cursor = next_fire_time(expression, cursor)?;
        times.push(cursor);
    }
    Ok(times)
}
