//! Table statistics.
//!
//! Counts the rows of one entity table per source and status, and shows
//! when each source was last synchronized. Used by `civsync stats` to
//! confirm that passes land where expected.

use anyhow::{Context, Result};
use sqlx::Row;
use std::collections::BTreeMap;

use civic_sync_core::models::{FieldMap, FieldValue};

use crate::backend;
use crate::config::Config;
use crate::db;
use crate::migrate;

/// Per-source breakdown of one table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub active: usize,
    pub inactive: usize,
    /// Rows whose status is missing or not one of the two labels.
    pub other: usize,
}

impl SourceStats {
    pub fn total(&self) -> usize {
        self.active + self.inactive + self.other
    }
}

/// Group rows by source, counting statuses. Sorted by source.
pub fn summarize<'a, I>(rows: I, config: &Config) -> Vec<SourceStats>
where
    I: IntoIterator<Item = &'a FieldMap>,
{
    let sync = &config.sync;
    let mut by_source: BTreeMap<String, SourceStats> = BTreeMap::new();

    for fields in rows {
        let source = text(fields.get(&sync.source_field)).unwrap_or_else(|| "(none)".to_string());
        let status = text(fields.get(&sync.status_field));
        let entry = by_source.entry(source.clone()).or_insert_with(|| SourceStats {
            source,
            ..Default::default()
        });
        match status.as_deref() {
            Some(s) if s == sync.active_value => entry.active += 1,
            Some(s) if s == sync.inactive_value => entry.inactive += 1,
            _ => entry.other += 1,
        }
    }

    by_source.into_values().collect()
}

fn text(value: Option<&FieldValue>) -> Option<String> {
    match value {
        None => None,
        Some(v) if v.is_empty() => None,
        Some(FieldValue::List(items)) => items.first().cloned(),
        Some(v) => Some(v.as_plain_string()),
    }
}

/// Run the stats command: scan the table and print a summary.
pub async fn run_stats(config: &Config, table: &str) -> Result<()> {
    let store = backend::create_store(config).await?;
    let records = store
        .list_all_records(table)
        .await
        .with_context(|| format!("Failed to list table '{}'", table))?;
    let stats = summarize(records.iter().map(|r| &r.fields), config);

    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;
    let last_runs = sqlx::query(
        "SELECT source, MAX(finished_at) AS last_sync FROM sync_runs \
         WHERE table_name = ? GROUP BY source",
    )
    .bind(table)
    .fetch_all(&pool)
    .await?;
    let last_sync = |source: &str| -> Option<i64> {
        last_runs
            .iter()
            .find(|row| row.get::<String, _>("source") == source)
            .and_then(|row| row.get::<Option<i64>, _>("last_sync"))
    };

    println!("Civic Sync: {}", table);
    println!("{}", "=".repeat(12 + table.len()));
    println!();
    println!("  Backend:     {}", store.backend_name());
    println!("  Records:     {}", records.len());

    if !stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<24} {:>8} {:>8} {:>8} {:>8}   {}",
            "SOURCE", "TOTAL", config.sync.active_value, config.sync.inactive_value, "OTHER", "LAST SYNC"
        );
        println!("  {}", "-".repeat(84));
        for s in &stats {
            let sync_display = match last_sync(&s.source) {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>8} {:>8} {:>8} {:>8}   {}",
                s.source,
                s.total(),
                s.active,
                s.inactive,
                s.other,
                sync_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
