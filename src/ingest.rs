//! Sync orchestration for the CLI.
//!
//! Resolves which feeds to run, builds the configured backing store and a
//! [`Synchronizer`] over it, then runs one pass per feed:
//! fetch → map → plan → reconcile → write. Each completed pass is
//! recorded in the local `sync_runs` table.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use civic_sync_core::progress::SyncProgressReporter;
use civic_sync_core::sync::{SyncPreview, SyncReport, Synchronizer};

use crate::backend;
use crate::config::Config;
use crate::db;
use crate::feeds::{Feed, FeedRegistry};
use crate::migrate;
use crate::progress::ProgressMode;

/// Run `civsync sync <target>` over the feeds defined in the config.
pub async fn run_sync(
    config: &Config,
    target: &str,
    dry_run: bool,
    keep_missing: bool,
    progress: ProgressMode,
) -> Result<()> {
    let feeds = FeedRegistry::from_config(config);
    run_sync_with_extensions(
        config,
        target,
        dry_run,
        keep_missing,
        &feeds,
        progress.reporter(),
    )
    .await?;
    Ok(())
}

/// Run a sync with a caller-supplied feed registry (built-in and custom).
///
/// `target` is a feed name or `all`. Returns one report per pass that was
/// written; a dry run writes nothing and returns no reports. A failing feed
/// does not stop the feeds after it; the call then returns an error naming
/// every feed that failed.
pub async fn run_sync_with_extensions(
    config: &Config,
    target: &str,
    dry_run: bool,
    keep_missing: bool,
    feeds: &FeedRegistry,
    progress: Arc<dyn SyncProgressReporter>,
) -> Result<Vec<SyncReport>> {
    let selected = select_feeds(feeds, target)?;

    let store = backend::create_store(config).await?;
    let synchronizer =
        Synchronizer::new(store, config.sync.to_settings()).with_progress(progress);

    let pool = db::connect(config).await?;
    migrate::ensure_schema(&pool).await?;

    let total = selected.len();
    let mut reports = Vec::new();
    let mut failures: Vec<(String, anyhow::Error)> = Vec::new();
    for feed in selected {
        match sync_feed(&synchronizer, &pool, feed, dry_run, keep_missing).await {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(feed = feed.name(), error = %message, "feed pass failed");
                eprintln!("sync {} failed: {}", feed.name(), message);
                failures.push((feed.name().to_string(), e));
            }
        }
    }

    pool.close().await;

    if failures.is_empty() {
        return Ok(reports);
    }
    let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
    let summary = format!(
        "{} of {} feeds failed: {}",
        failures.len(),
        total,
        names.join(", ")
    );
    let (_, first) = failures.remove(0);
    Err(first.context(summary))
}

/// One pass for one feed. Returns `None` for a dry run.
async fn sync_feed(
    synchronizer: &Synchronizer,
    pool: &SqlitePool,
    feed: &dyn Feed,
    dry_run: bool,
    keep_missing: bool,
) -> Result<Option<SyncReport>> {
    let mut job = feed.job();
    if keep_missing {
        job.manage_status = false;
    }

    let started_at = chrono::Utc::now().timestamp();
    let fetched = feed
        .fetch()
        .await
        .with_context(|| format!("feed '{}' failed to fetch", feed.name()))?;

    if dry_run {
        let preview = synchronizer
            .preview(&job, fetched, |raw| feed.map_record(raw))
            .await?;
        print_preview(feed.name(), &preview);
        return Ok(None);
    }

    let report = synchronizer
        .synchronize(&job, fetched, |raw| feed.map_record(raw))
        .await?;
    record_run(
        pool,
        &report,
        synchronizer.store().backend_name(),
        started_at,
    )
    .await?;
    print_report(feed.name(), &report);
    Ok(Some(report))
}

fn select_feeds<'a>(feeds: &'a FeedRegistry, target: &str) -> Result<Vec<&'a dyn Feed>> {
    if feeds.is_empty() {
        bail!("No feeds configured. Add a [feeds.<name>] section to the config.");
    }
    if target == "all" {
        return Ok(feeds.feeds().iter().map(|f| f.as_ref()).collect());
    }
    match feeds.find(target) {
        Some(feed) => Ok(vec![feed]),
        None => bail!(
            "Unknown feed: '{}'. Available: all, {}",
            target,
            feeds.names().join(", ")
        ),
    }
}

fn print_report(feed: &str, report: &SyncReport) {
    println!("sync {} → {}", feed, report.table);
    println!("  fetched: {}", report.fetched);
    println!("  created: {}", report.created);
    println!("  updated: {}", report.updated);
    println!("  unchanged: {}", report.unchanged);
    println!("  deactivated: {}", report.deactivated);
    println!("  reactivated: {}", report.reactivated);
    println!("  skipped: {}", report.skipped);
    if report.duplicates > 0 {
        println!("  duplicates: {}", report.duplicates);
    }
    if report.remote_duplicates > 0 {
        println!("  duplicate table rows: {}", report.remote_duplicates);
    }
    if report.is_clean() {
        println!("ok");
    } else {
        println!("  failed records: {}", report.failed_records);
        for batch in &report.failed_batches {
            println!(
                "    {:?} batch of {}: {}",
                batch.kind,
                batch.identifiers.len(),
                batch.error
            );
        }
        println!("partial");
    }
}

fn print_preview(feed: &str, preview: &SyncPreview) {
    println!("sync {} → {} (dry-run)", feed, preview.table);
    println!("  fetched: {}", preview.fetched);
    println!("  mirrored: {}", preview.mirrored);
    println!("  would create: {}", preview.creates);
    println!("  would update: {}", preview.updates);
    println!("  unchanged: {}", preview.unchanged);
    println!("  would deactivate: {}", preview.deactivations);
    println!("  would reactivate: {}", preview.reactivations);
    println!("  skipped: {}", preview.skipped);
    if preview.remote_duplicates > 0 {
        println!("  duplicate table rows: {}", preview.remote_duplicates);
    }
}

async fn record_run(
    pool: &SqlitePool,
    report: &SyncReport,
    backend: &str,
    started_at: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_runs (id, table_name, source, backend, started_at, finished_at,
                               fetched, created, updated, unchanged, deactivated,
                               reactivated, skipped, failed)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&report.table)
    .bind(&report.source)
    .bind(backend)
    .bind(started_at)
    .bind(chrono::Utc::now().timestamp())
    .bind(report.fetched as i64)
    .bind(report.created as i64)
    .bind(report.updated as i64)
    .bind(report.unchanged as i64)
    .bind(report.deactivated as i64)
    .bind(report.reactivated as i64)
    .bind(report.skipped as i64)
    .bind(report.failed_records as i64)
    .execute(pool)
    .await?;

    Ok(())
}
