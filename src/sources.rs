use anyhow::Result;

use crate::config::Config;
use crate::feeds::{Feed, FeedRegistry};

/// Health summary of one feed, as shown by `civsync feeds`.
#[derive(Debug, Clone)]
pub struct FeedStatus {
    pub name: String,
    pub feed_type: String,
    pub table: String,
    pub source: String,
    pub manage_status: bool,
    pub healthy: bool,
    pub notes: Option<String>,
}

pub fn feed_status(feed: &dyn Feed) -> FeedStatus {
    let job = feed.job();
    let health = feed.health();
    FeedStatus {
        name: feed.name().to_string(),
        feed_type: feed.feed_type().to_string(),
        table: job.table,
        source: job.source_id,
        manage_status: job.manage_status,
        healthy: health.is_ok(),
        notes: health.err().map(|e| format!("{:#}", e)),
    }
}

pub fn get_feeds(registry: &FeedRegistry) -> Vec<FeedStatus> {
    registry.feeds().iter().map(|f| feed_status(f.as_ref())).collect()
}

pub fn list_feeds(config: &Config) -> Result<()> {
    let registry = FeedRegistry::from_config(config);
    if registry.is_empty() {
        println!("No feeds configured.");
        return Ok(());
    }

    println!(
        "{:<16} {:<10} {:<24} {:<16} {:<8} HEALTHY",
        "FEED", "KIND", "TABLE", "SOURCE", "STATUS"
    );
    for s in get_feeds(&registry) {
        let status_mode = if s.manage_status { "managed" } else { "kept" };
        let healthy = match &s.notes {
            None => "true".to_string(),
            Some(note) => format!("false ({})", note),
        };
        println!(
            "{:<16} {:<10} {:<24} {:<16} {:<8} {}",
            s.name, s.feed_type, s.table, s.source, status_mode, healthy
        );
    }

    Ok(())
}
