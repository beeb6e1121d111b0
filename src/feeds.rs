//! Fetch collaborators ("feeds") and their registry.
//!
//! A feed knows one external source: how to fetch its raw records, how to
//! derive each record's identifier, and how to map a raw record to an
//! attribute bag for one entity table. The engine does the rest.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │             FeedRegistry             │
//! │  ┌──────────────┐  ┌──────────────┐  │
//! │  │  JsonFeed    │  │   Custom     │  │
//! │  │ file / http  │  │   (Rust)     │  │
//! │  └──────────────┘  └──────────────┘  │
//! └──────────────────┬───────────────────┘
//!                    ▼
//!     run_sync() → Synchronizer::synchronize
//! ```
//!
//! # Usage
//!
//! ```rust
//! use civic_sync::feeds::FeedRegistry;
//!
//! let mut feeds = FeedRegistry::new();
//! // feeds.register(Box::new(MyFeed::new()));
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use civic_sync_core::models::FieldMap;
use civic_sync_core::sync::SyncJob;

use crate::config::{Config, FeedConfig, FeedKind};
use crate::mapping::{records_at, FieldMapping, IdentityRule};

/// A source of fetched records for one entity table.
///
/// # Lifecycle
///
/// 1. The feed is registered via [`FeedRegistry::register`].
/// 2. [`fetch`](Feed::fetch) is called once per `civsync sync <name>`.
/// 3. Each raw record goes through [`map_record`](Feed::map_record) and
///    the resulting bags are reconciled against [`job`](Feed::job)'s table.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use civic_sync::feeds::Feed;
/// use civic_sync_core::models::{field_map_from_json, FieldMap};
/// use civic_sync_core::sync::SyncJob;
///
/// pub struct ClinicsFeed;
///
/// #[async_trait]
/// impl Feed for ClinicsFeed {
///     fn name(&self) -> &str { "clinics" }
///     fn description(&self) -> &str { "Ministry of Health clinic list" }
///
///     fn job(&self) -> SyncJob {
///         SyncJob::new("Branches", "moh-clinics").tracked_fields(["name", "address"])
///     }
///
///     async fn fetch(&self) -> Result<Vec<(String, Value)>> {
///         Ok(vec![("moh-1".into(), json!({ "name": "Clinic", "address": "Main St 1" }))])
///     }
///
///     fn map_record(&self, raw: &Value) -> Option<FieldMap> {
///         Some(field_map_from_json(raw))
///     }
/// }
/// ```
#[async_trait]
pub trait Feed: Send + Sync {
    /// Feed name, as used on the command line.
    fn name(&self) -> &str;

    /// One-line description for `civsync feeds`.
    fn description(&self) -> &str;

    /// Feed type (`"json_file"`, `"http_json"`, `"custom"`).
    fn feed_type(&self) -> &str {
        "custom"
    }

    /// Table, source tag and status policy of this feed's passes.
    fn job(&self) -> SyncJob;

    /// Whether the feed looks runnable, with a reason when it does not.
    fn health(&self) -> Result<()> {
        Ok(())
    }

    /// Fetch every current record as `(identifier, raw record)`.
    ///
    /// Must return the complete set: with status management on, anything
    /// missing is deactivated.
    async fn fetch(&self) -> Result<Vec<(String, Value)>>;

    /// Map a raw record to its attribute bag; `None` skips the record.
    fn map_record(&self, raw: &Value) -> Option<FieldMap>;
}

/// Config-driven feed over a JSON document, read from disk or over HTTP.
pub struct JsonFeed {
    name: String,
    description: String,
    config: FeedConfig,
    identity: IdentityRule,
    mapping: FieldMapping,
}

impl JsonFeed {
    pub fn new(name: String, config: FeedConfig) -> Self {
        let description = config.description.clone().unwrap_or_else(|| match config.kind {
            FeedKind::JsonFile => format!(
                "JSON file {}",
                config
                    .path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
            FeedKind::HttpJson => format!("JSON over HTTP {}", config.url.as_deref().unwrap_or("")),
        });
        Self {
            identity: IdentityRule::from_config(&config),
            mapping: FieldMapping::from_config(&config),
            name,
            description,
            config,
        }
    }

    pub fn source_id(&self) -> &str {
        self.config.source.as_deref().unwrap_or(&self.name)
    }

    async fn load_document(&self) -> Result<Value> {
        match self.config.kind {
            FeedKind::JsonFile => {
                let path = match &self.config.path {
                    Some(p) => p,
                    None => bail!("feed '{}' has no path", self.name),
                };
                let content = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read feed file: {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse feed file: {}", path.display()))
            }
            FeedKind::HttpJson => {
                let url = match &self.config.url {
                    Some(u) => u,
                    None => bail!("feed '{}' has no url", self.name),
                };
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(self.config.timeout_secs))
                    .build()?;
                let response = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("Failed to fetch {}", url))?
                    .error_for_status()
                    .with_context(|| format!("Failed to fetch {}", url))?;
                response
                    .json()
                    .await
                    .with_context(|| format!("Invalid JSON from {}", url))
            }
        }
    }
}

#[async_trait]
impl Feed for JsonFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn feed_type(&self) -> &str {
        self.config.kind.as_str()
    }

    fn job(&self) -> SyncJob {
        SyncJob::new(self.config.table.clone(), self.source_id())
            .tracked_fields(self.config.tracked())
            .manage_status(self.config.manage_status)
            .update_mode(self.config.update_mode.into())
    }

    fn health(&self) -> Result<()> {
        match self.config.kind {
            FeedKind::JsonFile => match &self.config.path {
                Some(p) if p.exists() => Ok(()),
                Some(p) => bail!("file not found: {}", p.display()),
                None => bail!("no path"),
            },
            FeedKind::HttpJson => match &self.config.url {
                Some(u) => reqwest::Url::parse(u)
                    .map(|_| ())
                    .with_context(|| format!("invalid url: {}", u)),
                None => bail!("no url"),
            },
        }
    }

    async fn fetch(&self) -> Result<Vec<(String, Value)>> {
        let document = self.load_document().await?;
        let records = records_at(document, self.config.records_pointer.as_deref())
            .with_context(|| format!("feed '{}'", self.name))?;
        Ok(records
            .into_iter()
            .map(|raw| (self.identity.identifier(&raw), raw))
            .collect())
    }

    fn map_record(&self, raw: &Value) -> Option<FieldMap> {
        self.mapping.map(raw)
    }
}

/// Registry for feeds (config-driven and custom).
///
/// Use [`FeedRegistry::from_config`] to create a registry pre-loaded with
/// every `[feeds.<name>]` entry, then optionally call
/// [`register`](FeedRegistry::register) to add custom ones.
pub struct FeedRegistry {
    feeds: Vec<Box<dyn Feed>>,
}

impl FeedRegistry {
    /// Create an empty feed registry.
    pub fn new() -> Self {
        Self { feeds: Vec::new() }
    }

    /// Create a registry holding one [`JsonFeed`] per configured feed.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for (name, feed) in &config.feeds {
            registry.register(Box::new(JsonFeed::new(name.clone(), feed.clone())));
        }
        registry
    }

    /// Register a feed. A later feed with the same name shadows an earlier one.
    pub fn register(&mut self, feed: Box<dyn Feed>) {
        self.feeds.retain(|f| f.name() != feed.name());
        self.feeds.push(feed);
    }

    pub fn feeds(&self) -> &[Box<dyn Feed>] {
        &self.feeds
    }

    pub fn find(&self, name: &str) -> Option<&dyn Feed> {
        self.feeds
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.feeds.iter().map(|f| f.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }
}

impl Default for FeedRegistry {
    fn default() -> Self {
        Self::new()
    }
}
