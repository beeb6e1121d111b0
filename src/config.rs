use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use civic_sync_core::models::StatusLabels;
use civic_sync_core::plan::UpdateMode;
use civic_sync_core::sync::SyncSettings;

/// Airtable accepts at most this many records per write request.
pub const AIRTABLE_MAX_BATCH: usize = 10;
/// Airtable's largest list page.
pub const AIRTABLE_MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub airtable: Option<AirtableConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub feeds: BTreeMap<String, FeedConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Airtable,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Airtable => "airtable",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/civsync.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AirtableConfig {
    pub base_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_url() -> String {
    "https://api.airtable.com/v0".to_string()
}
fn default_api_key_env() -> String {
    "AIRTABLE_API_KEY".to_string()
}
fn default_page_size() -> usize {
    AIRTABLE_MAX_PAGE_SIZE
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_key_field")]
    pub key_field: String,
    #[serde(default = "default_source_field")]
    pub source_field: String,
    #[serde(default = "default_status_field")]
    pub status_field: String,
    #[serde(default = "default_active_value")]
    pub active_value: String,
    #[serde(default = "default_inactive_value")]
    pub inactive_value: String,
    #[serde(default)]
    pub placeholder_source: Option<String>,
    #[serde(default = "default_provenance_fields")]
    pub provenance_fields: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_true")]
    pub treat_empty_as_absent: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            key_field: default_key_field(),
            source_field: default_source_field(),
            status_field: default_status_field(),
            active_value: default_active_value(),
            inactive_value: default_inactive_value(),
            placeholder_source: None,
            provenance_fields: default_provenance_fields(),
            batch_size: default_batch_size(),
            treat_empty_as_absent: true,
        }
    }
}

impl SyncConfig {
    /// Engine settings for a [`Synchronizer`](civic_sync_core::sync::Synchronizer).
    pub fn to_settings(&self) -> SyncSettings {
        SyncSettings {
            key_field: self.key_field.clone(),
            source_field: self.source_field.clone(),
            status_field: self.status_field.clone(),
            labels: StatusLabels {
                active: self.active_value.clone(),
                inactive: self.inactive_value.clone(),
            },
            placeholder_source: self.placeholder_source.clone(),
            provenance_fields: self.provenance_fields.clone(),
            batch_size: self.batch_size,
            treat_empty_as_absent: self.treat_empty_as_absent,
        }
    }
}

fn default_key_field() -> String {
    "id".to_string()
}
fn default_source_field() -> String {
    "source".to_string()
}
fn default_status_field() -> String {
    "status".to_string()
}
fn default_active_value() -> String {
    "ACTIVE".to_string()
}
fn default_inactive_value() -> String {
    "INACTIVE".to_string()
}
fn default_provenance_fields() -> Vec<String> {
    vec!["source".to_string()]
}
fn default_batch_size() -> usize {
    civic_sync_core::writer::DEFAULT_BATCH_SIZE
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    JsonFile,
    HttpJson,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::JsonFile => "json_file",
            FeedKind::HttpJson => "http_json",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateModeConfig {
    #[default]
    Changed,
    Tracked,
}

impl From<UpdateModeConfig> for UpdateMode {
    fn from(mode: UpdateModeConfig) -> Self {
        match mode {
            UpdateModeConfig::Changed => UpdateMode::ChangedFields,
            UpdateModeConfig::Tracked => UpdateMode::TrackedFields,
        }
    }
}

/// One `[feeds.<name>]` entry.
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub table: String,
    /// Source tag written on owned rows. Defaults to the feed name.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: FeedKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    /// JSON pointer to the record array; the whole document when unset.
    #[serde(default)]
    pub records_pointer: Option<String>,
    /// Raw key holding a natural identifier.
    #[serde(default)]
    pub id_field: Option<String>,
    /// Raw keys hashed into a derived identifier, in order.
    #[serde(default)]
    pub id_parts: Vec<String>,
    #[serde(default)]
    pub id_prefix: String,
    #[serde(default)]
    pub normalize_id_parts: bool,
    /// Target column → raw key (or JSON pointer starting with `/`).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// Columns compared for updates. Defaults to every mapped column.
    #[serde(default)]
    pub tracked_fields: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub manage_status: bool,
    #[serde(default)]
    pub update_mode: UpdateModeConfig,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl FeedConfig {
    pub fn tracked(&self) -> Vec<String> {
        match &self.tracked_fields {
            Some(fields) => fields.clone(),
            None => self.fields.keys().cloned().collect(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let sync = &config.sync;

    // Engine columns
    for (name, value) in [
        ("sync.key_field", &sync.key_field),
        ("sync.source_field", &sync.source_field),
        ("sync.status_field", &sync.status_field),
        ("sync.active_value", &sync.active_value),
        ("sync.inactive_value", &sync.inactive_value),
    ] {
        if value.trim().is_empty() {
            bail!("{} must not be empty", name);
        }
    }
    if sync.key_field == sync.source_field
        || sync.key_field == sync.status_field
        || sync.source_field == sync.status_field
    {
        bail!("sync.key_field, sync.source_field and sync.status_field must be distinct");
    }
    if sync.active_value == sync.inactive_value {
        bail!("sync.active_value and sync.inactive_value must differ");
    }

    if sync.batch_size == 0 {
        bail!("sync.batch_size must be >= 1");
    }

    // Backend
    if config.store.backend == StoreBackend::Airtable {
        let airtable = match &config.airtable {
            Some(a) => a,
            None => bail!("[airtable] section is required when store.backend is 'airtable'"),
        };
        if airtable.base_id.trim().is_empty() {
            bail!("airtable.base_id must not be empty");
        }
        if airtable.page_size == 0 || airtable.page_size > AIRTABLE_MAX_PAGE_SIZE {
            bail!("airtable.page_size must be in [1, {}]", AIRTABLE_MAX_PAGE_SIZE);
        }
        if sync.batch_size > AIRTABLE_MAX_BATCH {
            bail!(
                "sync.batch_size must be <= {} with the airtable backend",
                AIRTABLE_MAX_BATCH
            );
        }
    }

    // Feeds
    for (name, feed) in &config.feeds {
        if feed.table.trim().is_empty() {
            bail!("feeds.{}.table must not be empty", name);
        }
        match feed.kind {
            FeedKind::JsonFile if feed.path.is_none() => {
                bail!("feeds.{}.path is required for kind 'json_file'", name)
            }
            FeedKind::HttpJson if feed.url.is_none() => {
                bail!("feeds.{}.url is required for kind 'http_json'", name)
            }
            _ => {}
        }
        match (&feed.id_field, feed.id_parts.is_empty()) {
            (Some(_), false) => bail!(
                "feeds.{}: set either id_field or id_parts, not both",
                name
            ),
            (None, true) => bail!("feeds.{}: one of id_field or id_parts is required", name),
            _ => {}
        }
        if let Some(pointer) = &feed.records_pointer {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                bail!("feeds.{}.records_pointer must be a JSON pointer starting with '/'", name);
            }
        }
        if !feed.fields.is_empty() {
            for required in &feed.required_fields {
                if !feed.fields.contains_key(required) {
                    bail!(
                        "feeds.{}.required_fields names '{}', which is not a mapped field",
                        name,
                        required
                    );
                }
            }
        }
        for tracked in feed.tracked() {
            if tracked == sync.key_field || tracked == sync.status_field {
                bail!(
                    "feeds.{}.tracked_fields must not include the engine column '{}'",
                    name,
                    tracked
                );
            }
        }
    }

    Ok(())
}
