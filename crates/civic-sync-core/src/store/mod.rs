//! Backing-store abstraction.
//!
//! The [`TableStore`] trait is the whole surface the engine needs from a
//! remote entity table: a full scan, batch create, and batch update. The
//! store offers no transactions across calls and no uniqueness
//! enforcement; the engine is written against exactly that.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{FieldMap, RecordUpdate, RemoteRecord};

/// Abstract backing store holding one or more named entity tables.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`list_all_records`](TableStore::list_all_records) | Full scan of a table, all pages |
/// | [`batch_create`](TableStore::batch_create) | Create rows, returning their handles |
/// | [`batch_update`](TableStore::batch_update) | Patch named fields of existing rows |
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Short backend name for logs (`"airtable"`, `"sqlite"`, `"memory"`).
    fn backend_name(&self) -> &str;

    /// Return every record of `table`. Must terminate; any paging failure
    /// is returned as an error rather than a partial listing.
    async fn list_all_records(&self, table: &str) -> Result<Vec<RemoteRecord>>;

    /// Create one row per field map. The whole batch fails or succeeds.
    async fn batch_create(&self, table: &str, records: &[FieldMap]) -> Result<Vec<RemoteRecord>>;

    /// Patch existing rows: only the named fields are written.
    async fn batch_update(&self, table: &str, updates: &[RecordUpdate]) -> Result<()>;
}
