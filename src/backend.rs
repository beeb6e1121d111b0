//! Backing-store selection.

use anyhow::{Context, Result};
use std::sync::Arc;

use civic_sync_core::store::TableStore;

use crate::airtable::AirtableStore;
use crate::config::{Config, StoreBackend};
use crate::db;
use crate::sqlite_store::SqliteTableStore;

/// Build the store named by `[store] backend`.
pub async fn create_store(config: &Config) -> Result<Arc<dyn TableStore>> {
    match config.store.backend {
        StoreBackend::Sqlite => {
            let pool = db::connect(config).await?;
            Ok(Arc::new(SqliteTableStore::new(pool)))
        }
        StoreBackend::Airtable => {
            let airtable = config
                .airtable
                .as_ref()
                .context("[airtable] section is required when store.backend is 'airtable'")?;
            Ok(Arc::new(AirtableStore::from_config(airtable)?))
        }
    }
}
