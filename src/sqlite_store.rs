//! SQLite-backed [`TableStore`] implementation.
//!
//! A local entity store with the same contract as the remote one: rows
//! are addressed by an opaque handle, fields are an open JSON object, and
//! every batch succeeds or fails as a whole. Useful for offline runs and
//! for staging a feed before pointing it at Airtable.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use civic_sync_core::models::{
    field_map_from_json, field_map_to_json, FieldMap, RecordUpdate, RemoteRecord,
};
use civic_sync_core::store::TableStore;

/// SQLite implementation of the [`TableStore`] trait.
///
/// Wraps a [`SqlitePool`] over the schema created by
/// [`ensure_schema`](crate::migrate::ensure_schema) (`entity_tables`,
/// `records`).
pub struct SqliteTableStore {
    pool: SqlitePool,
}

impl SqliteTableStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Make `table` known to the store. Idempotent.
    pub async fn register_table(&self, table: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO entity_tables (name, created_at) VALUES (?, ?)")
            .bind(table)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn table_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM entity_tables ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    async fn ensure_table(&self, table: &str) -> Result<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM entity_tables WHERE name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            bail!("unknown table '{}' (run `civsync init` to register it)", table);
        }
        Ok(())
    }
}

fn new_handle() -> String {
    format!("rec{}", Uuid::new_v4().simple())
}

fn decode_fields(handle: &str, json: &str) -> Result<FieldMap> {
    let value: serde_json::Value = serde_json::from_str(json)
        .with_context(|| format!("corrupt fields for record {}", handle))?;
    Ok(field_map_from_json(&value))
}

#[async_trait]
impl TableStore for SqliteTableStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn list_all_records(&self, table: &str) -> Result<Vec<RemoteRecord>> {
        self.ensure_table(table).await?;

        let rows = sqlx::query(
            "SELECT handle, fields_json FROM records WHERE table_name = ? ORDER BY rowid",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let handle: String = row.get("handle");
                let json: String = row.get("fields_json");
                let fields = decode_fields(&handle, &json)?;
                Ok(RemoteRecord { handle, fields })
            })
            .collect()
    }

    async fn batch_create(&self, table: &str, records: &[FieldMap]) -> Result<Vec<RemoteRecord>> {
        self.ensure_table(table).await?;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(records.len());

        for fields in records {
            let handle = new_handle();
            let json = serde_json::to_string(&field_map_to_json(fields))?;
            sqlx::query(
                "INSERT INTO records (handle, table_name, fields_json, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&handle)
            .bind(table)
            .bind(&json)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            created.push(RemoteRecord {
                handle,
                fields: fields.clone(),
            });
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn batch_update(&self, table: &str, updates: &[RecordUpdate]) -> Result<()> {
        self.ensure_table(table).await?;

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let current: Option<String> = sqlx::query_scalar(
                "SELECT fields_json FROM records WHERE handle = ? AND table_name = ?",
            )
            .bind(&update.handle)
            .bind(table)
            .fetch_optional(&mut *tx)
            .await?;

            // Dropping `tx` on error rolls back the whole batch.
            let current = match current {
                Some(json) => json,
                None => bail!("record {} not found in table '{}'", update.handle, table),
            };

            let mut fields = decode_fields(&update.handle, &current)?;
            for (name, value) in &update.fields {
                fields.insert(name.clone(), value.clone());
            }

            sqlx::query("UPDATE records SET fields_json = ?, updated_at = ? WHERE handle = ?")
                .bind(serde_json::to_string(&field_map_to_json(&fields))?)
                .bind(now)
                .bind(&update.handle)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
