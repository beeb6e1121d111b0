use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::{Config, StoreBackend};
use crate::db;
use crate::sqlite_store::SqliteTableStore;

/// Create the local schema and, for the sqlite backend, register every
/// table a feed writes to. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<Vec<String>> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;

    let mut registered = Vec::new();
    if config.store.backend == StoreBackend::Sqlite {
        let store = SqliteTableStore::new(pool.clone());
        for feed in config.feeds.values() {
            if !registered.contains(&feed.table) {
                store.register_table(&feed.table).await?;
                registered.push(feed.table.clone());
            }
        }
    }

    pool.close().await;
    Ok(registered)
}

/// Idempotent DDL for the local database.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // Entity tables known to the sqlite backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_tables (
            name TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rows of every entity table, fields stored as a JSON object
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            handle TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            fields_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (table_name) REFERENCES entity_tables(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per completed synchronization pass, any backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id TEXT PRIMARY KEY,
            table_name TEXT NOT NULL,
            source TEXT NOT NULL,
            backend TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            fetched INTEGER NOT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            unchanged INTEGER NOT NULL,
            deactivated INTEGER NOT NULL,
            reactivated INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            failed INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_table ON records(table_name)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_runs_scope ON sync_runs(table_name, source, finished_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
