//! Export an entity table as a static JSON dump.
//!
//! Produces a document with every row of the table (optionally one
//! source only), suitable for publishing as a static data file next to
//! the curated search and map views.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use civic_sync_core::models::{field_map_to_json, FieldValue, RemoteRecord};

use crate::backend;
use crate::config::Config;

#[derive(Serialize)]
struct ExportData<'a> {
    table: &'a str,
    source: Option<&'a str>,
    exported_at: String,
    records: Vec<ExportRecord>,
}

#[derive(Serialize)]
struct ExportRecord {
    id: String,
    source: Option<String>,
    status: Option<String>,
    fields: Value,
}

/// Rows of `records` owned by `source` (every row when `None`), sorted by
/// identifier.
fn export_records(records: &[RemoteRecord], source: Option<&str>, config: &Config) -> Vec<ExportRecord> {
    let sync = &config.sync;
    let mut out: Vec<ExportRecord> = records
        .iter()
        .filter_map(|record| {
            let text = |name: &str| {
                record
                    .fields
                    .get(name)
                    .filter(|v| !v.is_empty())
                    .map(FieldValue::as_plain_string)
            };
            let row_source = text(&sync.source_field);
            if source.is_some() && row_source.as_deref() != source {
                return None;
            }
            let id = text(&sync.key_field)?;
            let mut fields = record.fields.clone();
            fields.remove(&sync.key_field);
            fields.remove(&sync.source_field);
            fields.remove(&sync.status_field);
            Some(ExportRecord {
                id,
                source: row_source,
                status: text(&sync.status_field),
                fields: field_map_to_json(&fields),
            })
        })
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

/// Export a table as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(
    config: &Config,
    table: &str,
    source: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let store = backend::create_store(config).await?;
    let records = store
        .list_all_records(table)
        .await
        .with_context(|| format!("Failed to list table '{}'", table))?;

    let records = export_records(&records, source, config);
    let count = records.len();
    let data = ExportData {
        table,
        source,
        exported_at: chrono::Utc::now().to_rfc3339(),
        records,
    };
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!("Exported {} records from {} to {}", count, table, path.display());
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_sync_core::models::FieldMap;

    fn record(handle: &str, id: Option<&str>, source: &str) -> RemoteRecord {
        let mut fields = FieldMap::new();
        if let Some(id) = id {
            fields.insert("id".into(), FieldValue::Text(id.into()));
        }
        fields.insert("source".into(), FieldValue::Text(source.into()));
        fields.insert("status".into(), FieldValue::Text("ACTIVE".into()));
        fields.insert("name".into(), FieldValue::Text(format!("name {}", handle)));
        RemoteRecord {
            handle: handle.into(),
            fields,
        }
    }

    #[test]
    fn filters_by_source_and_sorts_by_id() {
        let config: Config = toml::from_str("").unwrap();
        let records = vec![
            record("rec1", Some("b"), "shil"),
            record("rec2", Some("a"), "shil"),
            record("rec3", Some("c"), "guidestar"),
            record("rec4", None, "shil"),
        ];

        let all = export_records(&records, None, &config);
        assert_eq!(all.len(), 3);

        let shil = export_records(&records, Some("shil"), &config);
        let ids: Vec<&str> = shil.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(shil[0].status.as_deref(), Some("ACTIVE"));
        assert_eq!(shil[0].fields["name"], "name rec2");
        assert!(shil[0].fields.get("id").is_none());
    }
}
