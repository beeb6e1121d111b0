//! Remote table mirror.
//!
//! A full scan of one backing table, indexed by business identifier and
//! scoped to one source. The mirror is the "current" side of every join;
//! a pass is only ever planned against a complete mirror.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::identity::content_fingerprint;
use crate::models::{FieldMap, FieldValue};
use crate::store::TableStore;

/// Which rows of a table a pass may see, and where the engine's own
/// columns live.
#[derive(Debug, Clone)]
pub struct MirrorScope {
    /// Column holding the business identifier.
    pub key_field: String,
    /// Column holding the owning source tag.
    pub source_field: String,
    /// Column holding the lifecycle status.
    pub status_field: String,
    /// Only rows owned by this source (or a placeholder) are retained.
    /// `None` retains every row.
    pub source_filter: Option<String>,
    /// Source values treated as owned by whichever source is filtering.
    pub placeholder_sources: Vec<String>,
    /// Fields folded into each entry's fingerprint.
    pub fingerprint_fields: Vec<String>,
}

impl MirrorScope {
    fn admits(&self, source: Option<&str>) -> bool {
        match &self.source_filter {
            None => true,
            Some(wanted) => match source {
                Some(s) => s == wanted || self.placeholder_sources.iter().any(|p| p == s),
                None => false,
            },
        }
    }
}

/// One row of the mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEntry {
    /// Store-assigned handle, used only to target updates.
    pub handle: String,
    pub fields: FieldMap,
    pub source: Option<String>,
    pub status: Option<String>,
    pub fingerprint: String,
}

/// In-memory index of a remote table keyed by business identifier.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    table: String,
    entries: HashMap<String, MirrorEntry>,
    fingerprint_fields: Vec<String>,
    /// Rows sharing an identifier with an earlier row (ignored).
    pub duplicate_rows: usize,
    /// Rows without a usable identifier (ignored).
    pub unkeyed_rows: usize,
    /// Rows hidden by the source filter.
    pub foreign_rows: usize,
}

impl Mirror {
    /// An empty mirror for `table`, as if the table had no rows.
    pub fn empty(table: &str, fingerprint_fields: Vec<String>) -> Self {
        Self {
            table: table.to_string(),
            fingerprint_fields,
            ..Default::default()
        }
    }

    /// Build a mirror from already-fetched records.
    pub fn from_records(
        table: &str,
        records: Vec<crate::models::RemoteRecord>,
        scope: &MirrorScope,
    ) -> Self {
        let mut mirror = Self::empty(table, scope.fingerprint_fields.clone());

        for record in records {
            let source = text_of(record.fields.get(&scope.source_field));
            if !scope.admits(source.as_deref()) {
                mirror.foreign_rows += 1;
                continue;
            }

            let key = match text_of(record.fields.get(&scope.key_field)) {
                Some(k) if !k.trim().is_empty() => k,
                _ => {
                    mirror.unkeyed_rows += 1;
                    continue;
                }
            };

            if mirror.entries.contains_key(&key) {
                warn!(
                    table = table,
                    identifier = %key,
                    handle = %record.handle,
                    "duplicate identifier in remote table; keeping first row"
                );
                mirror.duplicate_rows += 1;
                continue;
            }

            let status = text_of(record.fields.get(&scope.status_field));
            let fingerprint = content_fingerprint(
                &record.fields,
                &scope.fingerprint_fields,
                source.as_deref().unwrap_or(""),
                status.as_deref().unwrap_or(""),
            );
            mirror.entries.insert(
                key,
                MirrorEntry {
                    handle: record.handle,
                    fields: record.fields,
                    source,
                    status,
                    fingerprint,
                },
            );
        }

        mirror
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fingerprint_fields(&self) -> &[String] {
        &self.fingerprint_fields
    }

    pub fn get(&self, identifier: &str) -> Option<&MirrorEntry> {
        self.entries.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by identifier, for deterministic iteration.
    pub fn sorted_entries(&self) -> Vec<(&str, &MirrorEntry)> {
        let mut entries: Vec<(&str, &MirrorEntry)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// Page through the whole of `table` and build its mirror.
///
/// Any listing failure aborts the load: a partial mirror would make every
/// unseen row look absent and get deactivated.
pub async fn load_mirror(store: &dyn TableStore, table: &str, scope: &MirrorScope) -> Result<Mirror> {
    let records = store
        .list_all_records(table)
        .await
        .with_context(|| format!("failed to list records of table '{}'", table))?;
    let total = records.len();
    let mirror = Mirror::from_records(table, records, scope);
    debug!(
        table = table,
        backend = store.backend_name(),
        total,
        retained = mirror.len(),
        foreign = mirror.foreign_rows,
        unkeyed = mirror.unkeyed_rows,
        duplicates = mirror.duplicate_rows,
        "mirror loaded"
    );
    Ok(mirror)
}

fn text_of(value: Option<&FieldValue>) -> Option<String> {
    match value {
        None | Some(FieldValue::Null) => None,
        Some(FieldValue::List(items)) => items.first().cloned(),
        Some(other) => Some(other.as_plain_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteRecord;
    use crate::store::memory::InMemoryTableStore;

    fn scope(filter: Option<&str>) -> MirrorScope {
        MirrorScope {
            key_field: "id".into(),
            source_field: "source".into(),
            status_field: "status".into(),
            source_filter: filter.map(str::to_string),
            placeholder_sources: vec!["placeholder".into()],
            fingerprint_fields: vec!["name".into()],
        }
    }

    fn row(handle: &str, id: Option<&str>, source: &str, name: &str) -> RemoteRecord {
        let mut fields = FieldMap::new();
        if let Some(id) = id {
            fields.insert("id".into(), FieldValue::Text(id.into()));
        }
        fields.insert("source".into(), FieldValue::Text(source.into()));
        fields.insert("status".into(), FieldValue::Text("ACTIVE".into()));
        fields.insert("name".into(), FieldValue::Text(name.into()));
        RemoteRecord {
            handle: handle.into(),
            fields,
        }
    }

    #[test]
    fn source_filter_hides_other_sources_but_keeps_placeholders() {
        let mirror = Mirror::from_records(
            "orgs",
            vec![
                row("rec1", Some("a"), "shil", "A"),
                row("rec2", Some("b"), "guidestar", "B"),
                row("rec3", Some("c"), "placeholder", "C"),
            ],
            &scope(Some("shil")),
        );
        assert_eq!(mirror.len(), 2);
        assert!(mirror.contains("a"));
        assert!(mirror.contains("c"));
        assert_eq!(mirror.foreign_rows, 1);
    }

    #[test]
    fn no_filter_keeps_everything() {
        let mirror = Mirror::from_records(
            "orgs",
            vec![
                row("rec1", Some("a"), "shil", "A"),
                row("rec2", Some("b"), "guidestar", "B"),
            ],
            &scope(None),
        );
        assert_eq!(mirror.len(), 2);
    }

    #[test]
    fn duplicates_keep_first_and_unkeyed_rows_are_counted() {
        let mirror = Mirror::from_records(
            "orgs",
            vec![
                row("rec1", Some("a"), "shil", "First"),
                row("rec2", Some("a"), "shil", "Second"),
                row("rec3", None, "shil", "No key"),
            ],
            &scope(Some("shil")),
        );
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror.get("a").unwrap().handle, "rec1");
        assert_eq!(mirror.duplicate_rows, 1);
        assert_eq!(mirror.unkeyed_rows, 1);
    }

    #[test]
    fn entries_capture_status_and_fingerprint() {
        let mirror = Mirror::from_records(
            "orgs",
            vec![row("rec1", Some("a"), "shil", "A")],
            &scope(Some("shil")),
        );
        let entry = mirror.get("a").unwrap();
        assert_eq!(entry.status.as_deref(), Some("ACTIVE"));
        assert_eq!(entry.source.as_deref(), Some("shil"));
        assert_eq!(
            entry.fingerprint,
            content_fingerprint(&entry.fields, &["name".to_string()], "shil", "ACTIVE")
        );
    }

    #[tokio::test]
    async fn listing_failure_aborts_load() {
        let store = InMemoryTableStore::new();
        store.create_table("orgs");
        store.set_fail_listing(true);
        let result = load_mirror(&store, "orgs", &scope(Some("shil"))).await;
        assert!(result.is_err());
    }
}
