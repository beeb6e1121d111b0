//! Full outer join of the current snapshot with a fetched sequence.
//!
//! Key selection: the mirror is keyed by its business-key column, fetched
//! records by their identifier. Row order: fetched records in fetch order
//! first, then mirror-only entries sorted by identifier.

use std::collections::HashSet;

use crate::mirror::{Mirror, MirrorEntry};
use crate::models::{FetchedRecord, FieldMap};

/// One row of the join.
#[derive(Debug, Clone, Copy)]
pub struct JoinRow<'a> {
    pub identifier: &'a str,
    pub current: Option<&'a MirrorEntry>,
    pub fetched: Option<&'a FieldMap>,
}

impl<'a> JoinRow<'a> {
    pub fn is_new(&self) -> bool {
        self.current.is_none() && self.fetched.is_some()
    }

    pub fn is_missing(&self) -> bool {
        self.current.is_some() && self.fetched.is_none()
    }
}

/// Join `current` with `fetched`. `fetched` is expected to be free of
/// duplicate identifiers; see [`crate::plan::dedup_fetched`].
pub fn outer_join<'a>(current: &'a Mirror, fetched: &'a [FetchedRecord]) -> Vec<JoinRow<'a>> {
    let mut rows = Vec::with_capacity(fetched.len() + current.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(fetched.len());

    for record in fetched {
        seen.insert(record.identifier.as_str());
        rows.push(JoinRow {
            identifier: record.identifier.as_str(),
            current: current.get(&record.identifier),
            fetched: Some(&record.fields),
        });
    }

    for (identifier, entry) in current.sorted_entries() {
        if seen.contains(identifier) {
            continue;
        }
        rows.push(JoinRow {
            identifier,
            current: Some(entry),
            fetched: None,
        });
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorScope;
    use crate::models::{FieldValue, RemoteRecord};

    fn mirror_with(ids: &[&str]) -> Mirror {
        let scope = MirrorScope {
            key_field: "id".into(),
            source_field: "source".into(),
            status_field: "status".into(),
            source_filter: None,
            placeholder_sources: vec![],
            fingerprint_fields: vec![],
        };
        let records = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut fields = FieldMap::new();
                fields.insert("id".into(), FieldValue::Text(id.to_string()));
                RemoteRecord {
                    handle: format!("rec{}", i),
                    fields,
                }
            })
            .collect();
        Mirror::from_records("orgs", records, &scope)
    }

    fn fetched(id: &str) -> FetchedRecord {
        FetchedRecord {
            identifier: id.to_string(),
            fields: FieldMap::new(),
        }
    }

    #[test]
    fn join_partitions_new_matched_and_missing() {
        let mirror = mirror_with(&["A", "B"]);
        let batch = vec![fetched("B"), fetched("C")];
        let rows = outer_join(&mirror, &batch);

        let ids: Vec<&str> = rows.iter().map(|r| r.identifier).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
        assert!(!rows[0].is_new() && !rows[0].is_missing());
        assert!(rows[1].is_new());
        assert!(rows[2].is_missing());
    }
}
