//! Status reconciliation: soft-deactivate what disappeared, reactivate
//! what came back.
//!
//! Rows are never deleted. A row absent from the latest fetch of its
//! source is flipped to the inactive label; a row present again is
//! flipped back to active. Changes are only emitted when the stored status
//! differs from the computed one, so a second run over the same fetch
//! emits nothing.

use std::collections::HashSet;

use crate::mirror::Mirror;
use crate::models::StatusLabels;

/// A planned write of the status column of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub identifier: String,
    pub handle: String,
    pub from: Option<String>,
    pub to: String,
}

impl StatusChange {
    pub fn is_deactivation(&self, labels: &StatusLabels) -> bool {
        self.to == labels.inactive
    }
}

/// Inputs describing what the latest fetch contained.
#[derive(Debug, Clone, Default)]
pub struct FetchedIds {
    /// Identifiers fetched with a usable attribute bag.
    pub present: HashSet<String>,
    /// Identifiers fetched but whose attribute bag was empty.
    pub empty: HashSet<String>,
}

/// Compute status transitions for every row of `mirror`.
///
/// When `treat_empty_as_absent` is set, an identifier that was fetched
/// with an empty bag is handled as if it had not been fetched at all;
/// otherwise it keeps (or regains) the active status.
///
/// Output is sorted by identifier.
pub fn compute_status_changes(
    mirror: &Mirror,
    fetched: &FetchedIds,
    labels: &StatusLabels,
    treat_empty_as_absent: bool,
) -> Vec<StatusChange> {
    let mut changes = Vec::new();

    for (identifier, entry) in mirror.sorted_entries() {
        let present = fetched.present.contains(identifier)
            || (!treat_empty_as_absent && fetched.empty.contains(identifier));
        let target = if present {
            &labels.active
        } else {
            &labels.inactive
        };

        if entry.status.as_deref() == Some(target.as_str()) {
            continue;
        }

        changes.push(StatusChange {
            identifier: identifier.to_string(),
            handle: entry.handle.clone(),
            from: entry.status.clone(),
            to: target.clone(),
        });
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorScope;
    use crate::models::{FieldMap, FieldValue, RemoteRecord};

    fn mirror(rows: &[(&str, Option<&str>)]) -> Mirror {
        let scope = MirrorScope {
            key_field: "id".into(),
            source_field: "source".into(),
            status_field: "status".into(),
            source_filter: None,
            placeholder_sources: vec![],
            fingerprint_fields: vec![],
        };
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (id, status))| {
                let mut fields = FieldMap::new();
                fields.insert("id".into(), FieldValue::Text(id.to_string()));
                if let Some(s) = status {
                    fields.insert("status".into(), FieldValue::Text(s.to_string()));
                }
                RemoteRecord {
                    handle: format!("rec{}", i),
                    fields,
                }
            })
            .collect();
        Mirror::from_records("orgs", records, &scope)
    }

    fn ids(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn absent_rows_are_deactivated() {
        let m = mirror(&[("A", Some("ACTIVE")), ("B", Some("ACTIVE"))]);
        let fetched = FetchedIds {
            present: ids(&["B"]),
            empty: HashSet::new(),
        };
        let changes = compute_status_changes(&m, &fetched, &StatusLabels::default(), true);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].identifier, "A");
        assert_eq!(changes[0].to, "INACTIVE");
        assert!(changes[0].is_deactivation(&StatusLabels::default()));
    }

    #[test]
    fn reappearing_rows_are_reactivated() {
        let m = mirror(&[("A", Some("INACTIVE")), ("B", None)]);
        let fetched = FetchedIds {
            present: ids(&["A", "B"]),
            empty: HashSet::new(),
        };
        let changes = compute_status_changes(&m, &fetched, &StatusLabels::default(), true);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.to == "ACTIVE"));
        assert_eq!(changes[0].from.as_deref(), Some("INACTIVE"));
        assert_eq!(changes[1].from, None);
    }

    #[test]
    fn matching_status_emits_nothing() {
        let m = mirror(&[("A", Some("INACTIVE")), ("B", Some("ACTIVE"))]);
        let fetched = FetchedIds {
            present: ids(&["B"]),
            empty: HashSet::new(),
        };
        assert!(compute_status_changes(&m, &fetched, &StatusLabels::default(), true).is_empty());
    }

    #[test]
    fn empty_fetch_policy_is_respected() {
        let m = mirror(&[("A", Some("ACTIVE"))]);
        let fetched = FetchedIds {
            present: HashSet::new(),
            empty: ids(&["A"]),
        };
        let labels = StatusLabels::default();
        assert_eq!(compute_status_changes(&m, &fetched, &labels, true).len(), 1);
        assert!(compute_status_changes(&m, &fetched, &labels, false).is_empty());
    }
}
