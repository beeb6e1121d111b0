//! Diff & upsert planning.
//!
//! Joins fetched attribute bags against the mirror and decides, per
//! identifier, whether to create, update, or skip:
//!
//! | Case | Decision |
//! |------|----------|
//! | identifier not in mirror | create with `source` and active status |
//! | in mirror, fingerprint unchanged | skip |
//! | in mirror, only provenance fields differ | skip |
//! | in mirror, other fields differ | update |
//! | attribute bag missing or empty | skip with a warning |
//!
//! Status transitions are not planned here; see [`crate::reconcile`].

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::diff::changed_fields;
use crate::identity::content_fingerprint;
use crate::join::outer_join;
use crate::mirror::Mirror;
use crate::models::{FetchedRecord, FieldMap, FieldValue, StatusLabels};
use crate::reconcile::FetchedIds;

/// Which fields an update carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Only the fields that differ.
    #[default]
    ChangedFields,
    /// Every tracked field present in the fetched bag.
    TrackedFields,
}

/// Caller policy for one planning pass.
#[derive(Debug, Clone)]
pub struct PlanPolicy {
    pub key_field: String,
    pub source_field: String,
    pub status_field: String,
    /// Source tag written on creates and compared on updates.
    pub source_value: String,
    pub labels: StatusLabels,
    /// Fields compared for updates. Empty means every field of the bag.
    pub tracked_fields: Vec<String>,
    /// Fields whose difference alone never justifies a write.
    pub provenance_fields: Vec<String>,
    pub update_mode: UpdateMode,
}

/// Create a new row.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOp {
    pub identifier: String,
    pub fields: FieldMap,
}

/// Patch an existing row.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOp {
    pub identifier: String,
    pub handle: String,
    pub fields: FieldMap,
}

/// Why a fetched record was not planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyAttributes,
    MissingIdentifier,
}

/// A fetched record that produced no operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub identifier: String,
    pub reason: SkipReason,
}

/// Outcome of [`plan`].
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub creates: Vec<CreateOp>,
    pub updates: Vec<UpdateOp>,
    /// Identifiers already in sync.
    pub unchanged: Vec<String>,
    /// Identifiers whose only difference was a provenance field.
    pub provenance_only: Vec<String>,
    pub skipped: Vec<SkippedRecord>,
    /// Identifiers fetched more than once; the last occurrence won.
    pub duplicates: Vec<String>,
    /// Identifiers processed, for status reconciliation.
    pub fetched_ids: FetchedIds,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty()
    }

    /// Count of fetched records that needed no write.
    pub fn skipped_unchanged(&self) -> usize {
        self.unchanged.len() + self.provenance_only.len()
    }
}

/// Result of [`dedup_fetched`].
#[derive(Debug, Default)]
pub struct DedupedFetch {
    pub records: Vec<FetchedRecord>,
    pub duplicates: Vec<String>,
    pub skipped: Vec<SkippedRecord>,
}

/// Drop unusable records and resolve duplicate identifiers.
///
/// Records with an empty identifier or a missing/empty bag are skipped.
/// Among the rest, the last occurrence of an identifier wins but keeps the
/// position of the first, so output order is deterministic.
pub fn dedup_fetched<I>(fetched: I) -> DedupedFetch
where
    I: IntoIterator<Item = (String, Option<FieldMap>)>,
{
    let mut out = DedupedFetch::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (identifier, fields) in fetched {
        if identifier.trim().is_empty() {
            warn!("fetched record without identifier; skipping");
            out.skipped.push(SkippedRecord {
                identifier,
                reason: SkipReason::MissingIdentifier,
            });
            continue;
        }

        let fields = match fields {
            Some(f) if f.values().any(|v| !v.is_empty()) => f,
            _ => {
                warn!(identifier = %identifier, "fetched record has no attributes; skipping");
                out.skipped.push(SkippedRecord {
                    identifier,
                    reason: SkipReason::EmptyAttributes,
                });
                continue;
            }
        };

        match index.get(&identifier) {
            Some(&pos) => {
                warn!(identifier = %identifier, "identifier fetched more than once; last occurrence wins");
                out.duplicates.push(identifier);
                out.records[pos].fields = fields;
            }
            None => {
                index.insert(identifier.clone(), out.records.len());
                out.records.push(FetchedRecord { identifier, fields });
            }
        }
    }

    out
}

/// Plan creates and updates for `fetched` against `mirror`.
pub fn plan<I>(mirror: &Mirror, fetched: I, policy: &PlanPolicy) -> Plan
where
    I: IntoIterator<Item = (String, Option<FieldMap>)>,
{
    let deduped = dedup_fetched(fetched);
    let mut plan = Plan {
        duplicates: deduped.duplicates,
        skipped: deduped.skipped,
        ..Default::default()
    };

    let present: HashSet<&str> = deduped
        .records
        .iter()
        .map(|r| r.identifier.as_str())
        .collect();
    for skipped in &plan.skipped {
        if skipped.reason == SkipReason::EmptyAttributes
            && !present.contains(skipped.identifier.as_str())
        {
            plan.fetched_ids.empty.insert(skipped.identifier.clone());
        }
    }

    let use_fingerprint = !policy.tracked_fields.is_empty()
        && mirror.fingerprint_fields() == policy.tracked_fields.as_slice();

    for row in outer_join(mirror, &deduped.records) {
        let data = match row.fetched {
            Some(data) => data,
            None => continue,
        };
        plan.fetched_ids.present.insert(row.identifier.to_string());

        let entry = match row.current {
            None => {
                plan.creates
                    .push(create_op(row.identifier, data, policy));
                continue;
            }
            Some(entry) => entry,
        };

        if use_fingerprint {
            let desired = content_fingerprint(
                data,
                &policy.tracked_fields,
                &policy.source_value,
                &policy.labels.active,
            );
            if desired == entry.fingerprint {
                plan.unchanged.push(row.identifier.to_string());
                continue;
            }
        }

        let mut desired = desired_fields(data, policy);
        let compared: Vec<String> = desired.keys().cloned().collect();
        let changed = changed_fields(&entry.fields, &desired, &compared);
        let material = changed
            .iter()
            .any(|name| !policy.provenance_fields.contains(name));

        if !material {
            if changed.is_empty() {
                plan.unchanged.push(row.identifier.to_string());
            } else {
                plan.provenance_only.push(row.identifier.to_string());
            }
            continue;
        }

        if policy.update_mode == UpdateMode::ChangedFields {
            desired.retain(|name, _| changed.contains(name));
        }
        plan.updates.push(UpdateOp {
            identifier: row.identifier.to_string(),
            handle: entry.handle.clone(),
            fields: desired,
        });
    }

    plan
}

/// The tracked subset of `data` plus the source column.
fn desired_fields(data: &FieldMap, policy: &PlanPolicy) -> FieldMap {
    let mut desired: FieldMap = if policy.tracked_fields.is_empty() {
        data.clone()
    } else {
        policy
            .tracked_fields
            .iter()
            .filter_map(|name| data.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    };
    // The engine owns these columns.
    desired.remove(&policy.key_field);
    desired.remove(&policy.status_field);
    desired.insert(
        policy.source_field.clone(),
        FieldValue::Text(policy.source_value.clone()),
    );
    desired
}

fn create_op(identifier: &str, data: &FieldMap, policy: &PlanPolicy) -> CreateOp {
    let mut fields: FieldMap = data
        .iter()
        .filter(|(_, v)| !matches!(v, FieldValue::Null))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    fields.insert(
        policy.key_field.clone(),
        FieldValue::Text(identifier.to_string()),
    );
    fields.insert(
        policy.source_field.clone(),
        FieldValue::Text(policy.source_value.clone()),
    );
    fields.insert(
        policy.status_field.clone(),
        FieldValue::Text(policy.labels.active.clone()),
    );
    CreateOp {
        identifier: identifier.to_string(),
        fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorScope;
    use crate::models::RemoteRecord;

    fn policy(tracked: &[&str]) -> PlanPolicy {
        PlanPolicy {
            key_field: "id".into(),
            source_field: "source".into(),
            status_field: "status".into(),
            source_value: "shil".into(),
            labels: StatusLabels::default(),
            tracked_fields: tracked.iter().map(|s| s.to_string()).collect(),
            provenance_fields: vec!["source".into()],
            update_mode: UpdateMode::ChangedFields,
        }
    }

    fn mirror(rows: &[(&str, &str, &str)], tracked: &[&str]) -> Mirror {
        let scope = MirrorScope {
            key_field: "id".into(),
            source_field: "source".into(),
            status_field: "status".into(),
            source_filter: None,
            placeholder_sources: vec![],
            fingerprint_fields: tracked.iter().map(|s| s.to_string()).collect(),
        };
        let records = rows
            .iter()
            .enumerate()
            .map(|(i, (id, source, name))| {
                let mut fields = FieldMap::new();
                fields.insert("id".into(), FieldValue::Text(id.to_string()));
                fields.insert("source".into(), FieldValue::Text(source.to_string()));
                fields.insert("status".into(), FieldValue::Text("ACTIVE".into()));
                fields.insert("name".into(), FieldValue::Text(name.to_string()));
                RemoteRecord {
                    handle: format!("rec{}", i),
                    fields,
                }
            })
            .collect();
        Mirror::from_records("orgs", records, &scope)
    }

    fn bag(name: &str) -> Option<FieldMap> {
        let mut f = FieldMap::new();
        f.insert("name".into(), FieldValue::Text(name.into()));
        Some(f)
    }

    #[test]
    fn partitions_creates_updates_and_unchanged() {
        let m = mirror(&[("A", "shil", "a"), ("B", "shil", "b")], &["name"]);
        let p = plan(
            &m,
            vec![("B".to_string(), bag("b")), ("C".to_string(), bag("c"))],
            &policy(&["name"]),
        );
        assert_eq!(p.creates.len(), 1);
        assert_eq!(p.creates[0].identifier, "C");
        assert_eq!(p.creates[0].fields["status"], FieldValue::Text("ACTIVE".into()));
        assert_eq!(p.creates[0].fields["source"], FieldValue::Text("shil".into()));
        assert_eq!(p.creates[0].fields["id"], FieldValue::Text("C".into()));
        assert!(p.updates.is_empty());
        assert_eq!(p.unchanged, vec!["B"]);
        assert!(p.fetched_ids.present.contains("B"));
        assert!(p.fetched_ids.present.contains("C"));
        assert!(!p.fetched_ids.present.contains("A"));
    }

    #[test]
    fn text_moving_across_a_field_boundary_is_an_update() {
        let tracked = ["street", "number"];
        let scope = MirrorScope {
            key_field: "id".into(),
            source_field: "source".into(),
            status_field: "status".into(),
            source_filter: None,
            placeholder_sources: vec![],
            fingerprint_fields: tracked.iter().map(|s| s.to_string()).collect(),
        };
        let mut stored = FieldMap::new();
        stored.insert("id".into(), FieldValue::Text("A".into()));
        stored.insert("source".into(), FieldValue::Text("shil".into()));
        stored.insert("status".into(), FieldValue::Text("ACTIVE".into()));
        stored.insert("street".into(), FieldValue::Text("Herzl 1".into()));
        stored.insert("number".into(), FieldValue::Text("2".into()));
        let m = Mirror::from_records(
            "branches",
            vec![RemoteRecord {
                handle: "rec0".into(),
                fields: stored,
            }],
            &scope,
        );

        let mut fetched = FieldMap::new();
        fetched.insert("street".into(), FieldValue::Text("Herzl".into()));
        fetched.insert("number".into(), FieldValue::Text("12".into()));
        let p = plan(&m, vec![("A".to_string(), Some(fetched))], &policy(&tracked));

        assert!(p.unchanged.is_empty());
        assert_eq!(p.updates.len(), 1);
        assert_eq!(p.updates[0].fields["street"], FieldValue::Text("Herzl".into()));
        assert_eq!(p.updates[0].fields["number"], FieldValue::Text("12".into()));
    }

    #[test]
    fn changed_tracked_field_produces_minimal_update() {
        let m = mirror(&[("org-1", "shil", "Old Name")], &["name"]);
        let p = plan(
            &m,
            vec![("org-1".to_string(), bag("New Name"))],
            &policy(&["name"]),
        );
        assert_eq!(p.updates.len(), 1);
        let update = &p.updates[0];
        assert_eq!(update.handle, "rec0");
        assert_eq!(update.fields.len(), 1);
        assert_eq!(update.fields["name"], FieldValue::Text("New Name".into()));
    }

    #[test]
    fn provenance_only_change_is_skipped() {
        let m = mirror(&[("A", "placeholder", "a")], &["name"]);
        let p = plan(&m, vec![("A".to_string(), bag("a"))], &policy(&["name"]));
        assert!(p.updates.is_empty());
        assert_eq!(p.provenance_only, vec!["A"]);
    }

    #[test]
    fn provenance_travels_with_a_material_change() {
        let m = mirror(&[("A", "placeholder", "a")], &["name"]);
        let p = plan(&m, vec![("A".to_string(), bag("b"))], &policy(&["name"]));
        assert_eq!(p.updates.len(), 1);
        assert_eq!(p.updates[0].fields["source"], FieldValue::Text("shil".into()));
        assert_eq!(p.updates[0].fields["name"], FieldValue::Text("b".into()));
    }

    #[test]
    fn tracked_mode_sends_every_tracked_field() {
        let m = mirror(&[("A", "shil", "a")], &["name", "phone"]);
        let mut data = FieldMap::new();
        data.insert("name".into(), FieldValue::Text("b".into()));
        data.insert("phone".into(), FieldValue::Text("03-555".into()));
        let mut pol = policy(&["name", "phone"]);
        pol.update_mode = UpdateMode::TrackedFields;
        let p = plan(&m, vec![("A".to_string(), Some(data))], &pol);
        assert_eq!(p.updates.len(), 1);
        assert_eq!(p.updates[0].fields.len(), 3); // name, phone, source
    }

    #[test]
    fn untracked_fields_do_not_trigger_updates() {
        let m = mirror(&[("A", "shil", "a")], &["name"]);
        let mut data = FieldMap::new();
        data.insert("name".into(), FieldValue::Text("a".into()));
        data.insert("comment".into(), FieldValue::Text("new comment".into()));
        let p = plan(&m, vec![("A".to_string(), Some(data))], &policy(&["name"]));
        assert!(p.updates.is_empty());
        assert_eq!(p.unchanged, vec!["A"]);
    }

    #[test]
    fn empty_bags_and_missing_identifiers_are_skipped() {
        let m = mirror(&[("A", "shil", "a")], &["name"]);
        let mut blank = FieldMap::new();
        blank.insert("name".into(), FieldValue::Null);
        let p = plan(
            &m,
            vec![
                ("A".to_string(), None),
                ("B".to_string(), Some(blank)),
                (String::new(), bag("x")),
            ],
            &policy(&["name"]),
        );
        assert!(p.is_noop());
        assert_eq!(p.skipped.len(), 3);
        assert!(p.fetched_ids.empty.contains("A"));
        assert!(p.fetched_ids.empty.contains("B"));
        assert!(p.fetched_ids.present.is_empty());
    }

    #[test]
    fn duplicates_resolve_last_write_wins() {
        let m = mirror(&[], &["name"]);
        let p = plan(
            &m,
            vec![
                ("X".to_string(), bag("first")),
                ("Y".to_string(), bag("y")),
                ("X".to_string(), bag("second")),
            ],
            &policy(&["name"]),
        );
        assert_eq!(p.duplicates, vec!["X"]);
        assert_eq!(p.creates.len(), 2);
        assert_eq!(p.creates[0].identifier, "X");
        assert_eq!(p.creates[0].fields["name"], FieldValue::Text("second".into()));
    }

    #[test]
    fn loose_equality_avoids_spurious_updates_without_fingerprint() {
        let m = mirror(&[("A", "shil", "5")], &[]);
        let mut data = FieldMap::new();
        data.insert("name".into(), FieldValue::Number(5.0));
        let p = plan(&m, vec![("A".to_string(), Some(data))], &policy(&[]));
        assert!(p.updates.is_empty());
        assert_eq!(p.unchanged, vec!["A"]);
    }
}
