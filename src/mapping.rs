//! Config-driven field mapping and identity derivation for JSON feeds.
//!
//! A raw record is a JSON object. Each mapped column names a raw key, or a
//! JSON pointer (leading `/`) for nested values:
//!
//! ```toml
//! [feeds.shil.fields]
//! name = "org_name"
//! phone = "/contact/phone"
//! ```

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;

use civic_sync_core::identity::{identifier_for, normalize_text};
use civic_sync_core::models::{field_map_from_json, FieldMap, FieldValue};

use crate::config::FeedConfig;

/// Look up `key` in `raw`: a JSON pointer when it starts with `/`, a
/// top-level key otherwise.
pub fn resolve<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    if key.starts_with('/') {
        raw.pointer(key)
    } else {
        raw.get(key)
    }
}

/// The record array of a fetched document.
pub fn records_at(document: Value, pointer: Option<&str>) -> Result<Vec<Value>> {
    let target = match pointer {
        None | Some("") => document,
        Some(p) => match document.pointer(p) {
            Some(v) => v.clone(),
            None => bail!("records_pointer '{}' not found in document", p),
        },
    };
    match target {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Ok(vec![target]),
        other => bail!("expected an array of records, found {}", type_name(&other)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Maps raw JSON records to attribute bags.
#[derive(Debug, Clone, Default)]
pub struct FieldMapping {
    /// Target column → raw key. Empty maps every top-level key verbatim.
    fields: BTreeMap<String, String>,
    required: Vec<String>,
}

impl FieldMapping {
    pub fn new(fields: BTreeMap<String, String>, required: Vec<String>) -> Self {
        Self { fields, required }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(config.fields.clone(), config.required_fields.clone())
    }

    /// Map one record, or `None` when a required column is missing or
    /// empty.
    pub fn map(&self, raw: &Value) -> Option<FieldMap> {
        let fields: FieldMap = if self.fields.is_empty() {
            field_map_from_json(raw)
        } else {
            self.fields
                .iter()
                .filter_map(|(target, key)| {
                    resolve(raw, key).map(|v| (target.clone(), FieldValue::from_json(v)))
                })
                .collect()
        };

        let complete = self
            .required
            .iter()
            .all(|name| fields.get(name).is_some_and(|v| !v.is_empty()));
        complete.then_some(fields)
    }
}

/// How a feed derives the identifier of each raw record.
#[derive(Debug, Clone)]
pub enum IdentityRule {
    /// A raw key holding an external ID.
    Natural(String),
    /// A hash of several raw values, prefixed with a namespace token.
    Hashed {
        prefix: String,
        parts: Vec<String>,
        normalize: bool,
    },
}

impl IdentityRule {
    pub fn from_config(config: &FeedConfig) -> Self {
        match &config.id_field {
            Some(field) => IdentityRule::Natural(field.clone()),
            None => IdentityRule::Hashed {
                prefix: config.id_prefix.clone(),
                parts: config.id_parts.clone(),
                normalize: config.normalize_id_parts,
            },
        }
    }

    /// Identifier of `raw`, or an empty string when none can be derived.
    /// The engine skips empty identifiers with a warning.
    pub fn identifier(&self, raw: &Value) -> String {
        match self {
            IdentityRule::Natural(field) => resolve(raw, field)
                .map(|v| FieldValue::from_json(v).as_plain_string().trim().to_string())
                .unwrap_or_default(),
            IdentityRule::Hashed {
                prefix,
                parts,
                normalize,
            } => {
                let values: Vec<Option<String>> = parts
                    .iter()
                    .map(|key| {
                        resolve(raw, key)
                            .map(FieldValue::from_json)
                            .filter(|v| !v.is_empty())
                            .map(|v| {
                                let text = v.as_plain_string();
                                if *normalize {
                                    normalize_text(&text)
                                } else {
                                    text
                                }
                            })
                    })
                    .collect();
                if values.iter().all(Option::is_none) {
                    return String::new();
                }
                let refs: Vec<Option<&str>> = values.iter().map(|v| v.as_deref()).collect();
                identifier_for(prefix, &refs)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(pairs: &[(&str, &str)], required: &[&str]) -> FieldMapping {
        FieldMapping::new(
            pairs
                .iter()
                .map(|(t, k)| (t.to_string(), k.to_string()))
                .collect(),
            required.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn maps_keys_and_pointers() {
        let m = mapping(&[("name", "org_name"), ("phone", "/contact/phone")], &[]);
        let raw = json!({ "org_name": "Hesed", "contact": { "phone": "03-5551234" }, "extra": 1 });
        let fields = m.map(&raw).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["name"], FieldValue::Text("Hesed".into()));
        assert_eq!(fields["phone"], FieldValue::Text("03-5551234".into()));
    }

    #[test]
    fn missing_required_field_skips_record() {
        let m = mapping(&[("name", "org_name"), ("phone", "phone")], &["name"]);
        assert!(m.map(&json!({ "phone": "1" })).is_none());
        assert!(m.map(&json!({ "org_name": "  ", "phone": "1" })).is_none());
        assert!(m.map(&json!({ "org_name": "x" })).is_some());
    }

    #[test]
    fn empty_mapping_takes_whole_object() {
        let m = FieldMapping::default();
        let fields = m.map(&json!({ "a": 1, "b": ["x"] })).unwrap();
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn records_at_follows_pointer() {
        let doc = json!({ "result": { "records": [{ "id": 1 }, { "id": 2 }] } });
        assert_eq!(records_at(doc.clone(), Some("/result/records")).unwrap().len(), 2);
        assert!(records_at(doc.clone(), Some("/missing")).is_err());
        assert!(records_at(json!("text"), None).is_err());
    }

    #[test]
    fn natural_identifier_is_trimmed_text() {
        let rule = IdentityRule::Natural("org_id".into());
        assert_eq!(rule.identifier(&json!({ "org_id": 580012345 })), "580012345");
        assert_eq!(rule.identifier(&json!({ "org_id": " 58 " })), "58");
        assert_eq!(rule.identifier(&json!({})), "");
    }

    #[test]
    fn hashed_identifier_matches_identity_module() {
        let rule = IdentityRule::Hashed {
            prefix: "meser-".into(),
            parts: vec!["address".into(), "org".into()],
            normalize: false,
        };
        let raw = json!({ "address": "Main St 1", "org": "123456789" });
        assert_eq!(
            rule.identifier(&raw),
            identifier_for("meser-", &[Some("Main St 1"), Some("123456789")])
        );
        assert_eq!(rule.identifier(&json!({})), "");
    }

    #[test]
    fn normalization_absorbs_formatting_drift() {
        let rule = IdentityRule::Hashed {
            prefix: "meser-".into(),
            parts: vec!["address".into()],
            normalize: true,
        };
        assert_eq!(
            rule.identifier(&json!({ "address": "Main  St 1 " })),
            rule.identifier(&json!({ "address": "main st 1" }))
        );
    }
}
