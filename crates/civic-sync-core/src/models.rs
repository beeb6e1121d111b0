//! Core data models shared by every stage of a synchronization pass.
//!
//! Records in the backing store carry an open attribute bag. Instead of
//! untyped JSON maps, each column value is a [`FieldValue`], so that the
//! "did this field change" question asked by the planner has one answer
//! regardless of which store or feed produced the value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single column value in an entity table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

/// Field name → value. Ordered so that fingerprints and exports are stable.
pub type FieldMap = BTreeMap<String, FieldValue>;

impl FieldValue {
    /// Convert an arbitrary JSON value into a field value.
    ///
    /// Arrays become string lists (non-string elements are JSON-encoded),
    /// objects are kept as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => n
                .as_f64()
                .map(FieldValue::Number)
                .unwrap_or_else(|| FieldValue::Text(n.to_string())),
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(items) => FieldValue::List(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Object(_) => FieldValue::Text(value.to_string()),
        }
    }

    /// Convert back into JSON for a store's wire format.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }

    /// Plain string form, as used by fingerprints and CLI output.
    pub fn as_plain_string(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => format_number(*n),
            FieldValue::Text(s) => s.clone(),
            FieldValue::List(items) => items.join(","),
        }
    }

    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// True for values a remote table would not store at all
    /// (null, empty text, empty list, unchecked checkbox).
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Bool(b) => !*b,
            FieldValue::Number(_) => false,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::List(items)
    }
}

/// Integral numbers print without a trailing `.0` so that `5` and `5.0`
/// fingerprint identically.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Build a [`FieldMap`] from a JSON object. Non-object values yield an empty map.
pub fn field_map_from_json(value: &Value) -> FieldMap {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Encode a [`FieldMap`] as a JSON object.
pub fn field_map_to_json(fields: &FieldMap) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// A row as returned by the backing store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    /// Opaque handle assigned by the store on creation.
    pub handle: String,
    pub fields: FieldMap,
}

/// A partial update addressed to one existing row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub handle: String,
    pub fields: FieldMap,
}

/// A freshly fetched `(identifier, attribute bag)` pair after field mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    pub identifier: String,
    pub fields: FieldMap,
}

/// Stored text of the status column for each lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLabels {
    pub active: String,
    pub inactive: String,
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self {
            active: "ACTIVE".to_string(),
            inactive: "INACTIVE".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_conversion_keeps_shape() {
        let fields = field_map_from_json(&json!({
            "name": "Clinic",
            "beds": 12,
            "open": true,
            "branches": ["recA", "recB"],
            "note": null
        }));
        assert_eq!(fields["name"], FieldValue::Text("Clinic".into()));
        assert_eq!(fields["beds"], FieldValue::Number(12.0));
        assert_eq!(fields["open"], FieldValue::Bool(true));
        assert_eq!(
            fields["branches"],
            FieldValue::List(vec!["recA".into(), "recB".into()])
        );
        assert_eq!(fields["note"], FieldValue::Null);

        let back = field_map_to_json(&fields);
        assert_eq!(back["beds"], json!(12.0));
        assert_eq!(back["branches"], json!(["recA", "recB"]));
    }

    #[test]
    fn nested_values_are_flattened_to_text() {
        let value = FieldValue::from_json(&json!({"lat": 32.1}));
        assert_eq!(value, FieldValue::Text("{\"lat\":32.1}".into()));

        let list = FieldValue::from_json(&json!([1, "two"]));
        assert_eq!(list, FieldValue::List(vec!["1".into(), "two".into()]));
    }

    #[test]
    fn plain_string_of_integral_number_has_no_fraction() {
        assert_eq!(FieldValue::Number(5.0).as_plain_string(), "5");
        assert_eq!(FieldValue::Number(2.5).as_plain_string(), "2.5");
    }

    #[test]
    fn emptiness() {
        assert!(FieldValue::Null.is_empty());
        assert!(FieldValue::Text("  ".into()).is_empty());
        assert!(FieldValue::List(vec![]).is_empty());
        assert!(FieldValue::Bool(false).is_empty());
        assert!(!FieldValue::Number(0.0).is_empty());
    }
}
