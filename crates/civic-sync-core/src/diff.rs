//! Per-field semantic equality.
//!
//! Remote tables re-encode what they are given: numbers come back as
//! floats or strings, single links come back as one-element lists, empty
//! values disappear entirely. Two values are equal here when a remote
//! table would consider the write a no-op.

use crate::models::{format_number, FieldMap, FieldValue};

const NUMERIC_EPSILON: f64 = 1e-9;

/// Compare a current value with a desired one. `None` means the field is
/// absent from the record.
pub fn values_equal(current: Option<&FieldValue>, desired: Option<&FieldValue>) -> bool {
    let current_empty = current.map_or(true, FieldValue::is_empty);
    let desired_empty = desired.map_or(true, FieldValue::is_empty);
    if current_empty || desired_empty {
        return current_empty && desired_empty;
    }

    // Both present and non-empty from here on.
    let (a, b) = match (current, desired) {
        (Some(a), Some(b)) => (a, b),
        _ => return false,
    };

    match (a, b) {
        (FieldValue::List(x), FieldValue::List(y)) => lists_equal(x, y),
        (FieldValue::List(items), scalar) | (scalar, FieldValue::List(items)) => {
            items.len() == 1 && scalars_equal(&FieldValue::Text(items[0].clone()), scalar)
        }
        (x, y) => scalars_equal(x, y),
    }
}

/// Names of fields in `names` whose values differ between `current` and
/// `desired`. Fields absent from `desired` are not compared.
pub fn changed_fields(current: &FieldMap, desired: &FieldMap, names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| desired.contains_key(name.as_str()))
        .filter(|name| !values_equal(current.get(name.as_str()), desired.get(name.as_str())))
        .cloned()
        .collect()
}

fn lists_equal(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut x: Vec<&str> = a.iter().map(|s| s.trim()).collect();
    let mut y: Vec<&str> = b.iter().map(|s| s.trim()).collect();
    x.sort_unstable();
    y.sort_unstable();
    x == y
}

fn scalars_equal(a: &FieldValue, b: &FieldValue) -> bool {
    // Loose numeric comparison only when one side is already a number;
    // two strings like "050" and "50" are different phone numbers.
    let either_number = matches!(a, FieldValue::Number(_)) || matches!(b, FieldValue::Number(_));
    if either_number {
        if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
            return (x - y).abs() < NUMERIC_EPSILON;
        }
    }
    match (a, b) {
        (FieldValue::Bool(x), FieldValue::Bool(y)) => x == y,
        (FieldValue::Bool(x), other) | (other, FieldValue::Bool(x)) => other
            .as_text()
            .map_or(false, |t| t.trim().eq_ignore_ascii_case(&x.to_string())),
        _ => loose_text(a) == loose_text(b),
    }
}

fn as_number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) => Some(*n),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn loose_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => format_number(*n),
        other => other.as_plain_string().trim().to_string(),
    }
}
