//! Canonical form for JSON documents.
//!
//! Two documents that differ only in the order of semantically unordered
//! arrays, or in empty-versus-missing collections, canonicalize to the same
//! value. Arrays whose order carries meaning are left untouched.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde_json::{Map, Value};

/// Controls which parts of a document are reordered or dropped.
#[derive(Debug, Clone, Default)]
pub struct CanonicalOptions {
    /// Object keys whose array values are sorted by a total order.
    pub unordered_keys: BTreeSet<String>,
    /// Object keys whose array values are sorted by the listed element field.
    pub keyed_arrays: Vec<(String, Vec<String>)>,
    /// Object keys removed wherever they appear.
    pub ignore_keys: BTreeSet<String>,
    /// Drop `null`, empty arrays and empty objects from objects.
    pub drop_empty: bool,
}

impl CanonicalOptions {
    /// Mark `keys` as holding unordered arrays.
    pub fn with_unordered<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unordered_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Remove `keys` from every object.
    pub fn with_ignored<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// Return the canonical form of `value`. The input is never modified.
pub fn canonicalize(value: &Value, opts: &CanonicalOptions) -> Value {
    canonical_value(value, None, opts)
}

fn canonical_value(value: &Value, key: Option<&str>, opts: &CanonicalOptions) -> Value {
    match value {
        Value::Object(map) => Value::Object(canonical_object(map, opts)),
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .map(|item| canonical_value(item, None, opts))
                .collect();
            if let Some(key) = key {
                if opts.unordered_keys.contains(key) {
                    out.sort_by(total_order);
                } else if let Some((_, fields)) = opts.keyed_arrays.iter().find(|(k, _)| k == key)
                {
                    out.sort_by(|a, b| {
                        sort_key(a, fields)
                            .cmp(&sort_key(b, fields))
                            .then_with(|| total_order(a, b))
                    });
                }
            }
            Value::Array(out)
        }
        other => other.clone(),
    }
}

fn canonical_object(map: &Map<String, Value>, opts: &CanonicalOptions) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        if opts.ignore_keys.contains(key) {
            continue;
        }
        let value = canonical_value(value, Some(key), opts);
        if opts.drop_empty && is_empty(&value) {
            continue;
        }
        out.insert(key.clone(), value);
    }
    out
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn sort_key(value: &Value, fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .map(|field| match value.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        })
        .collect()
}

/// Total order over JSON values: by type rank first, then by content.
fn total_order(a: &Value, b: &Value) -> Ordering {
    type_rank(a).cmp(&type_rank(b)).then_with(|| match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    })
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
