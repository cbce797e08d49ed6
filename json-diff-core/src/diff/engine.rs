use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value};

use crate::diff::result::DiffEntry;

/// Configures tree diff behavior.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Include [`DiffEntry::Identical`] rows for matched leaves.
    pub include_identical: bool,
    /// Maximum recursion depth. `-1` means unlimited.
    pub max_depth: i32,
    /// Object fields tried in order to key array elements for matching.
    pub key_fields: Vec<String>,
    /// Paths or object keys to ignore.
    pub ignore_paths: Vec<String>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            include_identical: false,
            max_depth: -1,
            key_fields: vec!["name".to_string(), "id".to_string()],
            ignore_paths: Vec::new(),
        }
    }
}

/// Diff two JSON trees with default options.
pub fn diff(left: &Value, right: &Value) -> Vec<DiffEntry> {
    diff_with_options(left, right, &DiffOptions::default())
}

/// Diff two JSON trees with custom options.
pub fn diff_with_options(left: &Value, right: &Value, opts: &DiffOptions) -> Vec<DiffEntry> {
    let mut walker = Walker {
        opts,
        entries: Vec::new(),
    };
    walker.value(left, right, "", 0);
    walker.entries
}

struct Walker<'a> {
    opts: &'a DiffOptions,
    entries: Vec<DiffEntry>,
}

impl Walker<'_> {
    fn value(&mut self, left: &Value, right: &Value, path: &str, depth: i32) {
        let too_deep = self.opts.max_depth >= 0 && depth > self.opts.max_depth;
        if too_deep || should_ignore(path, self.opts) {
            return;
        }

        match (left, right) {
            (Value::Object(l), Value::Object(r)) => self.object(l, r, path, depth),
            (Value::Array(l), Value::Array(r)) => match common_key_field(l, r, self.opts) {
                Some(field) => self.keyed_array(field, l, r, path, depth),
                None => self.indexed_array(l, r, path, depth),
            },
            (l, r) if kind(l) != kind(r) => self.entries.push(DiffEntry::Structural {
                path: display_path(path),
                description: format!("type mismatch: left={} right={}", kind(l), kind(r)),
            }),
            (l, r) if l != r => self.entries.push(DiffEntry::Modified {
                path: display_path(path),
                left: l.to_string(),
                right: r.to_string(),
            }),
            _ if self.opts.include_identical => self.entries.push(DiffEntry::Identical {
                path: display_path(path),
            }),
            _ => {}
        }
    }

    /// Left keys in order, then keys only the right side has.
    fn object(
        &mut self,
        left: &Map<String, Value>,
        right: &Map<String, Value>,
        path: &str,
        depth: i32,
    ) {
        let right_only = right.keys().filter(|key| !left.contains_key(*key));
        for key in left.keys().chain(right_only) {
            if self.opts.ignore_paths.iter().any(|ignored| ignored == key) {
                continue;
            }
            let child = join_key(path, key);
            self.pair(left.get(key), right.get(key), child, depth);
        }
    }

    fn indexed_array(&mut self, left: &[Value], right: &[Value], path: &str, depth: i32) {
        for idx in 0..left.len().max(right.len()) {
            self.pair(left.get(idx), right.get(idx), format!("{path}[{idx}]"), depth);
        }
    }

    /// Elements are matched on `field`; the first unclaimed right element with
    /// the same key wins, so duplicate keys pair up in order.
    fn keyed_array(
        &mut self,
        field: &str,
        left: &[Value],
        right: &[Value],
        path: &str,
        depth: i32,
    ) {
        let mut unclaimed: HashMap<String, VecDeque<usize>> = HashMap::new();
        for (idx, item) in right.iter().enumerate() {
            if let Some(key) = element_key(item, field) {
                unclaimed.entry(key).or_default().push_back(idx);
            }
        }

        let mut claimed = vec![false; right.len()];
        for (idx, item) in left.iter().enumerate() {
            let key = element_key(item, field);
            let partner = key
                .as_ref()
                .and_then(|k| unclaimed.get_mut(k))
                .and_then(VecDeque::pop_front);
            if let Some(r) = partner {
                claimed[r] = true;
            }
            let child = element_path(path, key.as_deref(), idx);
            self.pair(Some(item), partner.map(|r| &right[r]), child, depth);
        }

        for (idx, item) in right.iter().enumerate().filter(|(idx, _)| !claimed[*idx]) {
            let key = element_key(item, field);
            let child = element_path(path, key.as_deref(), idx);
            self.pair(None, Some(item), child, depth);
        }
    }

    fn pair(&mut self, left: Option<&Value>, right: Option<&Value>, path: String, depth: i32) {
        if should_ignore(&path, self.opts) {
            return;
        }
        match (left, right) {
            (Some(l), Some(r)) => self.value(l, r, &path, depth + 1),
            (Some(l), None) => self.entries.push(DiffEntry::OnlyLeft {
                path,
                value: l.clone(),
            }),
            (None, Some(r)) => self.entries.push(DiffEntry::OnlyRight {
                path,
                value: r.clone(),
            }),
            (None, None) => {}
        }
    }
}

fn element_path(parent: &str, key: Option<&str>, idx: usize) -> String {
    match key {
        Some(key) => format!("{parent}[{key}]"),
        None => format!("{parent}[{idx}]"),
    }
}

/// First configured key field present as a string on every object element of
/// both arrays.
fn common_key_field<'a>(left: &[Value], right: &[Value], opts: &'a DiffOptions) -> Option<&'a str> {
    if left.is_empty() && right.is_empty() {
        return None;
    }
    opts.key_fields
        .iter()
        .map(String::as_str)
        .find(|field| {
            left.iter()
                .chain(right.iter())
                .all(|item| element_key(item, field).is_some())
        })
}

fn element_key(value: &Value, key_field: &str) -> Option<String> {
    value
        .as_object()
        .and_then(|obj| obj.get(key_field))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "$".to_string()
    } else {
        path.to_string()
    }
}

fn should_ignore(path: &str, opts: &DiffOptions) -> bool {
    !path.is_empty()
        && opts.ignore_paths.iter().any(|ignore| {
            path == ignore
                || path.ends_with(&format!(".{ignore}"))
                || path.starts_with(&format!("{ignore}."))
                || path.starts_with(&format!("{ignore}["))
        })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
