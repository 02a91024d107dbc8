//! Diff helpers shared by the state modules.

use std::cmp::Ordering;

use serde_json::{json, Map, Value};

use crate::resource_id::last_segment;

/// Recursive diff of two values.
///
/// Returns `None` when equal. Mappings yield only their differing keys,
/// keys missing on one side become `{"old": v}` or `{"new": v}`, anything
/// else that differs becomes `{"old": .., "new": ..}`.
pub fn deep_diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(o), Value::Object(n)) => {
            let mut out = Map::new();
            for (k, ov) in o {
                match n.get(k) {
                    Some(nv) => {
                        if let Some(d) = deep_diff(ov, nv) {
                            out.insert(k.clone(), d);
                        }
                    }
                    None => {
                        out.insert(k.clone(), json!({ "old": ov }));
                    }
                }
            }
            for (k, nv) in n {
                if !o.contains_key(k) {
                    out.insert(k.clone(), json!({ "new": nv }));
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(Value::Object(out))
            }
        }
        _ if old == new => None,
        _ => Some(json!({ "old": old, "new": new })),
    }
}

/// [`deep_diff`] over the top-level keys of `new` only, so settings the
/// service fills in on its own do not count as changes.
pub fn subset_diff(old: &Value, new: &Value) -> Option<Value> {
    match (old, new) {
        (Value::Object(o), Value::Object(n)) => {
            let managed: Map<String, Value> = o
                .iter()
                .filter(|(k, _)| n.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            deep_diff(&Value::Object(managed), new)
        }
        (Value::Null, Value::Object(n)) => deep_diff(&json!({}), &Value::Object(n.clone())),
        _ => deep_diff(old, new),
    }
}

/// Compare two optional strings case-insensitively; `None` on the new side
/// means "not managed" and never differs.
pub fn str_changed(old: Option<&str>, new: Option<&str>) -> bool {
    match (old, new) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(o), Some(n)) => !o.eq_ignore_ascii_case(n),
    }
}

/// `{"old": .., "new": ..}` when a managed value differs.
pub fn value_change(old: Option<&Value>, new: Option<&Value>) -> Option<Value> {
    let new = new?;
    let old = old.cloned().unwrap_or(Value::Null);
    let differs = match (&old, new) {
        (Value::String(o), Value::String(n)) => !o.eq_ignore_ascii_case(n),
        (o, n) => o != n,
    };
    differs.then(|| json!({ "old": old, "new": new }))
}

/// Outcome of [`compare_list_of_dicts`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListComparison {
    pub changes: Option<Value>,
    pub comment: Option<String>,
}

fn sort_key(item: &Value, key_name: &str) -> Option<String> {
    item.get(key_name)
        .and_then(Value::as_str)
        .map(|s| s.to_ascii_lowercase())
}

fn values_match(old: Option<&Value>, new: &Value, id_key: bool) -> bool {
    let old = match old {
        Some(v) => v,
        None => return new.is_null(),
    };
    if id_key {
        let old_id = old
            .get("id")
            .and_then(Value::as_str)
            .or_else(|| old.as_str())
            .map(last_segment);
        let new_name = new
            .as_str()
            .or_else(|| new.get("id").and_then(Value::as_str))
            .map(last_segment);
        return match (old_id, new_name) {
            (Some(o), Some(n)) => o.eq_ignore_ascii_case(n),
            (None, None) => true,
            _ => false,
        };
    }
    match (old, new) {
        (Value::String(o), Value::String(n)) => o.eq_ignore_ascii_case(n),
        (Value::Object(_), Value::Object(_)) => deep_diff(old, new).is_none(),
        (o, n) => o == n,
    }
}

/// Compare two lists of mappings keyed by `key_name` (default `name`).
///
/// Only the keys present in each new item are compared. Keys listed in
/// `convert_id_to_name` compare the new bare name against the last segment
/// of the old `{"id": ...}`.
pub fn compare_list_of_dicts(
    old: &Value,
    new: &Value,
    convert_id_to_name: &[&str],
    key_name: Option<&str>,
) -> ListComparison {
    let key_name = key_name.unwrap_or("name");

    let new_items = match new.as_array() {
        Some(items) if items.iter().all(Value::is_object) => items,
        _ => {
            return ListComparison {
                changes: None,
                comment: Some("update_list must be a list of dictionaries.".to_string()),
            }
        }
    };
    let empty = Vec::new();
    let old_items = match old {
        Value::Null => &empty,
        Value::Array(items) if items.iter().all(Value::is_object) => items,
        _ => {
            return ListComparison {
                changes: None,
                comment: Some("existing_list must be a list of dictionaries.".to_string()),
            }
        }
    };

    if new_items.iter().any(|i| sort_key(i, key_name).is_none()) {
        return ListComparison {
            changes: None,
            comment: Some(format!(
                "configuration dictionaries must contain the \"{}\" key!",
                key_name
            )),
        };
    }

    let mut old_sorted: Vec<&Value> = old_items.iter().collect();
    let mut new_sorted: Vec<&Value> = new_items.iter().collect();
    let by_key = |a: &&Value, b: &&Value| -> Ordering {
        sort_key(a, key_name).cmp(&sort_key(b, key_name))
    };
    old_sorted.sort_by(by_key);
    new_sorted.sort_by(by_key);

    let changed = old_sorted.len() != new_sorted.len()
        || old_sorted.iter().zip(new_sorted.iter()).any(|(o, n)| {
            n.as_object()
                .map(|fields| {
                    fields.iter().any(|(k, nv)| {
                        !values_match(o.get(k), nv, convert_id_to_name.contains(&k.as_str()))
                    })
                })
                .unwrap_or(true)
        });

    ListComparison {
        changes: changed.then(|| json!({ "old": old_items, "new": new_items })),
        comment: None,
    }
}

/// Sorted, lower-cased list of strings for order-insensitive comparison.
pub fn sorted_strings(value: Option<&Value>) -> Vec<String> {
    let mut out: Vec<String> = value
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_ascii_lowercase)
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}
