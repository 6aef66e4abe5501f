//! Structural diff between two snapshot payloads.
//!
//! Drift detection itself compares fingerprints; this module only exists so
//! an operator reviewing a drifted service can see what actually changed
//! before approving or deleting it.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

/// One divergence between the old and new payload, addressed by a
/// dotted/indexed path such as `tools[2].inputSchema.type`.
#[derive(Debug, Clone, Serialize)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Computes the structural diff between two JSON documents.
pub fn diff(old: &Value, new: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    walk(old, new, String::new(), &mut changes);
    changes
}

fn walk(old: &Value, new: &Value, path: String, changes: &mut Vec<Change>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child = join(&path, key);
                match new_map.get(key) {
                    Some(new_value) => walk(old_value, new_value, child, changes),
                    None => changes.push(Change {
                        path: child,
                        kind: ChangeKind::Removed,
                        old: Some(old_value.clone()),
                        new: None,
                    }),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    changes.push(Change {
                        path: join(&path, key),
                        kind: ChangeKind::Added,
                        old: None,
                        new: Some(new_value.clone()),
                    });
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let shared = old_items.len().min(new_items.len());
            for i in 0..shared {
                walk(&old_items[i], &new_items[i], format!("{path}[{i}]"), changes);
            }
            for (i, old_value) in old_items.iter().enumerate().skip(shared) {
                changes.push(Change {
                    path: format!("{path}[{i}]"),
                    kind: ChangeKind::Removed,
                    old: Some(old_value.clone()),
                    new: None,
                });
            }
            for (i, new_value) in new_items.iter().enumerate().skip(shared) {
                changes.push(Change {
                    path: format!("{path}[{i}]"),
                    kind: ChangeKind::Added,
                    old: None,
                    new: Some(new_value.clone()),
                });
            }
        }
        (old_value, new_value) => {
            if old_value != new_value {
                changes.push(Change {
                    path,
                    kind: ChangeKind::Changed,
                    old: Some(old_value.clone()),
                    new: Some(new_value.clone()),
                });
            }
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
