//! Structural diff between two JSON documents.
//!
//! [`diff`] produces a sequence of [`PatchOp`]s (the add/remove/replace
//! subset of RFC 6902) that, applied in order, turns the old document into
//! the new one. Objects and arrays are compared key by key so that a change
//! deep inside a nested structure is reported at its exact path rather than
//! as a replacement of the whole document.
//!
//! # Ordering
//!
//! Existing keys are visited in reverse (array indices high to low), so
//! every `remove` of an array element is emitted before the removal of any
//! lower index. New keys are emitted as `add` after all removals and
//! replacements, in their natural order.
//!
//! Object members follow JavaScript property order rather than insertion
//! order: keys that are array indices (`"0"`, `"17"`) come first in
//! ascending numeric order, then every other key as inserted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single edit operation addressed by a JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    /// Insert `value` at `path` (object member or array position).
    Add {
        /// JSON pointer to the insertion point.
        path: String,
        /// The value to insert.
        value: Value,
    },
    /// Delete the value at `path`.
    Remove {
        /// JSON pointer to the value being removed.
        path: String,
    },
    /// Overwrite the existing value at `path`.
    Replace {
        /// JSON pointer to the value being replaced.
        path: String,
        /// The replacement value.
        value: Value,
    },
}

impl PatchOp {
    /// The JSON pointer this operation targets.
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Remove { path } | Self::Replace { path, .. } => path,
        }
    }
}

/// An ordered list of operations transforming one document into the next.
pub type Patch = Vec<PatchOp>;

/// Compute the patch that transforms `old` into `new`.
///
/// Structurally equal documents yield an empty patch.
pub fn diff(old: &Value, new: &Value) -> Patch {
    let mut ops = Vec::new();
    generate(old, new, "", &mut ops);
    ops
}

/// Escape one path segment per RFC 6901.
pub fn escape_segment(segment: &str) -> String {
    if !segment.contains(['~', '/']) {
        return segment.to_owned();
    }
    segment.replace('~', "~0").replace('/', "~1")
}

fn child_path(parent: &str, segment: &str) -> String {
    format!("{parent}/{}", escape_segment(segment))
}

fn generate(old: &Value, new: &Value, path: &str, ops: &mut Patch) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            diff_objects(old_map, new_map, path, ops);
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            diff_arrays(old_items, new_items, path, ops);
        }
        _ => ops.push(PatchOp::Replace {
            path: path.to_owned(),
            value: new.clone(),
        }),
    }
}

/// Compare a member present on both sides: recurse into matching container
/// kinds, otherwise replace when the values differ.
fn diff_member(old: &Value, new: &Value, path: String, ops: &mut Patch) {
    let same_container = matches!(
        (old, new),
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_))
    );
    if same_container {
        generate(old, new, &path, ops);
    } else if old != new {
        ops.push(PatchOp::Replace {
            path,
            value: new.clone(),
        });
    }
}

/// Object members in JavaScript property order: array-index keys ascending,
/// then the remaining keys in insertion order.
fn member_order(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let (mut indexed, named): (Vec<_>, Vec<_>) =
        map.iter().partition(|(key, _)| array_index(key).is_some());
    indexed.sort_by_key(|(key, _)| array_index(key));
    indexed.extend(named);
    indexed
}

/// Canonical decimal form of an integer below `u32::MAX`.
fn array_index(key: &str) -> Option<u32> {
    let n: u32 = key.parse().ok()?;
    (n != u32::MAX && n.to_string() == key).then_some(n)
}

fn diff_objects(old: &Map<String, Value>, new: &Map<String, Value>, path: &str, ops: &mut Patch) {
    let mut removed = false;
    for (key, old_value) in member_order(old).into_iter().rev() {
        let member = child_path(path, key);
        if let Some(new_value) = new.get(key) {
            diff_member(old_value, new_value, member, ops);
        } else {
            ops.push(PatchOp::Remove { path: member });
            removed = true;
        }
    }

    if !removed && old.len() == new.len() {
        return;
    }

    for (key, new_value) in member_order(new) {
        if !old.contains_key(key) {
            ops.push(PatchOp::Add {
                path: child_path(path, key),
                value: new_value.clone(),
            });
        }
    }
}

fn diff_arrays(old: &[Value], new: &[Value], path: &str, ops: &mut Patch) {
    let mut removed = false;
    for (index, old_value) in old.iter().enumerate().rev() {
        let member = child_path(path, &index.to_string());
        if let Some(new_value) = new.get(index) {
            diff_member(old_value, new_value, member, ops);
        } else {
            ops.push(PatchOp::Remove { path: member });
            removed = true;
        }
    }

    if !removed && old.len() == new.len() {
        return;
    }

    for (index, new_value) in new.iter().enumerate().skip(old.len()) {
        ops.push(PatchOp::Add {
            path: child_path(path, &index.to_string()),
            value: new_value.clone(),
        });
    }
}
