//! Client-side reconstruction of a broadcast state.
//!
//! [`FrameReader`] splits a raw byte stream into [`Frame`]s. [`Replica`]
//! applies them: the snapshot seeds the document, and each patch is applied
//! with RFC 6902 semantics for `add`, `remove` and `replace`. A patch is
//! applied to a copy and committed only if every operation succeeds, so a
//! failing patch leaves the replica at its last good state.
//!
//! Operations that address a missing member or an out-of-range index fail
//! instead of being silently skipped. Re-applying a patch that removed or
//! replaced an element that is no longer there is therefore reported as an
//! error. A patch made only of `add` operations stays valid after it has
//! been applied, so applying it twice inserts its values twice; the
//! replica cannot tell that case apart from a legitimate second insert.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::diff::PatchOp;
use crate::frame::{Frame, FrameError, RECORD_SEPARATOR, SNAPSHOT_KEY};

/// Errors raised while rebuilding state from frames.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    /// A patch arrived before any snapshot.
    #[error("patch received before snapshot")]
    PatchBeforeSnapshot,

    /// The path is not a valid JSON pointer for this operation.
    #[error("invalid pointer: {0}")]
    InvalidPointer(String),

    /// The path names a member or element that does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// An array index beyond the end of the array.
    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(String),

    /// The document does not deserialize into the requested type.
    #[error("replica state does not match expected type: {source}")]
    Deserialize {
        /// The underlying deserializer error.
        source: serde_json::Error,
    },
}

/// Splits a newline-delimited byte stream into frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    pending: Vec<u8>,
}

impl FrameReader {
    /// Create a reader with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every frame it completes.
    ///
    /// A trailing partial line is kept until the next call.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] for the first complete line that fails to
    /// decode. Lines before it are consumed and lost.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == RECORD_SEPARATOR) {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            if line.len() > 1 {
                frames.push(Frame::decode(&line)?);
            }
        }
        Ok(frames)
    }

    /// Bytes buffered without a terminating separator yet.
    pub const fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// A local copy of the broadcast state, kept in its wrapped form.
#[derive(Debug, Default, Clone)]
pub struct Replica {
    document: Option<Value>,
    patches_applied: u64,
}

impl Replica {
    /// Create a replica that has not seen a snapshot yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one frame.
    ///
    /// A snapshot always replaces the document, which is what a reconnecting
    /// client receives first.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicaError::PatchBeforeSnapshot`] for a patch with no
    /// baseline, or the error of the first operation that fails.
    pub fn apply(&mut self, frame: Frame) -> Result<(), ReplicaError> {
        match frame {
            Frame::Snapshot(data) => {
                let mut wrapper = serde_json::Map::new();
                wrapper.insert(SNAPSHOT_KEY.to_owned(), data);
                self.document = Some(Value::Object(wrapper));
                Ok(())
            }
            Frame::Patch(ops) => {
                let current = self.document.as_ref().ok_or(ReplicaError::PatchBeforeSnapshot)?;
                let mut next = current.clone();
                apply_patch(&mut next, &ops)?;
                self.document = Some(next);
                self.patches_applied = self.patches_applied.saturating_add(1);
                Ok(())
            }
        }
    }

    /// The unwrapped state, or `None` before the first snapshot.
    pub fn value(&self) -> Option<&Value> {
        self.document.as_ref().and_then(|doc| doc.get(SNAPSHOT_KEY))
    }

    /// The state deserialized as `T`, or `None` before the first snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ReplicaError::Deserialize`] if the document does not match `T`.
    pub fn state<T: DeserializeOwned>(&self) -> Result<Option<T>, ReplicaError> {
        self.value()
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|source| ReplicaError::Deserialize { source })
            })
            .transpose()
    }

    /// Number of patch frames applied since construction.
    pub const fn patches_applied(&self) -> u64 {
        self.patches_applied
    }
}

/// Apply `ops` in order to `doc`.
///
/// Stops at the first failing operation; `doc` may then be partially
/// modified, so callers wanting atomicity should apply to a copy.
///
/// # Errors
///
/// Returns the [`ReplicaError`] of the failing operation.
pub fn apply_patch(doc: &mut Value, ops: &[PatchOp]) -> Result<(), ReplicaError> {
    for op in ops {
        apply_op(doc, op)?;
    }
    Ok(())
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), ReplicaError> {
    match op {
        PatchOp::Add { path, value } => {
            let tokens = parse_pointer(path)?;
            let Some((last, parents)) = tokens.split_last() else {
                *doc = value.clone();
                return Ok(());
            };
            match resolve_mut(doc, parents, path)? {
                Value::Object(map) => {
                    map.insert(last.clone(), value.clone());
                }
                Value::Array(items) => {
                    let index = if last == "-" {
                        items.len()
                    } else {
                        parse_index(last, path)?
                    };
                    if index > items.len() {
                        return Err(ReplicaError::IndexOutOfBounds(path.clone()));
                    }
                    items.insert(index, value.clone());
                }
                _ => return Err(ReplicaError::PathNotFound(path.clone())),
            }
            Ok(())
        }
        PatchOp::Remove { path } => {
            let tokens = parse_pointer(path)?;
            let Some((last, parents)) = tokens.split_last() else {
                return Err(ReplicaError::InvalidPointer(String::from(
                    "cannot remove the document root",
                )));
            };
            match resolve_mut(doc, parents, path)? {
                Value::Object(map) => {
                    map.remove(last.as_str())
                        .ok_or_else(|| ReplicaError::PathNotFound(path.clone()))?;
                }
                Value::Array(items) => {
                    let index = parse_index(last, path)?;
                    if index >= items.len() {
                        return Err(ReplicaError::IndexOutOfBounds(path.clone()));
                    }
                    items.remove(index);
                }
                _ => return Err(ReplicaError::PathNotFound(path.clone())),
            }
            Ok(())
        }
        PatchOp::Replace { path, value } => {
            let tokens = parse_pointer(path)?;
            let target = resolve_mut(doc, &tokens, path)?;
            *target = value.clone();
            Ok(())
        }
    }
}

fn parse_pointer(path: &str) -> Result<Vec<String>, ReplicaError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(ReplicaError::InvalidPointer(path.to_owned()));
    };
    Ok(rest
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Array index token: decimal digits, no leading zero unless it is `0`.
fn parse_index(token: &str, path: &str) -> Result<usize, ReplicaError> {
    let well_formed = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if !well_formed {
        return Err(ReplicaError::InvalidPointer(path.to_owned()));
    }
    token
        .parse()
        .ok()
        .ok_or_else(|| ReplicaError::IndexOutOfBounds(path.to_owned()))
}

fn resolve_mut<'a>(
    doc: &'a mut Value,
    tokens: &[String],
    path: &str,
) -> Result<&'a mut Value, ReplicaError> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token.as_str())
                .ok_or_else(|| ReplicaError::PathNotFound(path.to_owned()))?,
            Value::Array(items) => {
                let index = parse_index(token, path)?;
                items
                    .get_mut(index)
                    .ok_or_else(|| ReplicaError::IndexOutOfBounds(path.to_owned()))?
            }
            _ => return Err(ReplicaError::PathNotFound(path.to_owned())),
        };
    }
    Ok(current)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn op_add(path: &str, value: Value) -> PatchOp {
        PatchOp::Add {
            path: path.to_owned(),
            value,
        }
    }

    #[test]
    fn reader_splits_across_chunk_boundaries() {
        let mut reader = FrameReader::new();
        assert!(reader.push(b"{\"data\":").unwrap().is_empty());
        assert_eq!(reader.pending(), 8);

        let frames = reader.push(b"[]}\n[]\n{\"da").unwrap();
        assert_eq!(
            frames,
            vec![Frame::Snapshot(json!([])), Frame::Patch(Vec::new())]
        );
        assert_eq!(reader.pending(), 4);
    }

    #[test]
    fn reader_skips_blank_lines() {
        let mut reader = FrameReader::new();
        let frames = reader.push(b"\n\n{\"data\":1}\n").unwrap();
        assert_eq!(frames, vec![Frame::Snapshot(json!(1))]);
    }

    #[test]
    fn patch_without_baseline_is_rejected() {
        let mut replica = Replica::new();
        let err = replica.apply(Frame::Patch(Vec::new())).unwrap_err();
        assert!(matches!(err, ReplicaError::PatchBeforeSnapshot));
        assert!(replica.value().is_none());
    }

    #[test]
    fn snapshot_then_patches_rebuild_state() {
        let mut replica = Replica::new();
        replica.apply(Frame::Snapshot(json!([]))).unwrap();
        replica
            .apply(Frame::Patch(vec![op_add("/data/0", json!({"task": "x"}))]))
            .unwrap();
        replica
            .apply(Frame::Patch(vec![PatchOp::Replace {
                path: String::from("/data/0/task"),
                value: json!("y"),
            }]))
            .unwrap();

        assert_eq!(replica.value(), Some(&json!([{"task": "y"}])));
        assert_eq!(replica.patches_applied(), 2);
    }

    #[test]
    fn failing_patch_leaves_state_untouched() {
        let mut replica = Replica::new();
        replica.apply(Frame::Snapshot(json!({"a": 1}))).unwrap();
        let err = replica
            .apply(Frame::Patch(vec![
                op_add("/data/b", json!(2)),
                PatchOp::Remove {
                    path: String::from("/data/missing"),
                },
            ]))
            .unwrap_err();

        assert!(matches!(err, ReplicaError::PathNotFound(_)));
        assert_eq!(replica.value(), Some(&json!({"a": 1})));
    }

    #[test]
    fn add_only_patch_applies_twice() {
        let mut replica = Replica::new();
        replica.apply(Frame::Snapshot(json!([]))).unwrap();
        let patch = vec![op_add("/data/0", json!("x"))];
        replica.apply(Frame::Patch(patch.clone())).unwrap();
        replica.apply(Frame::Patch(patch)).unwrap();

        assert_eq!(replica.value(), Some(&json!(["x", "x"])));
    }

    #[test]
    fn array_bounds_are_enforced() {
        let mut doc = json!([1]);
        assert!(matches!(
            apply_patch(&mut doc, &[op_add("/5", json!(0))]),
            Err(ReplicaError::IndexOutOfBounds(_))
        ));
        assert!(matches!(
            apply_patch(&mut doc, &[op_add("/01", json!(0))]),
            Err(ReplicaError::InvalidPointer(_))
        ));
        apply_patch(&mut doc, &[op_add("/-", json!(2))]).unwrap();
        assert_eq!(doc, json!([1, 2]));
    }

    #[test]
    fn escaped_segments_resolve() {
        let mut doc = json!({"a/b": {"~": 1}});
        apply_patch(
            &mut doc,
            &[PatchOp::Replace {
                path: String::from("/a~1b/~0"),
                value: json!(2),
            }],
        )
        .unwrap();
        assert_eq!(doc, json!({"a/b": {"~": 2}}));
    }

    #[test]
    fn typed_state_deserializes() {
        let mut replica = Replica::new();
        assert_eq!(replica.state::<Vec<u32>>().unwrap(), None);
        replica.apply(Frame::Snapshot(json!([1, 2]))).unwrap();
        assert_eq!(replica.state::<Vec<u32>>().unwrap(), Some(vec![1, 2]));
        assert!(matches!(
            replica.state::<String>(),
            Err(ReplicaError::Deserialize { .. })
        ));
    }
}
