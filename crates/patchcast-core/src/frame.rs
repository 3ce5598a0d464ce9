//! Newline-delimited wire framing for snapshots and patches.
//!
//! Every frame is one compact JSON value followed by [`RECORD_SEPARATOR`],
//! so a streaming reader can split frames without a length prefix:
//!
//! ```text
//! {"data":[]}
//! [{"op":"add","path":"/data/0","value":{"id":"1","task":"x","checked":false}}]
//! ```
//!
//! The first frame a subscriber sees is a snapshot (the full state under
//! the [`SNAPSHOT_KEY`] member). Every later frame is a bare array of patch
//! operations whose paths are addressed relative to that wrapper object,
//! e.g. `/data/0` rather than `/0`.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::diff::{Patch, PatchOp};

/// Byte terminating each frame on the wire.
pub const RECORD_SEPARATOR: u8 = b'\n';

/// Media type advertised for a frame stream.
pub const CONTENT_TYPE: &str = "application/json+ndjsonpatch";

/// Member of the snapshot object that carries the full state.
pub const SNAPSHOT_KEY: &str = "data";

/// Errors raised while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The state or patch could not be serialized to JSON.
    #[error("failed to encode frame: {source}")]
    Encode {
        /// The underlying serializer error.
        source: serde_json::Error,
    },

    /// The line was not valid JSON or not a valid patch array.
    #[error("failed to decode frame: {source}")]
    Decode {
        /// The underlying parser error.
        source: serde_json::Error,
    },

    /// The line was valid JSON but neither a snapshot nor a patch.
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Full state, unwrapped from its `{"data": …}` envelope.
    Snapshot(Value),
    /// Incremental change relative to the previous state.
    Patch(Patch),
}

#[derive(Serialize)]
struct SnapshotEnvelope<'a, S: ?Sized> {
    data: &'a S,
}

impl Frame {
    /// Encode this frame as one terminated line of JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        match self {
            Self::Snapshot(value) => encode_snapshot(value),
            Self::Patch(ops) => encode_patch(ops),
        }
    }

    /// Decode one line (with or without its trailing separator).
    ///
    /// An object carrying a `data` member is a snapshot, an array is a patch.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Decode`] for malformed JSON or patch operations
    /// and [`FrameError::Unrecognized`] for any other JSON value.
    pub fn decode(line: &[u8]) -> Result<Self, FrameError> {
        let trimmed = line.strip_suffix(&[RECORD_SEPARATOR]).unwrap_or(line);
        let value: Value =
            serde_json::from_slice(trimmed).map_err(|source| FrameError::Decode { source })?;
        match value {
            Value::Object(mut map) => map.remove(SNAPSHOT_KEY).map_or_else(
                || Err(FrameError::Unrecognized(Value::Object(map).to_string())),
                |data| Ok(Self::Snapshot(data)),
            ),
            array @ Value::Array(_) => serde_json::from_value(array)
                .map(Self::Patch)
                .map_err(|source| FrameError::Decode { source }),
            other => Err(FrameError::Unrecognized(other.to_string())),
        }
    }
}

/// Serialize `state` into the wrapped document that diffs are computed on.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if `state` is not representable as JSON
/// (for example a map with non-string keys).
pub fn to_document<S: Serialize + ?Sized>(state: &S) -> Result<Value, FrameError> {
    serde_json::to_value(SnapshotEnvelope { data: state })
        .map_err(|source| FrameError::Encode { source })
}

/// Encode a snapshot frame for `state`.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if serialization fails.
pub fn encode_snapshot<S: Serialize + ?Sized>(state: &S) -> Result<Bytes, FrameError> {
    terminated(&SnapshotEnvelope { data: state })
}

/// Encode a patch frame.
///
/// # Errors
///
/// Returns [`FrameError::Encode`] if serialization fails.
pub fn encode_patch(ops: &[PatchOp]) -> Result<Bytes, FrameError> {
    terminated(ops)
}

fn terminated<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, FrameError> {
    let mut buf = serde_json::to_vec(value).map_err(|source| FrameError::Encode { source })?;
    buf.push(RECORD_SEPARATOR);
    Ok(Bytes::from(buf))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn snapshot_frame_wraps_state_under_data() {
        let bytes = encode_snapshot(&Vec::<u8>::new()).unwrap();
        assert_eq!(&bytes[..], b"{\"data\":[]}\n");
    }

    #[test]
    fn patch_frame_is_bare_array() {
        let ops = vec![PatchOp::Remove {
            path: String::from("/data/0"),
        }];
        let bytes = encode_patch(&ops).unwrap();
        assert_eq!(&bytes[..], b"[{\"op\":\"remove\",\"path\":\"/data/0\"}]\n");
    }

    #[test]
    fn decode_distinguishes_frame_kinds() {
        let snapshot = Frame::decode(b"{\"data\":{\"n\":1}}\n").unwrap();
        assert_eq!(snapshot, Frame::Snapshot(json!({"n": 1})));

        let line = b"[{\"op\":\"replace\",\"path\":\"/data/n\",\"value\":2}]";
        let patch = Frame::decode(line).unwrap();
        assert_eq!(
            patch,
            Frame::Patch(vec![PatchOp::Replace {
                path: String::from("/data/n"),
                value: json!(2),
            }])
        );
    }

    #[test]
    fn decode_rejects_other_values() {
        let err = Frame::decode(b"{\"other\":1}").unwrap_err();
        assert!(matches!(err, FrameError::Unrecognized(_)));
        let err = Frame::decode(b"42").unwrap_err();
        assert!(matches!(err, FrameError::Unrecognized(_)));
        let err = Frame::decode(b"{").unwrap_err();
        assert!(matches!(err, FrameError::Decode { .. }));
        let err = Frame::decode(b"[{\"op\":\"move\",\"path\":\"/a\"}]").unwrap_err();
        assert!(matches!(err, FrameError::Decode { .. }));
    }

    #[test]
    fn non_string_map_keys_fail_to_encode() {
        let mut state = BTreeMap::new();
        state.insert(vec![1_u8], 1_u8);
        let err = to_document(&state).unwrap_err();
        assert!(matches!(err, FrameError::Encode { .. }));
    }

    #[test]
    fn encoded_frame_decodes_to_itself() {
        let frame = Frame::Snapshot(json!([{"id": "1"}]));
        let bytes = frame.encode().unwrap();
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }
}
