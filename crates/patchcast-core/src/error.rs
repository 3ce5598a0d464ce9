//! Errors surfaced by [`Broadcaster`](crate::Broadcaster) operations.
//!
//! Sink failures during fan-out are deliberately absent here: they only
//! unregister the failing subscriber and never reach the publisher.

use crate::frame::FrameError;
use crate::sink::SinkError;

/// A publish that was rejected. The stored state is left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The current or new state could not be serialized for diffing.
    #[error("cannot diff state: {source}")]
    Encode {
        /// The underlying framing error.
        #[from]
        source: FrameError,
    },
}

/// A subscription that could not be established.
///
/// In either case the subscriber is not left in the registry.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    /// The bootstrap state could not be serialized.
    #[error("cannot encode bootstrap snapshot: {source}")]
    Encode {
        /// The underlying framing error.
        #[from]
        source: FrameError,
    },

    /// The sink refused the snapshot frame and has been closed.
    #[error("sink rejected snapshot frame: {source}")]
    Sink {
        /// Why the sink refused the frame.
        #[from]
        source: SinkError,
    },
}
