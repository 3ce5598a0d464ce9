//! Per-subscriber output abstraction.
//!
//! The broadcaster writes encoded frames into a [`Sink`] supplied by the
//! transport. Writes happen while the broadcaster holds its lock, so an
//! implementation must never block and must never call back into the
//! broadcaster. A sink that cannot accept a frame right now reports an
//! error, and the broadcaster drops that subscriber.
//!
//! [`ChannelSink`] is the implementation used by the HTTP transport: frames
//! go into a bounded [`tokio::sync::mpsc`] channel whose receiver feeds the
//! response body.

use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Why a sink refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The receiving side has gone away or the sink was closed.
    #[error("sink closed")]
    Closed,

    /// The sink's buffer is full; the reader is not keeping up.
    #[error("sink buffer full")]
    Full,
}

/// Destination for one subscriber's frames.
pub trait Sink: Send + Sync {
    /// Queue one encoded frame without blocking.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] when the frame cannot be accepted.
    fn write(&self, frame: Bytes) -> Result<(), SinkError>;

    /// Release the sink. Called at most once by the broadcaster, after the
    /// subscriber has been removed from the registry.
    fn close(&self);
}

/// A [`Sink`] backed by a bounded channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl ChannelSink {
    /// Create a sink and the receiver that yields its frames.
    ///
    /// `capacity` is the number of frames buffered before the subscriber is
    /// considered too slow and dropped. A capacity of zero is raised to one.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Whether [`Sink::close`] has been called or the receiver dropped.
    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(mpsc::Sender::is_closed)
    }
}

impl Sink for ChannelSink {
    fn write(&self, frame: Bytes) -> Result<(), SinkError> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(SinkError::Closed);
        };
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    fn close(&self) {
        // Dropping the sender ends the receiver's stream once it drains.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// A [`Sink`] that keeps every frame in memory.
///
/// Used for in-process observers and tests. Writes can be made to fail on
/// demand with [`MemorySink::fail_writes`] to simulate a broken connection.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
}

#[derive(Debug, Default)]
struct MemorySinkState {
    frames: Vec<Bytes>,
    failing: bool,
    close_calls: u32,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`SinkError::Closed`].
    pub fn fail_writes(&self) {
        self.lock().failing = true;
    }

    /// Copy of all frames written so far.
    pub fn frames(&self) -> Vec<Bytes> {
        self.lock().frames.clone()
    }

    /// Number of frames written so far.
    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    /// Whether no frame has been written.
    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// How many times [`Sink::close`] was called.
    pub fn close_calls(&self) -> u32 {
        self.lock().close_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for MemorySink {
    fn write(&self, frame: Bytes) -> Result<(), SinkError> {
        let mut state = self.lock();
        if state.failing || state.close_calls > 0 {
            return Err(SinkError::Closed);
        }
        state.frames.push(frame);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.lock();
        state.close_calls = state.close_calls.saturating_add(1);
    }
}
