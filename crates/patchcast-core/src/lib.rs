//! In-process state broadcaster for patchcast.
//!
//! A [`Broadcaster`] holds one authoritative state value for a single
//! [`Topic`] and streams it to any number of subscribers: each subscriber
//! first receives a full snapshot, then one JSON patch per change, in
//! publish order, with no gaps and no duplicates.
//!
//! # Architecture
//!
//! ```text
//! publish(S) ──► diff(old, new) ──► Patch ──► encode once ──┬──► Sink A
//!                      │                                    ├──► Sink B
//!                      ▼                                    └──► Sink C
//!                 StateStore
//! ```
//!
//! - [`store`] -- current-value holder
//! - [`diff`] -- structural JSON diff producing add/remove/replace ops
//! - [`frame`] -- newline-delimited snapshot and patch framing
//! - [`sink`] -- per-subscriber output trait plus channel and memory sinks
//! - [`broadcaster`] -- registry, subscribe/publish protocol
//! - [`replica`] -- client-side frame reader and patch applier
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use patchcast_core::{Broadcaster, MemorySink};
//! use serde_json::json;
//!
//! let hub = Broadcaster::new("todos", json!([]));
//! let sink = Arc::new(MemorySink::new());
//! let _sub = hub.subscribe(sink.clone()).unwrap();
//!
//! hub.publish(json!([{"id": "1"}])).unwrap();
//! assert_eq!(sink.len(), 2);
//! ```

pub mod broadcaster;
pub mod diff;
pub mod error;
pub mod frame;
pub mod ids;
pub mod replica;
pub mod sink;
pub mod store;

// Re-export primary types for convenience.
pub use broadcaster::{BroadcastStats, Broadcaster, PublishOutcome, Subscription};
pub use diff::{diff, Patch, PatchOp};
pub use error::{PublishError, SubscribeError};
pub use frame::{Frame, FrameError, CONTENT_TYPE, RECORD_SEPARATOR};
pub use ids::{SubscriberId, Topic};
pub use replica::{FrameReader, Replica, ReplicaError};
pub use sink::{ChannelSink, MemorySink, Sink, SinkError};
pub use store::StateStore;
