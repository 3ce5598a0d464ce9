//! Shared application state for the patchcast server.
//!
//! [`AppState`] owns the one [`Broadcaster`] this process serves. It is
//! built once at startup, wrapped in [`Arc`](std::sync::Arc), and injected
//! into handlers via Axum's `State` extractor; there is no global instance.
//! The todo list itself lives inside the broadcaster's store, so the list
//! and what subscribers see can never drift apart.

use patchcast_core::Broadcaster;

use crate::config::BroadcastConfig;
use crate::todo::Todo;

/// Shared state for the Axum application.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Broadcaster holding the authoritative todo list.
    pub todos: Broadcaster<Vec<Todo>>,
    /// Frames buffered per subscriber before it is dropped as too slow.
    pub sink_capacity: usize,
}

impl AppState {
    /// Create state with an empty todo list on the configured topic.
    pub fn new(config: &BroadcastConfig) -> Self {
        Self {
            todos: Broadcaster::new(config.topic.as_str(), Vec::new()),
            sink_capacity: config.sink_capacity,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(&BroadcastConfig::default())
    }
}
