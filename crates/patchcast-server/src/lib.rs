//! HTTP transport for patchcast.
//!
//! Serves a shared todo list through a [`patchcast_core::Broadcaster`]:
//!
//! - **`GET /`** opens a long-lived response with media type
//!   `application/json+ndjsonpatch`. The first line is the full list as
//!   `{"data": [...]}`, every later line is a JSON patch array.
//! - **`GET /add?task=…`** appends a todo and publishes the new list.
//!
//! # Architecture
//!
//! Each subscriber response is backed by a [`patchcast_core::ChannelSink`].
//! The broadcaster writes frames into its bounded channel without blocking;
//! the response body drains the receiver. The body owns the
//! [`patchcast_core::Subscription`], so a client disconnect, which drops the
//! body, unregisters the subscriber.
//!
//! The broadcaster is owned by [`AppState`] and passed to handlers through
//! Axum's `State` extractor.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod todo;

// Re-export primary types for convenience.
pub use config::{BroadcastConfig, ConfigError, LoggingConfig, PatchcastConfig};
pub use error::AppError;
pub use router::build_router;
pub use server::{start_server, ServerConfig, ServerError};
pub use state::AppState;
pub use todo::Todo;
