//! HTTP endpoint handlers.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Subscribe: ndjson stream of a snapshot then patches |
//! | `GET` | `/add?task=…` | Append a todo and publish the new list |

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use patchcast_core::{ChannelSink, Subscription};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::AppError;
use crate::state::AppState;
use crate::todo::Todo;

/// Query parameters for `GET /add`.
#[derive(Debug, serde::Deserialize)]
pub struct AddQuery {
    /// Text of the new todo.
    pub task: String,
}

/// Open a subscriber stream.
///
/// The response body yields `{"data": [...]}` followed by one patch array
/// per change, each on its own line. The subscription lives as long as the
/// body: when the client goes away the body is dropped, which unregisters
/// the subscriber.
///
/// # Route
///
/// `GET /`
pub async fn subscribe(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let (sink, rx) = ChannelSink::channel(state.sink_capacity);
    let subscription = state.todos.subscribe(Arc::new(sink))?;
    info!(
        subscriber = %subscription.id(),
        active = state.todos.subscriber_count(),
        "client subscribed"
    );

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, patchcast_core::CONTENT_TYPE),
            (X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        Body::from_stream(frame_stream(rx, subscription)),
    ))
}

/// Turn the sink's receiver into a body stream that owns the subscription.
fn frame_stream(
    rx: mpsc::Receiver<Bytes>,
    subscription: Subscription,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        match rx.recv().await {
            Some(frame) => Some((Ok::<_, Infallible>(frame), (rx, subscription))),
            None => {
                debug!(subscriber = %subscription.id(), "subscriber stream ended");
                None
            }
        }
    })
}

/// Append a todo and publish the updated list to every subscriber.
///
/// # Route
///
/// `GET /add?task=<text>`
pub async fn add_todo(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AddQuery>,
) -> Result<&'static str, AppError> {
    let todo = Todo::new(query.task);
    let id = todo.id.clone();
    let outcome = state.todos.update(move |todos| todos.push(todo))?;
    info!(todo_id = %id, delivered = outcome.delivered, "todo added");
    Ok("added todo")
}
