//! patchcast server binary.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `patchcast.yaml` (or `PATCHCAST_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Create the broadcaster-backed application state
//! 4. Serve HTTP until `Ctrl-C`

use std::sync::Arc;

use patchcast_server::{start_server, AppState, PatchcastConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the server fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging is not up yet, so errors go to stderr
    //    through the returned error.
    let config = PatchcastConfig::load()?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!(
        host = %config.server.host,
        port = config.server.port,
        topic = %config.broadcast.topic,
        sink_capacity = config.broadcast.sink_capacity,
        "patchcast-server starting"
    );

    // 3. Create application state.
    let state = Arc::new(AppState::new(&config.broadcast));

    // 4. Serve.
    start_server(&config.server, state).await?;

    info!("patchcast-server shutdown complete");
    Ok(())
}
