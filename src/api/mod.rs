//! Local HTTP surface
//!
//! - `POST /send`: sign a JSON payload and broadcast it to every joined room
//! - `GET /block`: current block number

pub mod handlers;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::{AppState, SharedState};

use crate::chain::Wallet;
use crate::matrix::ChatClient;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Serve until `cancel` fires, then drain in-flight requests
pub async fn serve<W: Wallet, C: ChatClient>(
    listener: TcpListener,
    state: SharedState<W, C>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let app = build_router(state);
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
