//! Axum router construction.

use axum::routing::{get, post};
use axum::Router;

use crate::api::handlers;
use crate::api::state::SharedState;
use crate::chain::Wallet;
use crate::matrix::ChatClient;

/// `POST /send` and `GET /block`
pub fn build_router<W: Wallet, C: ChatClient>(state: SharedState<W, C>) -> Router {
    Router::new()
        .route("/send", post(handlers::send_handler::<W, C>))
        .route("/block", get(handlers::block_handler::<W, C>))
        .with_state(state)
}
