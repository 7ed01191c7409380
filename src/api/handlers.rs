//! Request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::error;

use crate::api::state::SharedState;
use crate::chain::Wallet;
use crate::matrix::ChatClient;

/// JSON error body `{"error": "..."}`
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

/// Sign the JSON body and broadcast it; replies `account\nuser_id\nsignature`
pub async fn send_handler<W: Wallet, C: ChatClient>(
    State(state): State<SharedState<W, C>>,
    Json(payload): Json<Value>,
) -> Response {
    match state.sender.send(&payload).await {
        Ok(receipt) => (StatusCode::OK, receipt.to_string()).into_response(),
        Err(e) => {
            error!(error = %e, "send failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Current block number as plain text
pub async fn block_handler<W: Wallet, C: ChatClient>(
    State(state): State<SharedState<W, C>>,
) -> Response {
    match state.wallet.block_number().await {
        Ok(number) => (StatusCode::OK, number.to_string()).into_response(),
        Err(e) => {
            error!(error = %e, "block number unavailable");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
