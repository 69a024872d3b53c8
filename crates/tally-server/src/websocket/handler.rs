//! Axum entry point for `GET /api/stream/expenses`.

use axum::extract::State;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use tracing::warn;

use super::errors::StreamError;
use crate::metrics::WS_HANDSHAKE_FAILURES_TOTAL;
use crate::server::AppState;

/// Largest inbound frame accepted on a stream socket.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Upgrade the request and hand the socket to the stream hub.
///
/// Requests that cannot be upgraded get the usual HTTP error and never reach
/// the handshake.
pub async fn stream_expenses(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            let err = StreamError::UpgradeFailure(rejection.body_text());
            warn!(kind = err.kind(), error = %err, "rejecting stream request");
            counter!(WS_HANDSHAKE_FAILURES_TOTAL, "kind" => err.kind()).increment(1);
            return rejection.into_response();
        }
    };

    let hub = state.hub.clone();
    upgrade
        .max_message_size(MAX_FRAME_SIZE)
        .on_failed_upgrade(|e: axum::Error| {
            let err = StreamError::UpgradeFailure(e.to_string());
            warn!(kind = err.kind(), error = %err, "websocket upgrade failed");
            counter!(WS_HANDSHAKE_FAILURES_TOTAL, "kind" => err.kind()).increment(1);
        })
        .on_upgrade(move |socket| async move { hub.serve_socket(socket).await })
}
