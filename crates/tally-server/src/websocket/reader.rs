//! Inbound side of a registered connection.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use tokio::time;
use tracing::{debug, trace};

use super::connection::Connection;
use super::errors::{CloseReason, StreamError};
use super::heartbeat::PONG_WAIT;
use super::registry::ConnectionRegistry;

/// How the read-loop ended.
#[derive(Debug)]
pub enum ReadLoopExit {
    /// Another path evicted the connection first.
    Cancelled,
    /// The read-loop detected the end and evicted with this reason.
    Closed(CloseReason),
}

/// Consume inbound frames until the connection dies.
///
/// Every frame (data, ping, or pong) pushes the read deadline out by
/// [`PONG_WAIT`]. Payloads are otherwise ignored; clients never send
/// anything meaningful after the handshake.
pub async fn run_read_loop<R, E>(
    connection: Arc<Connection>,
    mut stream: R,
    registry: Arc<ConnectionRegistry>,
) -> ReadLoopExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let deadline = connection.read_deadline();
        let next = tokio::select! {
            biased;
            () = connection.cancelled() => return ReadLoopExit::Cancelled,
            next = time::timeout_at(deadline, stream.next()) => next,
        };

        let reason = match next {
            Err(_) => CloseReason::Failed(StreamError::KeepAliveTimeout(PONG_WAIT)),
            Ok(None) => CloseReason::Failed(StreamError::TransportReadFailure(
                "connection dropped".into(),
            )),
            Ok(Some(Err(e))) => CloseReason::Failed(StreamError::TransportReadFailure(e.to_string())),
            Ok(Some(Ok(Message::Close(frame)))) => {
                debug!(conn_id = %connection.id, ?frame, "close frame received");
                CloseReason::PeerClosed
            }
            Ok(Some(Ok(message))) => {
                connection.touch();
                match message {
                    Message::Pong(_) => trace!(conn_id = %connection.id, "pong"),
                    _ => trace!(conn_id = %connection.id, "ignoring inbound frame"),
                }
                continue;
            }
        };

        let _ = registry.evict(&connection, &reason);
        return ReadLoopExit::Closed(reason);
    }
}
