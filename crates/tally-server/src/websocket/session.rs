//! Per-connection lifecycle: handshake, register, run, tear down.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream};
use metrics::counter;
use tally_auth::TokenVerifier;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{Instrument, debug, info, info_span, warn};

use super::connection::{Connection, ConnectionState, OUTBOUND_CAPACITY};
use super::errors::StreamError;
use super::handshake::{self, CONNECTED};
use super::heartbeat::{self, WRITE_WAIT};
use super::reader::{self, ReadLoopExit};
use super::registry::ConnectionRegistry;
use crate::metrics::WS_HANDSHAKE_FAILURES_TOTAL;

/// Serve one upgraded socket from handshake to teardown.
///
/// Registered connections return once both the read-loop and the keep-alive
/// task have stopped. Handshake failures close the transport and return the
/// error without touching the registry.
pub async fn serve_connection<W, R, E>(
    mut sink: W,
    mut stream: R,
    verifier: Arc<dyn TokenVerifier>,
    registry: Arc<ConnectionRegistry>,
) -> Result<ReadLoopExit, StreamError>
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    debug!(state = ?ConnectionState::AwaitingCredential, "stream socket upgraded");

    let owner_id = match handshake::authenticate(&mut sink, &mut stream, verifier.as_ref()).await {
        Ok(owner_id) => owner_id,
        Err(err) => return Err(reject(sink, err).await),
    };

    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let connection = Arc::new(Connection::new(owner_id, tx));
    // Queued before registration so no event can overtake it.
    let _ = connection.try_enqueue(Arc::new(CONNECTED.to_owned()));
    if !registry.add(connection.clone()) {
        return Err(reject(sink, StreamError::Unavailable).await);
    }

    let span = info_span!("stream", conn_id = %connection.id, owner_id = connection.owner_id());
    async move {
        info!(
            connections = registry.owner_connection_count(connection.owner_id()),
            "stream client connected"
        );

        let keepalive = tokio::spawn(
            heartbeat::run_keepalive(connection.clone(), sink, rx, registry.clone())
                .in_current_span(),
        );
        let exit = reader::run_read_loop(connection.clone(), stream, registry.clone()).await;

        match time::timeout(WRITE_WAIT * 2, keepalive).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "keep-alive task failed"),
            Err(_) => warn!("keep-alive task did not stop in time"),
        }
        Ok(exit)
    }
    .instrument(span)
    .await
}

async fn reject<W>(mut sink: W, err: StreamError) -> StreamError
where
    W: Sink<Message> + Unpin,
{
    warn!(kind = err.kind(), error = %err, "stream handshake failed");
    counter!(WS_HANDSHAKE_FAILURES_TOTAL, "kind" => err.kind()).increment(1);
    let _ = time::timeout(WRITE_WAIT, sink.close()).await;
    err
}
