//! Keep-alive monitor and sole writer for a connection's transport.
//!
//! One task per connection owns the write half of the socket. It drains the
//! outbound queue, emits a ping every [`PING_PERIOD`], and bounds every write
//! by [`WRITE_WAIT`]. Any failed write evicts the connection. The matching
//! inbound side (read deadline of [`PONG_WAIT`]) lives in the read-loop.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use super::connection::Connection;
use super::errors::{CloseReason, StreamError};
use super::registry::ConnectionRegistry;

/// Silence from the peer longer than this kills the connection.
pub const PONG_WAIT: Duration = Duration::from_secs(30);

/// Interval between pings. Must stay below [`PONG_WAIT`].
pub const PING_PERIOD: Duration = Duration::from_secs(27);

/// Time budget for any single write to the peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Why the keep-alive task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveExit {
    /// The connection was evicted by another path.
    Cancelled,
    /// A frame or ping could not be written.
    WriteFailed,
    /// Every sender of the outbound queue is gone.
    QueueClosed,
}

/// Drive a connection's write half until it is torn down.
///
/// The transport is closed exactly once, when this task exits.
pub async fn run_keepalive<W>(
    connection: Arc<Connection>,
    mut sink: W,
    mut outbound: mpsc::Receiver<Arc<String>>,
    registry: Arc<ConnectionRegistry>,
) -> KeepAliveExit
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    let exit = loop {
        tokio::select! {
            biased;
            () = connection.cancelled() => break KeepAliveExit::Cancelled,
            // Ahead of the queue so a steady backlog cannot starve pings.
            _ = ping.tick() => {
                if let Err(detail) = write_frame(&mut sink, Message::Ping(Bytes::new())).await {
                    let _ = registry.evict(
                        &connection,
                        &CloseReason::Failed(StreamError::TransportWriteFailure(format!("ping: {detail}"))),
                    );
                    break KeepAliveExit::WriteFailed;
                }
                trace!(conn_id = %connection.id, "ping sent");
            }
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    let _ = registry.evict(
                        &connection,
                        &CloseReason::Failed(StreamError::TransportWriteFailure(
                            "outbound queue closed".into(),
                        )),
                    );
                    break KeepAliveExit::QueueClosed;
                };
                if let Err(detail) = write_frame(&mut sink, Message::Text(text.as_str().into())).await {
                    let _ = registry.evict(
                        &connection,
                        &CloseReason::Failed(StreamError::TransportWriteFailure(detail)),
                    );
                    break KeepAliveExit::WriteFailed;
                }
            }
        }
    };

    if time::timeout(WRITE_WAIT, sink.close()).await.is_err() {
        debug!(conn_id = %connection.id, "transport close timed out");
    }
    connection.mark_closed();
    debug!(conn_id = %connection.id, ?exit, "keep-alive stopped");
    exit
}

/// Write one frame within [`WRITE_WAIT`].
pub(crate) async fn write_frame<W>(sink: &mut W, message: Message) -> Result<(), String>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match time::timeout(WRITE_WAIT, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write exceeded {WRITE_WAIT:?}")),
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::channel::mpsc as fmpsc;

    use super::*;
    use crate::websocket::connection::ConnectionState;

    struct Harness {
        connection: Arc<Connection>,
        registry: Arc<ConnectionRegistry>,
        wire: fmpsc::UnboundedReceiver<Message>,
        handle: tokio::task::JoinHandle<KeepAliveExit>,
    }

    fn start() -> Harness {
        let (tx, rx) = mpsc::channel(8);
        let connection = Arc::new(Connection::new("u1", tx));
        let registry = Arc::new(ConnectionRegistry::new());
        assert!(registry.add(connection.clone()));
        let (sink, wire) = fmpsc::unbounded::<Message>();
        let handle = tokio::spawn(run_keepalive(
            connection.clone(),
            sink,
            rx,
            registry.clone(),
        ));
        Harness {
            connection,
            registry,
            wire,
            handle,
        }
    }

    #[test]
    fn ping_period_is_below_pong_wait() {
        assert!(PING_PERIOD < PONG_WAIT);
    }

    #[tokio::test]
    async fn queued_frames_are_written_in_order() {
        let mut h = start();
        for n in 0..3 {
            assert!(h.connection.try_enqueue(Arc::new(format!("frame-{n}"))));
        }
        for n in 0..3 {
            match h.wire.next().await.unwrap() {
                Message::Text(text) => assert_eq!(text.as_str(), format!("frame-{n}")),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        let _ = h.registry.evict(&h.connection, &CloseReason::Shutdown);
        assert_eq!(h.handle.await.unwrap(), KeepAliveExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_schedule() {
        let mut h = start();
        time::sleep(PING_PERIOD * 2 + Duration::from_secs(1)).await;
        assert!(matches!(h.wire.next().await, Some(Message::Ping(_))));
        assert!(matches!(h.wire.next().await, Some(Message::Ping(_))));
        let _ = h.registry.evict(&h.connection, &CloseReason::Shutdown);
        let _ = h.handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pings_keep_schedule_under_steady_backlog() {
        let (tx, rx) = mpsc::channel(8);
        let connection = Arc::new(Connection::new("u1", tx));
        let registry = Arc::new(ConnectionRegistry::new());
        assert!(registry.add(connection.clone()));

        // Every write costs 10ms, so a feed of one frame per 10ms on top of
        // a small head start keeps the queue non-empty without filling it.
        let (wire_tx, mut wire) = fmpsc::unbounded::<Message>();
        let sink = Box::pin(futures::sink::unfold(wire_tx, |wire_tx, msg: Message| async move {
            time::sleep(Duration::from_millis(10)).await;
            wire_tx.unbounded_send(msg).map_err(|e| e.into_send_error())?;
            Ok::<_, fmpsc::SendError>(wire_tx)
        }));
        let handle = tokio::spawn(run_keepalive(connection.clone(), sink, rx, registry.clone()));

        for n in 0..5 {
            assert!(connection.try_enqueue(Arc::new(format!("head-{n}"))));
        }
        let mut feed = time::interval(Duration::from_millis(10));
        let until = Instant::now() + Duration::from_secs(90);
        while Instant::now() < until {
            let _ = feed.tick().await;
            let _ = connection.try_enqueue(Arc::new("tick".into()));
        }

        let _ = registry.evict(&connection, &CloseReason::Shutdown);
        assert_eq!(handle.await.unwrap(), KeepAliveExit::Cancelled);

        let mut pings = 0;
        let mut texts = 0;
        while let Some(msg) = wire.next().await {
            match msg {
                Message::Ping(_) => pings += 1,
                Message::Text(_) => texts += 1,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert!(pings >= 3, "pings={pings} texts={texts}");
        assert!(texts > 1000);
    }

    #[tokio::test]
    async fn cancellation_closes_transport_once() {
        let mut h = start();
        let _ = h.registry.evict(&h.connection, &CloseReason::Shutdown);
        assert_eq!(h.handle.await.unwrap(), KeepAliveExit::Cancelled);
        assert!(h.wire.next().await.is_none());
        assert_eq!(h.connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn write_failure_evicts() {
        let h = start();
        drop(h.wire);
        assert!(h.connection.try_enqueue(Arc::new("lost".into())));
        assert_eq!(h.handle.await.unwrap(), KeepAliveExit::WriteFailed);
        assert_eq!(h.registry.connection_count(), 0);
        assert!(!h.connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn ping_failure_evicts() {
        let h = start();
        drop(h.wire);
        assert_eq!(h.handle.await.unwrap(), KeepAliveExit::WriteFailed);
        assert_eq!(h.registry.connection_count(), 0);
    }
}
