//! Event fan-out to an owner's stream connections.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tally_core::ExpenseEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::{CloseReason, StreamError};
use super::registry::ConnectionRegistry;
use crate::metrics::STREAM_EVENTS_DELIVERED_TOTAL;

/// Longest a single connection may stall the broadcaster.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of dispatching one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Open connections bound to the event's owner.
    pub recipients: usize,
    /// Connections the frame was queued to.
    pub delivered: usize,
    /// Connections evicted because the frame could not be queued.
    pub evicted: usize,
}

/// Single consumer of the ingress queue.
///
/// Events are dispatched one at a time in arrival order. Each event is
/// serialized once and the same frame is queued to every matching
/// connection.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    queue: mpsc::UnboundedReceiver<ExpenseEvent>,
}

impl Broadcaster {
    /// Create a broadcaster draining `queue` into `registry`'s connections.
    pub fn new(registry: Arc<ConnectionRegistry>, queue: mpsc::UnboundedReceiver<ExpenseEvent>) -> Self {
        Self { registry, queue }
    }

    /// Run until cancelled or every publisher is dropped.
    ///
    /// On cancellation the queue is closed and events already accepted are
    /// still dispatched before returning.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = self.queue.recv() => match event {
                    Some(event) => {
                        let _ = self.dispatch(&event).await;
                    }
                    None => break,
                },
            }
        }

        self.queue.close();
        let mut drained = 0_usize;
        while let Some(event) = self.queue.recv().await {
            let _ = self.dispatch(&event).await;
            drained += 1;
        }
        info!(drained, "broadcaster stopped");
    }

    /// Queue one event to every open connection of its owner.
    ///
    /// A connection that cannot take the frame within [`SEND_TIMEOUT`] is
    /// evicted; the others still receive it.
    pub async fn dispatch(&self, event: &ExpenseEvent) -> DispatchReport {
        let frame = match event.to_frame() {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(owner_id = event.owner_id(), error = %e, "failed to serialize event");
                return DispatchReport::default();
            }
        };

        let snapshot = self.registry.snapshot();
        let mut report = DispatchReport::default();
        for conn in snapshot.for_owner(event.owner_id()) {
            report.recipients += 1;
            match conn.deliver(Arc::clone(&frame), SEND_TIMEOUT).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    let reason = CloseReason::Failed(StreamError::TransportWriteFailure(e.to_string()));
                    if self.registry.evict(conn, &reason) {
                        report.evicted += 1;
                    }
                }
            }
        }

        counter!(STREAM_EVENTS_DELIVERED_TOTAL).increment(report.delivered as u64);
        debug!(
            owner_id = event.owner_id(),
            expense_id = %event.payload().id,
            recipients = report.recipients,
            delivered = report.delivered,
            evicted = report.evicted,
            "broadcast event"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use tally_core::Expense;

    use super::*;
    use crate::websocket::connection::Connection;

    fn connect(
        registry: &ConnectionRegistry,
        owner: &str,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(Connection::new(owner, tx));
        assert!(registry.add(conn.clone()));
        (conn, rx)
    }

    fn event(owner: &str, title: &str) -> ExpenseEvent {
        ExpenseEvent::from(Expense {
            id: format!("e-{title}"),
            user_id: owner.into(),
            title: title.into(),
            price: 12.5,
            ..Expense::default()
        })
    }

    fn broadcaster(registry: &Arc<ConnectionRegistry>) -> (Broadcaster, mpsc::UnboundedSender<ExpenseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Broadcaster::new(registry.clone(), rx), tx)
    }

    #[tokio::test]
    async fn routes_only_to_owner() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = connect(&registry, "u1", 8);
        let (_b, mut rx_b) = connect(&registry, "u2", 8);
        let (bc, _tx) = broadcaster(&registry);

        let report = bc.dispatch(&event("u1", "lunch")).await;
        assert_eq!(report, DispatchReport { recipients: 1, delivered: 1, evicted: 0 });

        let frame = rx_a.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["title"], "lunch");
        assert_eq!(parsed["userID"], "u1");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn every_device_of_owner_receives() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = connect(&registry, "u1", 8);
        let (_b, mut rx_b) = connect(&registry, "u1", 8);
        let (bc, _tx) = broadcaster(&registry);

        let report = bc.dispatch(&event("u1", "rent")).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap(), rx_b.recv().await.unwrap());
    }

    #[tokio::test]
    async fn owner_without_connections_is_a_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = connect(&registry, "u2", 8);
        let (bc, _tx) = broadcaster(&registry);

        let report = bc.dispatch(&event("u1", "coffee")).await;
        assert_eq!(report, DispatchReport::default());
        assert!(rx_a.try_recv().is_err());
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn dead_connection_is_evicted_and_others_still_receive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (dead, rx_dead) = connect(&registry, "u1", 8);
        let (_live, mut rx_live) = connect(&registry, "u1", 8);
        drop(rx_dead);
        let (bc, _tx) = broadcaster(&registry);

        let report = bc.dispatch(&event("u1", "gas")).await;
        assert_eq!(report, DispatchReport { recipients: 2, delivered: 1, evicted: 1 });
        assert!(!dead.is_open());
        assert_eq!(registry.connection_count(), 1);
        assert!(rx_live.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connection_is_evicted_after_send_timeout() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (slow, _rx_slow) = connect(&registry, "u1", 1);
        assert!(slow.try_enqueue(Arc::new("backlog".into())));
        let (_fast, mut rx_fast) = connect(&registry, "u1", 8);
        let (bc, _tx) = broadcaster(&registry);

        let started = tokio::time::Instant::now();
        let report = bc.dispatch(&event("u1", "books")).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(report.delivered, 1);
        assert!(started.elapsed() <= SEND_TIMEOUT + Duration::from_millis(10));
        assert!(!slow.is_open());
        assert!(rx_fast.recv().await.is_some());
    }

    #[tokio::test]
    async fn run_preserves_publish_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = connect(&registry, "u1", 256);
        let (bc, tx) = broadcaster(&registry);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(bc.run(cancel.clone()));

        for n in 0..100 {
            tx.send(event("u1", &n.to_string())).unwrap();
        }
        for n in 0..100 {
            let frame = rx_a.recv().await.unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(parsed["title"], n.to_string());
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn run_drains_accepted_events_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a, mut rx_a) = connect(&registry, "u1", 16);
        let (bc, tx) = broadcaster(&registry);
        let cancel = CancellationToken::new();

        for n in 0..5 {
            tx.send(event("u1", &n.to_string())).unwrap();
        }
        cancel.cancel();
        bc.run(cancel).await;

        let mut received = 0;
        while rx_a.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5);
        assert!(tx.send(event("u1", "late")).is_err(), "queue closed after run");
    }

    #[tokio::test]
    async fn run_stops_when_publishers_drop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (bc, tx) = broadcaster(&registry);
        drop(tx);
        bc.run(CancellationToken::new()).await;
    }
}
