//! Publish entry point used by mutation handlers.

use metrics::counter;
use tally_core::ExpenseEvent;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::metrics::STREAM_EVENTS_PUBLISHED_TOTAL;

/// Cloneable, non-blocking handle onto the broadcaster's queue.
#[derive(Clone, Debug)]
pub struct Publisher {
    tx: mpsc::UnboundedSender<ExpenseEvent>,
}

impl Publisher {
    /// Hand an event to the broadcaster.
    ///
    /// Returns immediately. `false` means the stream has shut down and the
    /// event was dropped; callers treat that as success for their own
    /// request.
    pub fn publish(&self, event: ExpenseEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => {
                counter!(STREAM_EVENTS_PUBLISHED_TOTAL).increment(1);
                trace!("event queued for broadcast");
                true
            }
            Err(mpsc::error::SendError(event)) => {
                warn!(owner_id = event.owner_id(), "stream is shut down, dropping event");
                false
            }
        }
    }

    /// Whether the broadcaster has stopped accepting events.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a publisher and the queue a [`Broadcaster`](super::broadcast::Broadcaster) drains.
pub fn event_queue() -> (Publisher, mpsc::UnboundedReceiver<ExpenseEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Publisher { tx }, rx)
}

#[cfg(test)]
mod tests {
    use tally_core::Expense;

    use super::*;

    fn event(owner: &str) -> ExpenseEvent {
        ExpenseEvent::new(owner, Expense::default())
    }

    #[tokio::test]
    async fn publish_enqueues_in_order() {
        let (publisher, mut rx) = event_queue();
        assert!(publisher.publish(event("u1")));
        assert!(publisher.clone().publish(event("u2")));
        assert_eq!(rx.recv().await.unwrap().owner_id(), "u1");
        assert_eq!(rx.recv().await.unwrap().owner_id(), "u2");
    }

    #[test]
    fn publish_after_shutdown_reports_drop() {
        let (publisher, rx) = event_queue();
        drop(rx);
        assert!(publisher.is_closed());
        assert!(!publisher.publish(event("u1")));
    }

    #[test]
    fn publish_never_blocks() {
        let (publisher, _rx) = event_queue();
        for _ in 0..10_000 {
            assert!(publisher.publish(event("u1")));
        }
    }
}
