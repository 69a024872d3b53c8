//! Authenticated stream connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use super::heartbeat::PONG_WAIT;

/// Capacity of each connection's outbound frame queue.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Lifecycle of a single physical connection.
///
/// `Closing` and `Closed` are terminal and reachable from every other state.
/// A [`Connection`] is only built once the peer has authenticated, so it
/// starts in `Registered`; `Connecting` and `AwaitingCredential` describe the
/// socket before that point and appear only as log context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgrade accepted, nothing sent yet.
    Connecting,
    /// Credential prompt sent, waiting for the token frame.
    AwaitingCredential,
    /// Authenticated and present in the registry.
    Registered,
    /// Teardown started; tasks are being cancelled.
    Closing,
    /// Transport closed.
    Closed,
}

/// Why a frame could not be queued for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The outbound queue stayed full for the whole send budget.
    #[error("outbound queue full for {0:?}")]
    Timeout(Duration),
    /// The keep-alive task has stopped and no longer drains the queue.
    #[error("outbound queue closed")]
    Closed,
}

/// A registered, authenticated stream client.
///
/// Shared between the registry, the read-loop and the keep-alive task via
/// `Arc`. Only the keep-alive task touches the transport's write half; every
/// other writer goes through the outbound queue.
pub struct Connection {
    /// Unique connection ID (never reused).
    pub id: String,
    owner_id: String,
    tx: mpsc::Sender<Arc<String>>,
    cancel: CancellationToken,
    closing: AtomicBool,
    state: Mutex<ConnectionState>,
    last_seen: Mutex<Instant>,
    /// When this connection completed its handshake.
    pub connected_at: Instant,
    delivered: AtomicU64,
}

impl Connection {
    /// Create a connection bound to `owner_id` that writes through `tx`.
    pub fn new(owner_id: impl Into<String>, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id: format!("conn_{}", Uuid::now_v7()),
            owner_id: owner_id.into(),
            tx,
            cancel: CancellationToken::new(),
            closing: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::Registered),
            last_seen: Mutex::new(now),
            connected_at: now,
            delivered: AtomicU64::new(0),
        }
    }

    /// The authenticated identity this connection receives events for.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// `false` once teardown has started.
    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire)
    }

    /// Queue a frame, waiting at most `budget` for room.
    pub async fn deliver(&self, frame: Arc<String>, budget: Duration) -> Result<(), DeliveryError> {
        match self.tx.send_timeout(frame, budget).await {
            Ok(()) => {
                let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::Timeout(budget)),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Queue a frame without waiting. Returns `false` if full or closed.
    pub fn try_enqueue(&self, frame: Arc<String>) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Frames successfully queued through [`deliver`](Self::deliver).
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Record inbound activity; pushes the read deadline out.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Instant after which a silent peer is considered dead.
    pub fn read_deadline(&self) -> Instant {
        *self.last_seen.lock() + PONG_WAIT
    }

    /// Time since the last inbound frame (or the handshake).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Resolves once teardown has started.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Start teardown. Returns `true` for exactly one caller.
    ///
    /// Flips the connection to `Closing` and cancels its tasks. Later calls
    /// (from the other detection path) are no-ops.
    pub(crate) fn begin_close(&self) -> bool {
        if self.closing.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.state.lock() = ConnectionState::Closing;
        self.cancel.cancel();
        true
    }

    /// Called by the keep-alive task once the transport is closed.
    pub(crate) fn mark_closed(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
