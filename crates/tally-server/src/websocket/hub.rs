//! Stream hub: owns the registry, the broadcaster task, and the publisher.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, Stream, StreamExt};
use parking_lot::Mutex;
use tally_auth::TokenVerifier;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::broadcast::Broadcaster;
use super::errors::{CloseReason, StreamError};
use super::ingress::{Publisher, event_queue};
use super::reader::ReadLoopExit;
use super::registry::ConnectionRegistry;
use super::session;

/// Lifecycle owner for the change stream.
///
/// `start` spawns the broadcaster; `shutdown` stops it, drains accepted
/// events, and closes every connection.
pub struct StreamHub {
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<dyn TokenVerifier>,
    publisher: Publisher,
    cancel: CancellationToken,
    broadcaster: Mutex<Option<JoinHandle<()>>>,
}

impl StreamHub {
    /// Start the hub. Must be called inside a Tokio runtime.
    pub fn start(verifier: Arc<dyn TokenVerifier>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (publisher, queue) = event_queue();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Broadcaster::new(registry.clone(), queue).run(cancel.clone()));
        info!("stream hub started");
        Self {
            registry,
            verifier,
            publisher,
            cancel,
            broadcaster: Mutex::new(Some(handle)),
        }
    }

    /// A handle for publishing events.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// The live connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Serve an upgraded axum socket until it closes.
    #[instrument(name = "stream_socket", skip_all)]
    pub async fn serve_socket(&self, socket: WebSocket) {
        let (sink, stream) = socket.split();
        let _ = self.serve(sink, stream).await;
    }

    /// Serve any message transport until it closes.
    pub async fn serve<W, R, E>(&self, sink: W, stream: R) -> Result<ReadLoopExit, StreamError>
    where
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        session::serve_connection(sink, stream, self.verifier.clone(), self.registry.clone()).await
    }

    /// Whether [`shutdown`](Self::shutdown) has started.
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the broadcaster and close every connection.
    ///
    /// Events published before this call are still dispatched. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.broadcaster.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let evicted = self.registry.close(&CloseReason::Shutdown);
        info!(evicted, "stream hub stopped");
    }
}

impl Drop for StreamHub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
