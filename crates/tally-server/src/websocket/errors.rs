//! Stream failure taxonomy and connection close reasons.

use std::fmt;
use std::time::Duration;

use tally_auth::AuthError;

/// Everything that can end a stream connection abnormally.
///
/// All variants are local to one connection: they produce a teardown and a
/// log line, never a retry and never a frame to the client.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The HTTP request could not be upgraded to a WebSocket.
    #[error("websocket upgrade failed: {0}")]
    UpgradeFailure(String),

    /// The client sent no credential within the handshake window.
    #[error("no credential received within {0:?}")]
    HandshakeTimeout(Duration),

    /// The credential frame was not `{"token": "..."}`.
    #[error("malformed credential message: {0}")]
    MalformedCredential(String),

    /// The verifier rejected the credential (forged, expired, unknown).
    #[error("credential rejected: {0}")]
    InvalidCredential(#[source] AuthError),

    /// Writing to the peer failed or exceeded its time budget.
    #[error("transport write failed: {0}")]
    TransportWriteFailure(String),

    /// Reading from the peer failed or the stream ended.
    #[error("transport read failed: {0}")]
    TransportReadFailure(String),

    /// No frame (data or heartbeat ack) arrived within the peer timeout.
    #[error("no frame from peer within {0:?}")]
    KeepAliveTimeout(Duration),

    /// The hub is shutting down and accepts no new connections.
    #[error("stream is shutting down")]
    Unavailable,
}

impl StreamError {
    /// Stable snake_case label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpgradeFailure(_) => "upgrade_failure",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::MalformedCredential(_) => "malformed_credential",
            Self::InvalidCredential(_) => "invalid_credential",
            Self::TransportWriteFailure(_) => "transport_write_failure",
            Self::TransportReadFailure(_) => "transport_read_failure",
            Self::KeepAliveTimeout(_) => "keepalive_timeout",
            Self::Unavailable => "unavailable",
        }
    }
}

/// Why a registered connection was torn down.
#[derive(Debug)]
pub enum CloseReason {
    /// The client sent a close frame.
    PeerClosed,
    /// The hub is stopping.
    Shutdown,
    /// An I/O or liveness failure.
    Failed(StreamError),
}

impl CloseReason {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::Shutdown => "shutdown",
            Self::Failed(err) => err.kind(),
        }
    }

    /// Whether this close was caused by a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::Shutdown => f.write_str("server shutting down"),
            Self::Failed(err) => write!(f, "{err}"),
        }
    }
}

impl From<StreamError> for CloseReason {
    fn from(err: StreamError) -> Self {
        Self::Failed(err)
    }
}
