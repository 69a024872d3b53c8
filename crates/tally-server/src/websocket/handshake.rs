//! Credential handshake run on every freshly upgraded socket.
//!
//! ```text
//! server -> "Waiting for AuthToken"
//! client -> {"token": "<credential>"}
//! server -> "Connected"              (only on success)
//! ```
//!
//! On failure the server closes the transport without sending anything else.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use serde::Deserialize;
use tally_auth::TokenVerifier;
use tokio::time;

use super::errors::StreamError;
use super::heartbeat::write_frame;

/// Prompt sent immediately after the upgrade.
pub const AWAITING_CREDENTIAL: &str = "Waiting for AuthToken";

/// Acknowledgement sent once the credential is accepted.
pub const CONNECTED: &str = "Connected";

/// How long a client has to send its credential.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct CredentialMessage {
    token: String,
}

/// Send the prompt, read one credential frame, and verify it.
///
/// Returns the authenticated owner identity. Control frames received before
/// the credential are skipped. The caller closes the transport on error.
pub async fn authenticate<W, R, E>(
    sink: &mut W,
    stream: &mut R,
    verifier: &dyn TokenVerifier,
) -> Result<String, StreamError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    write_frame(sink, Message::Text(AWAITING_CREDENTIAL.into()))
        .await
        .map_err(StreamError::TransportWriteFailure)?;

    let text = time::timeout(HANDSHAKE_TIMEOUT, read_credential_frame(stream))
        .await
        .map_err(|_| StreamError::HandshakeTimeout(HANDSHAKE_TIMEOUT))??;

    let token = parse_credential(&text)?;
    verifier
        .verify(&token)
        .await
        .map_err(StreamError::InvalidCredential)
}

/// Extract the token from a credential frame.
pub fn parse_credential(text: &str) -> Result<String, StreamError> {
    let message: CredentialMessage =
        serde_json::from_str(text).map_err(|e| StreamError::MalformedCredential(e.to_string()))?;
    Ok(message.token)
}

async fn read_credential_frame<R, E>(stream: &mut R) -> Result<String, StreamError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(Message::Binary(bytes))) => {
                return String::from_utf8(bytes.to_vec()).map_err(|_| {
                    StreamError::MalformedCredential("binary frame is not UTF-8".into())
                });
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                return Err(StreamError::TransportReadFailure(
                    "peer closed during handshake".into(),
                ));
            }
            Some(Err(e)) => return Err(StreamError::TransportReadFailure(e.to_string())),
            None => {
                return Err(StreamError::TransportReadFailure(
                    "connection dropped during handshake".into(),
                ));
            }
        }
    }
}
