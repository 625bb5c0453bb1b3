use thiserror::Error;

use crate::registry::ConnectionId;

/// Reasons an inbound text payload could not be turned into an [`Envelope`].
///
/// Decoding failures are recoverable: the payload is dropped and the
/// connection stays open.
///
/// [`Envelope`]: crate::message::Envelope
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("envelope is missing a string `type` field")]
    MissingType,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The recipient's outbound queue is gone; fatal to that recipient only.
    #[error("connection {0} is no longer reachable")]
    Send(ConnectionId),
    /// The recipient stopped draining its queue; treated like a failed send.
    #[error("connection {0} fell behind and its outbound queue is full")]
    Backlogged(ConnectionId),
    #[error("channel closed")]
    ChannelClosed,
    #[error("websocket transport error: {0}")]
    Transport(#[from] axum::Error),
}
