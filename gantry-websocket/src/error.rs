//! WebSocket error types.

use thiserror::Error;

/// Errors surfaced by the hub and its connections.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Underlying protocol failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message could not be serialized for the wire.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A send failed because the peer is gone.
    #[error("connection closed")]
    Closed,

    /// The draining deadline elapsed with writers outstanding.
    #[error("shutdown deadline elapsed")]
    Timeout,
}

/// Convenience alias.
pub type WebSocketResult<T> = Result<T, WebSocketError>;
