use std::time::Duration;

use crate::status::ResponseStatus;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Transport-level error. Fatal to the current connection.
    #[error("transport error: {0}")]
    Transport(#[from] xbridge_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] xbridge_frame::FrameError),

    /// Command attempted while the connection is not ready.
    #[error("not connected")]
    NotConnected,

    /// No matching reply arrived in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed or mismatched reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The module answered with a non-OK status.
    #[error("module reported {0}")]
    Status(ResponseStatus),

    /// Request rejected before it was sent.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Switching the module into API mode failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// A provisioning check failed.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error while loading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the error means the connection itself is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::NotConnected)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
