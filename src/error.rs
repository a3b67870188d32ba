//! Error types
//!
//! A single error enum covers configuration, transport and encoding failures.
//! Nothing here is fatal to the hub: connection-level errors end one
//! connection, encoding errors drop one broadcast.

use tokio_tungstenite::tungstenite;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hub, connection and server operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration (zero capacities, probe interval not below peer timeout, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// WebSocket protocol or transport failure
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// Socket-level I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope could not be serialized
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Peer stayed silent for longer than the liveness timeout
    #[error("peer read deadline expired")]
    ReadTimeout,

    /// A frame could not be written within the write deadline
    #[error("write deadline expired")]
    WriteTimeout,

    /// Inbound frame exceeded the configured maximum size
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Size of the offending frame
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// WebSocket upgrade did not complete
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl Error {
    /// Whether this error is an ordinary end of a connection rather than a fault
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Transport(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed
                | tungstenite::Error::Protocol(tungstenite::error::ProtocolError::SendAfterClosing),
            ) => true,
            Error::Transport(tungstenite::Error::Io(e)) | Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}
