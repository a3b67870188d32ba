//! Pump exit reasons
//!
//! Each pump runs in its open state until something ends it; the reason is
//! returned from `run` and logged.

use crate::error::Error;

/// Why a pump stopped
#[derive(Debug)]
pub enum PumpExit {
    /// Peer sent a close frame or the stream ended
    PeerClosed,
    /// Hub closed the outbound queue (unregister, eviction or shutdown)
    QueueClosed,
    /// Read/write failure, deadline expiry or oversized frame
    Failed(Error),
}

impl PumpExit {
    /// Whether the connection ended without a fault on our side or the peer's
    pub fn is_clean(&self) -> bool {
        match self {
            PumpExit::PeerClosed | PumpExit::QueueClosed => true,
            PumpExit::Failed(e) => e.is_disconnect(),
        }
    }
}

impl std::fmt::Display for PumpExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PumpExit::PeerClosed => write!(f, "peer closed"),
            PumpExit::QueueClosed => write!(f, "queue closed by hub"),
            PumpExit::Failed(e) => write!(f, "{}", e),
        }
    }
}
