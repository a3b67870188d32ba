//! Inbound pump
//!
//! Owns the read half of a connection. Client payloads are not interpreted:
//! messages are authored over the regular HTTP API, so this pump exists to
//! notice liveness and closure. Pong frames push the read deadline forward;
//! anything that ends the read loop unregisters the connection.

use futures_util::{Stream, StreamExt};
use tokio::time::{timeout_at, Duration, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::connection::ClientIdentity;
use crate::error::Error;
use crate::hub::{ConnectionId, Hub};

use super::state::PumpExit;

/// Read side of a connection
pub struct InboundPump<R> {
    pub(super) id: ConnectionId,
    pub(super) identity: ClientIdentity,
    pub(super) reader: R,
    pub(super) hub: Hub,
    pub(super) peer_timeout: Duration,
    pub(super) max_frame_size: usize,
}

impl<R> InboundPump<R>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    /// Read until the peer closes, fails, or goes silent
    ///
    /// Asks the hub to unregister the connection on the way out. The
    /// outbound pump learns about it when the hub closes its queue.
    pub async fn run(mut self) -> PumpExit {
        let exit = self.read_loop().await;

        match &exit {
            PumpExit::Failed(Error::ReadTimeout) => tracing::info!(
                connection_id = %self.id,
                shop_id = %self.identity.shop_id,
                user_id = %self.identity.user_id,
                timeout_secs = self.peer_timeout.as_secs(),
                "Peer stopped answering keepalive probes"
            ),
            exit if !exit.is_clean() => tracing::warn!(
                connection_id = %self.id,
                shop_id = %self.identity.shop_id,
                user_id = %self.identity.user_id,
                reason = %exit,
                "Connection closed unexpectedly"
            ),
            exit => tracing::debug!(
                connection_id = %self.id,
                shop_id = %self.identity.shop_id,
                reason = %exit,
                "Inbound pump finished"
            ),
        }

        self.hub.unregister(self.id).await;
        exit
    }

    async fn read_loop(&mut self) -> PumpExit {
        let mut deadline = Instant::now() + self.peer_timeout;

        loop {
            let frame = match timeout_at(deadline, self.reader.next()).await {
                Err(_) => return PumpExit::Failed(Error::ReadTimeout),
                Ok(None) => return PumpExit::PeerClosed,
                Ok(Some(Err(e))) => return PumpExit::Failed(e.into()),
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Message::Pong(_) => {
                    deadline = Instant::now() + self.peer_timeout;
                }
                Message::Close(_) => return PumpExit::PeerClosed,
                frame if frame.len() > self.max_frame_size => {
                    return PumpExit::Failed(Error::FrameTooLarge {
                        size: frame.len(),
                        max: self.max_frame_size,
                    });
                }
                frame => {
                    tracing::trace!(
                        connection_id = %self.id,
                        size = frame.len(),
                        "Discarding client frame"
                    );
                }
            }
        }
    }
}
