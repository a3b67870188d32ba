//! Outbound pump
//!
//! Owns the write half of a connection. Drains the connection's queue one
//! text frame per envelope and sends a ping every probe interval. Every
//! write carries the write deadline.
//!
//! The pump never unregisters the connection itself. If a write fails it
//! closes its half and returns; the peer's resulting close or the read
//! deadline ends the inbound pump, which does the unregistering.

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Duration, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};

use crate::connection::ClientIdentity;
use crate::error::{Error, Result};
use crate::hub::ConnectionId;

use super::state::PumpExit;

/// Write side of a connection
pub struct OutboundPump<W> {
    pub(super) id: ConnectionId,
    pub(super) identity: ClientIdentity,
    pub(super) writer: W,
    pub(super) queue: mpsc::Receiver<Bytes>,
    pub(super) write_timeout: Duration,
    pub(super) probe_interval: Duration,
}

impl<W> OutboundPump<W>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    /// Write queued envelopes and keepalive probes until the queue closes
    /// or a write fails
    pub async fn run(mut self) -> PumpExit {
        let exit = self.write_loop().await;

        // Best effort; the peer may already be gone
        if let Ok(Err(e)) = timeout(self.write_timeout, self.writer.close()).await {
            tracing::trace!(connection_id = %self.id, error = %e, "Close after outbound exit failed");
        }

        if exit.is_clean() {
            tracing::debug!(
                connection_id = %self.id,
                shop_id = %self.identity.shop_id,
                reason = %exit,
                "Outbound pump finished"
            );
        } else {
            tracing::warn!(
                connection_id = %self.id,
                shop_id = %self.identity.shop_id,
                user_id = %self.identity.user_id,
                reason = %exit,
                "Failed to write to client"
            );
        }

        exit
    }

    async fn write_loop(&mut self) -> PumpExit {
        let mut probe = interval_at(Instant::now() + self.probe_interval, self.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                payload = self.queue.recv() => {
                    let Some(payload) = payload else {
                        return self.send_close().await;
                    };
                    let text = match Utf8Bytes::try_from(payload) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(
                                connection_id = %self.id,
                                error = %e,
                                "Dropping envelope that is not valid UTF-8"
                            );
                            continue;
                        }
                    };
                    if let Err(e) = self.write(Message::Text(text)).await {
                        return PumpExit::Failed(e);
                    }
                }
                _ = probe.tick() => {
                    if let Err(e) = self.write(Message::Ping(Bytes::new())).await {
                        return PumpExit::Failed(e);
                    }
                }
            }
        }
    }

    async fn send_close(&mut self) -> PumpExit {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: Utf8Bytes::from_static("shop stream closed"),
        };

        match self.write(Message::Close(Some(frame))).await {
            Ok(()) => PumpExit::QueueClosed,
            Err(e) if e.is_disconnect() => PumpExit::QueueClosed,
            Err(e) => PumpExit::Failed(e),
        }
    }

    async fn write(&mut self, frame: Message) -> Result<()> {
        match timeout(self.write_timeout, self.writer.send(frame)).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::WriteTimeout),
        }
    }
}
