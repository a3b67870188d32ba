//! Connection actor
//!
//! Bridges one upgraded WebSocket to the hub. The transport is split by
//! direction: the inbound pump owns the read half, the outbound pump owns
//! the write half. The halves share the socket through `futures-util`'s
//! split lock, held for one poll at a time. The two pumps never signal
//! each other directly; teardown travels through the hub (queue closure)
//! or the transport (close frame, read error).

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::hub::{ConnectionId, Hub, HubConfig, Member};

use super::identity::ClientIdentity;
use super::inbound::InboundPump;
use super::outbound::OutboundPump;
use super::state::PumpExit;

/// A bidirectional WebSocket transport, already upgraded
///
/// Implemented for `tokio_tungstenite::WebSocketStream` over any socket.
pub trait Transport:
    Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin + Send + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Message, WsError>>
        + Sink<Message, Error = WsError>
        + Unpin
        + Send
        + 'static
{
}

/// One live streaming connection, not yet running
pub struct Connection<T> {
    id: ConnectionId,
    identity: ClientIdentity,
    transport: T,
    queue: mpsc::Receiver<Bytes>,
    config: HubConfig,
}

impl<T: Transport> Connection<T> {
    /// Wrap an upgraded transport
    ///
    /// Returns the connection and the member to hand to [`Hub::register`].
    /// The member holds the only sender of the connection's outbound queue.
    pub fn new(transport: T, identity: ClientIdentity, config: &HubConfig) -> (Self, Member) {
        let (member, queue) = Member::new(identity.clone(), config.per_client_queue_capacity);
        let connection = Self {
            id: member.id(),
            identity,
            transport,
            queue,
            config: config.clone(),
        };
        (connection, member)
    }

    /// Connection id, as registered with the hub
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Caller identity
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Split into the two pumps, each to be run as its own task
    pub fn split(self, hub: Hub) -> (InboundPump<SplitStream<T>>, OutboundPump<SplitSink<T, Message>>) {
        let (writer, reader) = self.transport.split::<Message>();

        let inbound = InboundPump {
            id: self.id,
            identity: self.identity.clone(),
            reader,
            hub,
            peer_timeout: self.config.peer_timeout,
            max_frame_size: self.config.max_frame_size,
        };
        let outbound = OutboundPump {
            id: self.id,
            identity: self.identity,
            writer,
            queue: self.queue,
            write_timeout: self.config.write_timeout,
            probe_interval: self.config.probe_interval,
        };

        (inbound, outbound)
    }

    /// Spawn both pumps
    pub fn spawn(self, hub: Hub) -> ConnectionTasks {
        let id = self.id;
        let (inbound, outbound) = self.split(hub);

        ConnectionTasks {
            id,
            outbound: tokio::spawn(outbound.run()),
            inbound: tokio::spawn(inbound.run()),
        }
    }
}

/// Handles to a running connection's pumps
pub struct ConnectionTasks {
    id: ConnectionId,
    inbound: JoinHandle<PumpExit>,
    outbound: JoinHandle<PumpExit>,
}

impl ConnectionTasks {
    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for both pumps to finish
    ///
    /// Returns the inbound and outbound exit reasons, in that order.
    pub async fn join(self) -> Result<(PumpExit, PumpExit), JoinError> {
        let (inbound, outbound) = tokio::join!(self.inbound, self.outbound);
        Ok((inbound?, outbound?))
    }
}

impl Hub {
    /// Register an upgraded transport for a caller and start its pumps
    ///
    /// The caller must already be authorized as a member of
    /// `identity.shop_id`; the hub does no checking of its own.
    pub async fn attach<T: Transport>(&self, transport: T, identity: ClientIdentity) -> ConnectionTasks {
        let (connection, member) = Connection::new(transport, identity, self.config());
        self.register(member).await;

        tracing::info!(
            connection_id = %connection.id(),
            shop_id = %connection.identity().shop_id,
            user_id = %connection.identity().user_id,
            username = %connection.identity().username,
            "Client connected"
        );

        connection.spawn(self.clone())
    }
}
