//! Real-time shop message broadcast
//!
//! Multiplexes many WebSocket connections into per-shop broadcast groups.
//! Connections are authorized and upgraded elsewhere; this crate takes the
//! upgraded stream, registers it with the [`Hub`], and keeps it fed with
//! every message broadcast to its shop until either side goes away.
//!
//! ```no_run
//! use shop_relay::{BroadcastEnvelope, ClientIdentity, Hub, HubConfig};
//! # async fn example<T: shop_relay::Transport>(
//! #     socket: T,
//! #     message: shop_relay::ShopMessageWithUsername,
//! # ) -> shop_relay::Result<()> {
//! let hub = Hub::spawn(HubConfig::default())?;
//!
//! // After authorization and upgrade
//! hub.attach(socket, ClientIdentity::new("shop-1", "user-7", "alice")).await;
//!
//! // After a message is persisted
//! hub.broadcast(BroadcastEnvelope::new("shop-1", message));
//!
//! // On graceful shutdown
//! hub.shutdown();
//! hub.join().await;
//! # Ok(())
//! # }
//! ```
//!
//! Delivery is at most once and best effort. Messages are never stored
//! here; durability belongs to whoever persisted the message before
//! broadcasting it.

pub mod connection;
pub mod error;
pub mod hub;
pub mod server;

pub use connection::{ClientIdentity, Connection, ConnectionTasks, PumpExit, Transport};
pub use error::{Error, Result};
pub use hub::{
    BroadcastEnvelope, ConnectionId, Hub, HubConfig, HubStats, Member, ShopId, ShopMessage,
    ShopMessageWithUsername,
};
pub use server::{AuthDecision, ServerConfig, ShopAuthorizer, ShopStreamServer, StreamRequest};
