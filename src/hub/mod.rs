//! Shop broadcast hub
//!
//! The hub keeps every live connection grouped by shop and fans broadcasts
//! out to the connections of one shop. A single event loop task owns the
//! registry; everything else talks to it through bounded channels.
//!
//! # Architecture
//!
//! ```text
//!                              Hub (cloneable handle)
//!        register() ──┐   unregister() ──┐   broadcast() ──┐   shutdown()
//!                     ▼                  ▼                 ▼        │
//!               [register_rx]     [unregister_rx]   [broadcast_rx]  │ watch
//!                     └──────────────────┼─────────────────┘        │
//!                                        ▼                          ▼
//!                          ┌──────────────────────────────┐
//!                          │ EventLoop (one task)         │
//!                          │ shops: HashMap<ShopId,       │
//!                          │   ShopGroup { members }>     │
//!                          └──────────────┬───────────────┘
//!                                         │ try_send (never blocks)
//!                 ┌───────────────────────┼───────────────────────┐
//!                 ▼                       ▼                       ▼
//!          [outbound queue]        [outbound queue]        [outbound queue]
//!           OutboundPump            OutboundPump            OutboundPump
//!                 │                       │                       │
//!                 └──► WebSocket          └──► WebSocket          └──► WebSocket
//! ```
//!
//! # Backpressure
//!
//! Two bounded queues shed load instead of blocking:
//!
//! - the broadcast queue: when full, [`Hub::broadcast`] drops the envelope
//!   and logs at error level;
//! - each connection's outbound queue: when full, the event loop evicts the
//!   connection so one slow reader cannot stall its whole shop.
//!
//! # Zero-Copy Fan-out
//!
//! Each broadcast is serialized once into `bytes::Bytes`; every member's
//! queue receives a reference-counted clone of the same buffer.

pub mod config;
pub mod envelope;
pub mod group;
pub mod stats;
pub mod store;

pub use config::HubConfig;
pub use envelope::{
    BroadcastEnvelope, ConnectionId, ShopId, ShopMessage, ShopMessageWithUsername,
};
pub use group::Member;
pub use stats::HubStats;
pub use store::Hub;
