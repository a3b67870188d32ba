//! Per-connection actor
//!
//! A [`Connection`] wraps one upgraded WebSocket and runs as two tasks:
//!
//! - [`InboundPump`]: reads frames, tracks keepalive acknowledgements,
//!   and unregisters the connection when the peer goes away;
//! - [`OutboundPump`]: writes queued envelopes and keepalive probes, and
//!   sends a close frame when the hub closes its queue.
//!
//! The probe interval is kept below the peer timeout, so a live peer always
//! sees a probe before its read deadline expires and a dead one is reaped
//! within one further probe interval.

pub mod actor;
pub mod identity;
pub mod inbound;
pub mod outbound;
pub mod state;

pub use actor::{Connection, ConnectionTasks, Transport};
pub use identity::ClientIdentity;
pub use inbound::InboundPump;
pub use outbound::OutboundPump;
pub use state::PumpExit;
