//! Standalone WebSocket front end
//!
//! Accepts `GET /shops/{shop_id}/messages/stream` upgrades, checks the
//! `Origin` allow-list during the handshake, asks a [`ShopAuthorizer`] who
//! the caller is, and attaches admitted connections to the [`Hub`].
//!
//! Applications that already run an HTTP stack can skip this module and
//! call [`Hub::attach`] from their own upgrade handler.
//!
//! [`Hub`]: crate::hub::Hub
//! [`Hub::attach`]: crate::hub::Hub::attach

pub mod auth;
pub mod config;
pub mod listener;

pub use auth::{
    parse_stream_path, AuthDecision, ShopAuthorizer, StreamRequest, TrustedHeaderAuthorizer,
};
pub use config::ServerConfig;
pub use listener::ShopStreamServer;
