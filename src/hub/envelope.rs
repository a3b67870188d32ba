//! Broadcast envelope types
//!
//! This module defines the key type for shop groups and the envelope that is
//! broadcast to every connection in a shop.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier of a shop, the partition key for broadcast groups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShopId(String);

impl ShopId {
    /// Create a new shop id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShopId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ShopId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Process-unique identifier of one streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next id
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chat message as persisted by the message store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopMessage {
    /// Message id
    pub id: String,
    /// Shop the message was posted to
    pub shop_id: String,
    /// Author's user id
    pub user_id: String,
    /// Message body
    pub message: String,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether the message was edited after posting
    pub is_edited: Option<bool>,
}

/// Persisted message plus the author's display name
///
/// This is the JSON object every connection receives, one text frame per
/// broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopMessageWithUsername {
    /// The persisted record
    #[serde(flatten)]
    pub message: ShopMessage,
    /// Author's display name
    pub username: String,
}

impl ShopMessageWithUsername {
    /// Attach a display name to a persisted message
    pub fn new(message: ShopMessage, username: impl Into<String>) -> Self {
        Self {
            message,
            username: username.into(),
        }
    }
}

/// A message addressed to every connection of one shop
///
/// Immutable once built. The payload is serialized once per broadcast and
/// the encoded bytes are shared by reference count across all members.
#[derive(Debug, Clone)]
pub struct BroadcastEnvelope {
    /// Target shop
    pub shop_id: ShopId,
    /// Payload
    pub message: ShopMessageWithUsername,
}

impl BroadcastEnvelope {
    /// Create an envelope for a shop
    pub fn new(shop_id: impl Into<ShopId>, message: ShopMessageWithUsername) -> Self {
        Self {
            shop_id: shop_id.into(),
            message,
        }
    }

    /// Id of the carried message, for logging
    pub fn message_id(&self) -> &str {
        &self.message.message.id
    }

    /// Serialize the payload to the JSON text sent on the wire
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(&self.message)?))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::Value;

    use super::*;

    fn sample() -> ShopMessageWithUsername {
        ShopMessageWithUsername::new(
            ShopMessage {
                id: "m1".into(),
                shop_id: "s1".into(),
                user_id: "u1".into(),
                message: "hi".into(),
                created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
                updated_at: None,
                is_edited: Some(false),
            },
            "alice",
        )
    }

    #[test]
    fn test_encode_is_flat_json_object() {
        let envelope = BroadcastEnvelope::new("s1", sample());
        let encoded = envelope.encode().unwrap();

        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value["id"], "m1");
        assert_eq!(value["shop_id"], "s1");
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["message"], "hi");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["is_edited"], false);
        assert!(value["updated_at"].is_null());
        assert!(value.get("shop").is_none());
    }

    #[test]
    fn test_decode_matches_source() {
        let envelope = BroadcastEnvelope::new("s1", sample());
        let encoded = envelope.encode().unwrap();

        let decoded: ShopMessageWithUsername = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, envelope.message);
        assert_eq!(envelope.message_id(), "m1");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_shop_id_display() {
        let id = ShopId::from("shop-42");
        assert_eq!(id.to_string(), "shop-42");
        assert_eq!(id.as_str(), "shop-42");
    }
}
