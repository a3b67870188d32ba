//! Caller identity attached to a connection

use crate::hub::ShopId;

/// Who is on the other end of a connection, and which shop they joined
///
/// Produced by the authorization step before the connection reaches the
/// hub; the hub trusts it as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Shop whose broadcasts this connection receives
    pub shop_id: ShopId,
    /// Authenticated user id
    pub user_id: String,
    /// Display name
    pub username: String,
}

impl ClientIdentity {
    /// Create a new identity
    pub fn new(
        shop_id: impl Into<ShopId>,
        user_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            shop_id: shop_id.into(),
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}
