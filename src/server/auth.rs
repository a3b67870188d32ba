//! Authorization seam
//!
//! The server never decides on its own who may join a shop's stream. An
//! implementation of [`ShopAuthorizer`] authenticates the caller and checks
//! shop membership; the hub trusts whatever identity it returns.

use std::future::Future;
use std::net::SocketAddr;

use tokio_tungstenite::tungstenite::http::{header, HeaderMap};

use crate::connection::ClientIdentity;
use crate::hub::ShopId;

/// Path prefix of the stream route
const SHOPS_PREFIX: &str = "/shops/";

/// Path suffix of the stream route
const STREAM_SUFFIX: &str = "/messages/stream";

/// Extract the shop id from `/shops/{shop_id}/messages/stream`
pub fn parse_stream_path(path: &str) -> Option<ShopId> {
    let shop = path.strip_prefix(SHOPS_PREFIX)?.strip_suffix(STREAM_SUFFIX)?;
    if shop.is_empty() || shop.contains('/') {
        return None;
    }
    Some(ShopId::new(shop))
}

/// What the server learned about a stream request during the upgrade
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Shop named in the path
    pub shop_id: ShopId,
    /// Remote peer address
    pub peer_addr: SocketAddr,
    /// `Origin` header, if any
    pub origin: Option<String>,
    /// Token from an `Authorization: Bearer` header, if any
    pub bearer_token: Option<String>,
    /// All request headers
    pub headers: HeaderMap,
}

impl StreamRequest {
    /// Build from the upgrade request's parts
    pub fn new(shop_id: ShopId, peer_addr: SocketAddr, headers: HeaderMap) -> Self {
        let origin = header_str(&headers, header::ORIGIN.as_str()).map(String::from);
        let bearer_token = header_str(&headers, header::AUTHORIZATION.as_str())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(String::from);

        Self {
            shop_id,
            peer_addr,
            origin,
            bearer_token,
            headers,
        }
    }

    /// Get a header as a string, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        header_str(&self.headers, name)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Outcome of authorizing a stream request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Caller is an authenticated member of the requested shop
    Allow(ClientIdentity),
    /// Caller could not be authenticated
    Unauthenticated,
    /// Caller is authenticated but not a member of the shop
    Forbidden,
}

/// Decides whether a caller may join a shop's stream
pub trait ShopAuthorizer: Send + Sync + 'static {
    /// Authenticate the caller and check shop membership
    fn authorize(&self, request: &StreamRequest) -> impl Future<Output = AuthDecision> + Send;
}

/// Trusts identity headers set by an authenticating gateway
///
/// For deployments where a reverse proxy has already verified the caller
/// and their shop membership and forwards `x-user-id` (required) and
/// `x-username` (optional, defaults to the user id).
#[derive(Debug, Clone, Default)]
pub struct TrustedHeaderAuthorizer;

impl TrustedHeaderAuthorizer {
    /// Header carrying the authenticated user id
    pub const USER_ID_HEADER: &'static str = "x-user-id";

    /// Header carrying the display name
    pub const USERNAME_HEADER: &'static str = "x-username";
}

impl ShopAuthorizer for TrustedHeaderAuthorizer {
    async fn authorize(&self, request: &StreamRequest) -> AuthDecision {
        let Some(user_id) = request
            .header(Self::USER_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            return AuthDecision::Unauthenticated;
        };
        let username = request
            .header(Self::USERNAME_HEADER)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(user_id);

        AuthDecision::Allow(ClientIdentity::new(
            request.shop_id.clone(),
            user_id,
            username,
        ))
    }
}
