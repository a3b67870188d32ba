//! Stream server listener
//!
//! Handles the TCP accept loop, the WebSocket upgrade, and authorization,
//! then hands each admitted connection to the hub.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

use crate::error::{Error, Result};
use crate::hub::{Hub, ShopId};

use super::auth::{parse_stream_path, AuthDecision, ShopAuthorizer, StreamRequest};
use super::config::ServerConfig;

/// WebSocket front end for a [`Hub`]
pub struct ShopStreamServer<A: ShopAuthorizer> {
    config: ServerConfig,
    authorizer: Arc<A>,
    hub: Hub,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<A: ShopAuthorizer> ShopStreamServer<A> {
    /// Create a new server feeding the given hub
    pub fn new(config: ServerConfig, hub: Hub, authorizer: A) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            authorizer: Arc::new(authorizer),
            hub,
            connection_semaphore,
        }
    }

    /// Get the hub this server feeds
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Shuts the hub down on the way out, which closes every stream.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "Shop stream server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            _ = self.accept_loop(&listener) => {}
        }

        self.hub.shutdown();
        self.hub.join().await;
        Ok(())
    }

    async fn accept_loop(&self, listener: &TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        tracing::debug!(peer = %peer_addr, "New connection");

        let config = self.config.clone();
        let authorizer = Arc::clone(&self.authorizer);
        let hub = self.hub.clone();

        tokio::spawn(async move {
            if let Err(e) = serve_stream(socket, peer_addr, config, authorizer, hub, permit).await {
                tracing::debug!(peer = %peer_addr, error = %e, "Stream request failed");
            }
        });
    }
}

/// Upgrade, authorize, then run the connection until it ends
async fn serve_stream<A: ShopAuthorizer>(
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    authorizer: Arc<A>,
    hub: Hub,
    _permit: Option<OwnedSemaphorePermit>,
) -> Result<()> {
    let mut upgrade: Option<(ShopId, HeaderMap)> = None;
    let callback = |request: &Request, response: Response| {
        // Route first, then origin
        let Some(shop_id) = parse_stream_path(request.uri().path()) else {
            return Err(reject(StatusCode::NOT_FOUND, "not found"));
        };

        let origin = request
            .headers()
            .get("origin")
            .and_then(|value| value.to_str().ok());
        if !config.origin_allowed(origin) {
            tracing::info!(peer = %peer_addr, origin = ?origin, "Stream rejected: origin not allowed");
            return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
        }

        upgrade = Some((shop_id, request.headers().clone()));
        Ok(response)
    };

    let ws_config = hub.config().websocket_config();
    let mut ws = match timeout(
        config.handshake_timeout,
        accept_hdr_async_with_config(socket, callback, Some(ws_config)),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(Error::Handshake("timed out".into())),
    };

    let Some((shop_id, headers)) = upgrade else {
        return Err(Error::Handshake("upgrade request not captured".into()));
    };
    let request = StreamRequest::new(shop_id, peer_addr, headers);

    let identity = match authorizer.authorize(&request).await {
        AuthDecision::Allow(identity) if identity.shop_id == request.shop_id => identity,
        AuthDecision::Allow(identity) => {
            tracing::warn!(
                shop_id = %request.shop_id,
                granted_shop_id = %identity.shop_id,
                user_id = %identity.user_id,
                "Authorizer granted a different shop, denying"
            );
            return deny(&mut ws, "not a shop member").await;
        }
        AuthDecision::Unauthenticated => {
            tracing::info!(peer = %peer_addr, shop_id = %request.shop_id, "Unauthorized stream attempt");
            return deny(&mut ws, "unauthorized").await;
        }
        AuthDecision::Forbidden => {
            tracing::info!(
                peer = %peer_addr,
                shop_id = %request.shop_id,
                "Stream denied: not a shop member"
            );
            return deny(&mut ws, "not a shop member").await;
        }
    };

    let tasks = hub.attach(ws, identity).await;
    let connection_id = tasks.id();
    match tasks.join().await {
        Ok((inbound, outbound)) => tracing::debug!(
            connection_id = %connection_id,
            inbound = %inbound,
            outbound = %outbound,
            "Connection closed"
        ),
        Err(e) => tracing::error!(connection_id = %connection_id, error = %e, "Connection task failed"),
    }
    Ok(())
}

async fn deny(ws: &mut WebSocketStream<TcpStream>, reason: &'static str) -> Result<()> {
    let frame = CloseFrame {
        code: CloseCode::Policy,
        reason: Utf8Bytes::from_static(reason),
    };
    ws.close(Some(frame)).await?;
    Ok(())
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}
