//! Broadcast hub implementation
//!
//! The hub handle is cheap to clone and only ever talks to the event loop
//! through channels. The event loop is the single owner of the shop
//! registry, so the registry itself needs no lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::Result;

use super::config::HubConfig;
use super::envelope::{BroadcastEnvelope, ConnectionId, ShopId};
use super::group::{Delivery, Member, ShopGroup};
use super::stats::{Counters, HubStats};

/// State shared between hub handles and the event loop
#[derive(Debug, Default)]
struct Shared {
    /// Connection counts, written by the event loop only
    stats: RwLock<HubStats>,
    counters: Counters,
}

struct Inner {
    config: HubConfig,
    register_tx: mpsc::Sender<Member>,
    unregister_tx: mpsc::Sender<ConnectionId>,
    broadcast_tx: mpsc::Sender<BroadcastEnvelope>,
    shutdown_tx: watch::Sender<bool>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide broadcast hub
///
/// Groups connections by shop and fans each broadcast out to every
/// connection of the target shop. Delivery is best effort: a full broadcast
/// queue drops the broadcast, and a connection whose own queue is full is
/// disconnected rather than allowed to hold up the rest of its shop.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

impl Hub {
    /// Start a hub and its event loop on the current tokio runtime
    pub fn spawn(config: HubConfig) -> Result<Self> {
        config.validate()?;

        let (register_tx, register_rx) = mpsc::channel(config.control_queue_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.control_queue_capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared::default());

        let event_loop = EventLoop {
            shops: HashMap::new(),
            index: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            shutdown_rx,
            shared: Arc::clone(&shared),
        };
        let task = tokio::spawn(event_loop.run());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                register_tx,
                unregister_tx,
                broadcast_tx,
                shutdown_tx,
                shared,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Get the hub configuration
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Admit a connection into its shop's group
    ///
    /// After shutdown this is a no-op: the member is dropped, which closes
    /// its outbound queue so the connection winds itself down.
    pub async fn register(&self, member: Member) {
        if self.is_shut_down() {
            tracing::debug!(
                connection_id = %member.id(),
                shop_id = %member.identity().shop_id,
                "Hub shut down, registration ignored"
            );
            return;
        }

        if let Err(mpsc::error::SendError(member)) = self.inner.register_tx.send(member).await {
            tracing::debug!(
                connection_id = %member.id(),
                shop_id = %member.identity().shop_id,
                "Hub stopped, registration ignored"
            );
        }
    }

    /// Remove a connection from its shop's group
    ///
    /// Idempotent; unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) {
        // Fails only once the event loop is gone, which already closed every queue
        let _ = self.inner.unregister_tx.send(id).await;
    }

    /// Queue a broadcast for fan-out without waiting
    ///
    /// If the broadcast queue is full the envelope is dropped and logged.
    pub fn broadcast(&self, envelope: BroadcastEnvelope) {
        if self.is_shut_down() {
            tracing::debug!(
                shop_id = %envelope.shop_id,
                message_id = envelope.message_id(),
                "Hub shut down, broadcast ignored"
            );
            return;
        }

        let counters = &self.inner.shared.counters;
        match self.inner.broadcast_tx.try_send(envelope) {
            Ok(()) => Counters::incr(&counters.broadcasts_accepted, 1),
            Err(TrySendError::Full(envelope)) => {
                Counters::incr(&counters.broadcasts_dropped, 1);
                tracing::error!(
                    shop_id = %envelope.shop_id,
                    message_id = envelope.message_id(),
                    "Broadcast queue full, message dropped"
                );
            }
            Err(TrySendError::Closed(envelope)) => {
                tracing::debug!(
                    shop_id = %envelope.shop_id,
                    message_id = envelope.message_id(),
                    "Hub stopped, broadcast ignored"
                );
            }
        }
    }

    /// Stop the hub, closing every connection's outbound queue
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.inner.shutdown_tx.send_replace(true) {
            tracing::info!("Hub shutdown requested");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Wait for the event loop to exit
    ///
    /// Only the first caller actually waits; later calls return at once.
    pub async fn join(&self) {
        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Hub event loop panicked");
            }
        }
    }

    /// Get a snapshot of hub statistics
    pub async fn stats(&self) -> HubStats {
        let mut stats = self.inner.shared.stats.read().await.clone();
        self.inner.shared.counters.fill(&mut stats);
        stats
    }
}

/// The hub's single serialized execution context
struct EventLoop {
    /// Shop id to registered connections
    shops: HashMap<ShopId, ShopGroup>,
    /// Connection id to the shop it registered with
    index: HashMap<ConnectionId, ShopId>,
    register_rx: mpsc::Receiver<Member>,
    unregister_rx: mpsc::Receiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<BroadcastEnvelope>,
    shutdown_rx: watch::Receiver<bool>,
    shared: Arc<Shared>,
}

impl EventLoop {
    async fn run(mut self) {
        tracing::info!("Hub started");

        // Biased: a registration queued before a broadcast is applied first.
        // Broadcasts go ahead of unregisters so disconnect churn cannot
        // starve fan-out. A member whose unregister is still queued may be
        // offered one more frame.
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    tracing::info!("Hub shutting down");
                    break;
                }
                Some(member) = self.register_rx.recv() => self.register(member).await,
                Some(envelope) = self.broadcast_rx.recv() => self.broadcast(envelope).await,
                Some(id) = self.unregister_rx.recv() => {
                    self.unregister(id).await;
                }
                else => break,
            }
        }

        self.close_all().await;
    }

    async fn register(&mut self, member: Member) {
        let id = member.id();
        let identity = member.identity().clone();

        self.index.insert(id, identity.shop_id.clone());
        let group = self.shops.entry(identity.shop_id.clone()).or_default();
        group.insert(member);

        tracing::info!(
            connection_id = %id,
            shop_id = %identity.shop_id,
            user_id = %identity.user_id,
            username = %identity.username,
            shop_client_count = group.len(),
            "Client registered"
        );

        self.publish(&identity.shop_id).await;
    }

    /// Returns `false` if the connection was not registered
    async fn unregister(&mut self, id: ConnectionId) -> bool {
        let Some(shop_id) = self.index.remove(&id) else {
            return false;
        };
        let Some(group) = self.shops.get_mut(&shop_id) else {
            return false;
        };

        let member = group.remove(id);
        let remaining = group.len();
        if group.is_empty() {
            self.shops.remove(&shop_id);
        }

        if let Some(member) = member {
            tracing::info!(
                connection_id = %id,
                shop_id = %shop_id,
                user_id = %member.identity().user_id,
                username = %member.identity().username,
                remaining_clients = remaining,
                "Client unregistered"
            );
            // Dropping the member closes its outbound queue
            drop(member);
        }

        self.publish(&shop_id).await;
        true
    }

    async fn broadcast(&mut self, envelope: BroadcastEnvelope) {
        let counters = &self.shared.counters;

        let Some(group) = self.shops.get(&envelope.shop_id) else {
            Counters::incr(&counters.broadcasts_undeliverable, 1);
            tracing::debug!(
                shop_id = %envelope.shop_id,
                message_id = envelope.message_id(),
                "No connected clients for broadcast"
            );
            return;
        };

        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    shop_id = %envelope.shop_id,
                    message_id = envelope.message_id(),
                    "Failed to encode broadcast"
                );
                return;
            }
        };

        let client_count = group.len();
        let failed = group.offer(&payload);
        Counters::incr(
            &counters.frames_enqueued,
            (client_count - failed.len()) as u64,
        );

        tracing::debug!(
            shop_id = %envelope.shop_id,
            message_id = envelope.message_id(),
            client_count,
            failed = failed.len(),
            "Broadcast fanned out"
        );

        for (id, delivery) in failed {
            match delivery {
                Delivery::Full => {
                    Counters::incr(&self.shared.counters.slow_consumers_evicted, 1);
                    tracing::warn!(
                        connection_id = %id,
                        shop_id = %envelope.shop_id,
                        "Client send buffer full, disconnecting"
                    );
                }
                Delivery::Gone => {
                    tracing::debug!(
                        connection_id = %id,
                        shop_id = %envelope.shop_id,
                        "Client outbound pump gone, removing"
                    );
                }
            }
            self.unregister(id).await;
        }
    }

    async fn close_all(&mut self) {
        let mut closed = 0;
        for (_, mut group) in self.shops.drain() {
            closed += group.drain().count();
        }
        self.index.clear();

        // Pending registrations never join a group; dropping them closes their queues
        self.register_rx.close();
        while let Ok(member) = self.register_rx.try_recv() {
            drop(member);
        }

        *self.shared.stats.write().await = HubStats::default();
        tracing::info!(closed, "All connections closed");
    }

    /// Publish connection counts for one shop to the stats snapshot
    async fn publish(&self, shop_id: &ShopId) {
        let count = self.shops.get(shop_id).map_or(0, ShopGroup::len);

        let mut stats = self.shared.stats.write().await;
        if count == 0 {
            stats.shops.remove(shop_id);
        } else {
            stats.shops.insert(shop_id.clone(), count);
        }
        stats.active_shops = self.shops.len();
        stats.active_connections = self.index.len();
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;
    use crate::connection::ClientIdentity;
    use crate::hub::{ShopMessage, ShopMessageWithUsername};

    fn default_hub() -> Hub {
        Hub::spawn(HubConfig::default()).unwrap()
    }

    fn member(hub: &Hub, shop: &str, user: &str) -> (Member, mpsc::Receiver<Bytes>) {
        Member::new(
            ClientIdentity::new(shop, user, format!("{user}-name")),
            hub.config().per_client_queue_capacity,
        )
    }

    fn envelope(shop: &str, id: &str, text: &str) -> BroadcastEnvelope {
        BroadcastEnvelope::new(
            shop,
            ShopMessageWithUsername::new(
                ShopMessage {
                    id: id.into(),
                    shop_id: shop.into(),
                    user_id: "author".into(),
                    message: text.into(),
                    created_at: None,
                    updated_at: None,
                    is_edited: None,
                },
                "author-name",
            ),
        )
    }

    fn decoded_id(frame: &Bytes) -> String {
        let value: serde_json::Value = serde_json::from_slice(frame).unwrap();
        value["id"].as_str().unwrap().to_string()
    }

    async fn settle(hub: &Hub, done: impl Fn(&HubStats) -> bool) -> HubStats {
        for _ in 0..1000 {
            let stats = hub.stats().await;
            if done(&stats) {
                return stats;
            }
            tokio::task::yield_now().await;
        }
        panic!("hub did not reach expected state: {:?}", hub.stats().await);
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let config = HubConfig::default().broadcast_queue_capacity(0);
        assert!(Hub::spawn(config).is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_target_shop() {
        let hub = default_hub();
        let mut receivers = Vec::new();
        for user in ["a", "b", "c"] {
            let (m, rx) = member(&hub, "S1", user);
            hub.register(m).await;
            receivers.push(rx);
        }
        let (other, mut other_rx) = member(&hub, "S2", "d");
        hub.register(other).await;

        hub.broadcast(envelope("S1", "m1", "hi"));

        for rx in &mut receivers {
            let frame = rx.recv().await.unwrap();
            assert_eq!(decoded_id(&frame), "m1");
            assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        }
        let stats = settle(&hub, |s| s.frames_enqueued == 3).await;
        assert!(matches!(other_rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(stats.active_connections, 4);
        assert_eq!(stats.active_shops, 2);
        assert_eq!(stats.shop_connections(&ShopId::from("S1")), 3);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_prunes_group() {
        let hub = default_hub();
        let (m, mut rx) = member(&hub, "S1", "a");
        let id = m.id();
        hub.register(m).await;
        settle(&hub, |s| s.active_connections == 1).await;

        hub.unregister(id).await;
        hub.unregister(id).await;

        assert!(rx.recv().await.is_none());
        let stats = settle(&hub, |s| s.active_connections == 0).await;
        assert_eq!(stats.active_shops, 0);
        assert!(stats.shops.is_empty());
    }

    #[tokio::test]
    async fn test_group_counts_track_register_and_unregister() {
        let hub = default_hub();
        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for (shop, user) in [("S1", "a"), ("S1", "b"), ("S2", "c"), ("S1", "d"), ("S3", "e")] {
            let (m, rx) = member(&hub, shop, user);
            ids.push(m.id());
            receivers.push(rx);
            hub.register(m).await;
        }

        hub.unregister(ids[0]).await;
        hub.unregister(ids[2]).await;
        hub.unregister(ids[4]).await;

        let stats = settle(&hub, |s| s.active_connections == 2).await;
        assert_eq!(stats.shop_connections(&ShopId::from("S1")), 2);
        assert_eq!(stats.active_shops, 1);
        assert!(!stats.shops.contains_key(&ShopId::from("S2")));
        assert!(!stats.shops.contains_key(&ShopId::from("S3")));
    }

    #[tokio::test]
    async fn test_full_broadcast_queue_drops_envelope() {
        let config = HubConfig::default().broadcast_queue_capacity(1);
        let hub = Hub::spawn(config).unwrap();
        let (m, mut rx) = member(&hub, "S1", "a");
        hub.register(m).await;
        settle(&hub, |s| s.active_connections == 1).await;

        // No await in between, so the event loop cannot drain the queue
        hub.broadcast(envelope("S1", "m1", "first"));
        hub.broadcast(envelope("S1", "m2", "second"));

        let frame = rx.recv().await.unwrap();
        assert_eq!(decoded_id(&frame), "m1");

        let stats = settle(&hub, |s| s.frames_enqueued == 1).await;
        assert_eq!(stats.broadcasts_accepted, 1);
        assert_eq!(stats.broadcasts_dropped, 1);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted_without_affecting_others() {
        let config = HubConfig::default().per_client_queue_capacity(1);
        let hub = Hub::spawn(config).unwrap();
        let (slow, mut slow_rx) = member(&hub, "S1", "a");
        let (b, mut b_rx) = member(&hub, "S1", "b");
        let (c, mut c_rx) = member(&hub, "S1", "c");
        hub.register(slow).await;
        hub.register(b).await;
        hub.register(c).await;

        hub.broadcast(envelope("S1", "m0", "fill"));
        assert_eq!(decoded_id(&b_rx.recv().await.unwrap()), "m0");
        assert_eq!(decoded_id(&c_rx.recv().await.unwrap()), "m0");

        hub.broadcast(envelope("S1", "m1", "next"));
        assert_eq!(decoded_id(&b_rx.recv().await.unwrap()), "m1");
        assert_eq!(decoded_id(&c_rx.recv().await.unwrap()), "m1");

        // The slow member keeps what it had queued, then sees its queue closed
        assert_eq!(decoded_id(&slow_rx.recv().await.unwrap()), "m0");
        assert!(slow_rx.recv().await.is_none());

        let stats = settle(&hub, |s| s.slow_consumers_evicted == 1).await;
        assert_eq!(stats.shop_connections(&ShopId::from("S1")), 2);
    }

    #[tokio::test]
    async fn test_order_preserved_per_shop() {
        let hub = default_hub();
        let (a, mut a_rx) = member(&hub, "S1", "a");
        let (b, mut b_rx) = member(&hub, "S1", "b");
        hub.register(a).await;
        hub.register(b).await;

        for i in 0..10 {
            hub.broadcast(envelope("S1", &format!("m{i}"), "x"));
        }

        for rx in [&mut a_rx, &mut b_rx] {
            for i in 0..10 {
                assert_eq!(decoded_id(&rx.recv().await.unwrap()), format!("m{i}"));
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_served_ahead_of_queued_unregisters() {
        let hub = default_hub();
        let (a, mut a_rx) = member(&hub, "S1", "a");
        let id = a.id();

        // Nothing here yields, so the event loop sees all of it queued at once
        hub.register(a).await;
        for _ in 0..16 {
            hub.unregister(ConnectionId::next()).await;
        }
        hub.unregister(id).await;
        hub.broadcast(envelope("S1", "m1", "x"));

        assert_eq!(decoded_id(&a_rx.recv().await.unwrap()), "m1");
        assert!(a_rx.recv().await.is_none());

        let stats = settle(&hub, |s| s.active_connections == 0).await;
        assert_eq!(stats.frames_enqueued, 1);
        assert_eq!(stats.broadcasts_undeliverable, 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_members_is_undeliverable() {
        let hub = default_hub();

        hub.broadcast(envelope("nobody", "m1", "hello?"));

        let stats = settle(&hub, |s| s.broadcasts_undeliverable == 1).await;
        assert_eq!(stats.frames_enqueued, 0);
        assert_eq!(stats.active_shops, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_queues_and_ignores_later_work() {
        let hub = default_hub();
        let (a, mut a_rx) = member(&hub, "S1", "a");
        let (b, mut b_rx) = member(&hub, "S1", "b");
        hub.register(a).await;
        hub.register(b).await;
        settle(&hub, |s| s.active_connections == 2).await;

        hub.shutdown();
        hub.shutdown();
        hub.join().await;

        assert!(a_rx.recv().await.is_none());
        assert!(b_rx.recv().await.is_none());
        assert!(hub.is_shut_down());

        hub.broadcast(envelope("S1", "late", "x"));
        let stats = hub.stats().await;
        assert_eq!(stats.broadcasts_accepted, 0);
        assert_eq!(stats.active_connections, 0);

        // Registration after shutdown is a no-op that closes the member's queue
        let (late, mut late_rx) = member(&hub, "S1", "c");
        hub.register(late).await;
        assert!(late_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_join_waits_for_shutdown() {
        let hub = default_hub();
        let mut join = tokio_test::task::spawn(hub.join());
        tokio_test::assert_pending!(join.poll());

        hub.shutdown();
        join.await;
        assert!(hub.is_shut_down());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_removed_on_broadcast() {
        let hub = default_hub();
        let (a, a_rx) = member(&hub, "S1", "a");
        let (b, mut b_rx) = member(&hub, "S1", "b");
        hub.register(a).await;
        hub.register(b).await;
        drop(a_rx);

        hub.broadcast(envelope("S1", "m1", "x"));
        assert_eq!(decoded_id(&b_rx.recv().await.unwrap()), "m1");

        let stats = settle(&hub, |s| s.active_connections == 1).await;
        assert_eq!(stats.slow_consumers_evicted, 0);
    }
}
