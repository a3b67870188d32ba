//! Hub statistics

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::envelope::ShopId;

/// Snapshot of hub state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registered connections across all shops
    pub active_connections: usize,
    /// Shops with at least one registered connection
    pub active_shops: usize,
    /// Registered connections per shop
    pub shops: BTreeMap<ShopId, usize>,
    /// Broadcasts accepted into the broadcast queue
    pub broadcasts_accepted: u64,
    /// Broadcasts dropped because the broadcast queue was full
    pub broadcasts_dropped: u64,
    /// Broadcasts for shops with no registered connection
    pub broadcasts_undeliverable: u64,
    /// Frames placed on connection queues
    pub frames_enqueued: u64,
    /// Connections evicted because their queue was full
    pub slow_consumers_evicted: u64,
}

impl HubStats {
    /// Registered connections for one shop
    pub fn shop_connections(&self, shop_id: &ShopId) -> usize {
        self.shops.get(shop_id).copied().unwrap_or(0)
    }
}

/// Lifetime counters, updated from both callers and the event loop
#[derive(Debug, Default)]
pub(super) struct Counters {
    pub(super) broadcasts_accepted: AtomicU64,
    pub(super) broadcasts_dropped: AtomicU64,
    pub(super) broadcasts_undeliverable: AtomicU64,
    pub(super) frames_enqueued: AtomicU64,
    pub(super) slow_consumers_evicted: AtomicU64,
}

impl Counters {
    pub(super) fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Fill the lifetime counters of a snapshot
    pub(super) fn fill(&self, stats: &mut HubStats) {
        stats.broadcasts_accepted = self.broadcasts_accepted.load(Ordering::Relaxed);
        stats.broadcasts_dropped = self.broadcasts_dropped.load(Ordering::Relaxed);
        stats.broadcasts_undeliverable = self.broadcasts_undeliverable.load(Ordering::Relaxed);
        stats.frames_enqueued = self.frames_enqueued.load(Ordering::Relaxed);
        stats.slow_consumers_evicted = self.slow_consumers_evicted.load(Ordering::Relaxed);
    }
}
