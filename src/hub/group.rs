//! Shop group and member types
//!
//! This module defines the per-shop state owned by the hub's event loop.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::connection::ClientIdentity;

use super::envelope::ConnectionId;

/// Hub-side handle of a registered connection
///
/// Holds the only sender of the connection's outbound queue. Dropping the
/// member closes the queue, so the queue is closed exactly once: when the
/// hub lets go of the member.
#[derive(Debug)]
pub struct Member {
    id: ConnectionId,
    identity: ClientIdentity,
    tx: mpsc::Sender<Bytes>,
}

impl Member {
    /// Create a member and the receiving end of its outbound queue
    pub fn new(identity: ClientIdentity, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let member = Self {
            id: ConnectionId::next(),
            identity,
            tx,
        };
        (member, rx)
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Caller identity
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }
}

/// Why a member could not take a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum Delivery {
    /// Outbound queue full, member is too slow
    Full,
    /// Outbound pump already gone
    Gone,
}

/// All connections registered for one shop
#[derive(Debug, Default)]
pub(super) struct ShopGroup {
    members: HashMap<ConnectionId, Member>,
}

impl ShopGroup {
    pub(super) fn insert(&mut self, member: Member) {
        self.members.insert(member.id, member);
    }

    pub(super) fn remove(&mut self, id: ConnectionId) -> Option<Member> {
        self.members.remove(&id)
    }

    pub(super) fn len(&self) -> usize {
        self.members.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(super) fn drain(&mut self) -> impl Iterator<Item = Member> + '_ {
        self.members.drain().map(|(_, member)| member)
    }

    /// Offer a frame to every member without waiting
    ///
    /// Returns the members that could not take it. The caller decides what
    /// to do with them; this never blocks on a slow queue.
    pub(super) fn offer(&self, payload: &Bytes) -> Vec<(ConnectionId, Delivery)> {
        self.members
            .values()
            .filter_map(|member| match member.tx.try_send(payload.clone()) {
                Ok(()) => None,
                Err(TrySendError::Full(_)) => Some((member.id, Delivery::Full)),
                Err(TrySendError::Closed(_)) => Some((member.id, Delivery::Gone)),
            })
            .collect()
    }
}
