//! In-memory unread tally: recipient -> (sender -> pending count).
//!
//! A cache over the store's null-`read_at` rows. Lives for the process
//! lifetime so short reconnects keep their counts; a restart re-hydrates.

use dashmap::DashMap;
use std::sync::Arc;

use crate::store::UnreadCounts;
use crate::ws::broadcast::send_to_user;
use crate::ws::protocol::OutboundEvent;
use crate::ws::ConnectionRegistry;
use crate::UserId;

#[derive(Clone, Default)]
pub struct UnreadCounter {
    inner: Arc<DashMap<UserId, UnreadCounts>>,
}

impl UnreadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more pending message from `sender`. Returns the new count.
    pub fn increment(&self, recipient: UserId, sender: UserId) -> u64 {
        let mut counts = self.inner.entry(recipient).or_default();
        let count = counts.entry(sender).or_insert(0);
        *count += 1;
        *count
    }

    /// Reset the pair to zero. The entry is kept.
    pub fn clear(&self, recipient: UserId, sender: UserId) {
        self.inner.entry(recipient).or_default().insert(sender, 0);
    }

    /// Owned copy of a recipient's counts.
    pub fn snapshot(&self, recipient: UserId) -> UnreadCounts {
        self.inner
            .get(&recipient)
            .map(|counts| counts.value().clone())
            .unwrap_or_default()
    }

    /// Seed senders the cache has never seen with their durable counts.
    /// Existing in-memory entries win, even when lower: they already reflect
    /// events newer than the durable read.
    pub fn hydrate(&self, recipient: UserId, durable: UnreadCounts) -> UnreadCounts {
        let mut counts = self.inner.entry(recipient).or_default();
        for (sender, count) in durable {
            if count > 0 {
                counts.entry(sender).or_insert(count);
            }
        }
        counts.clone()
    }
}

/// Push the recipient's current counts if they are connected. Best effort.
pub fn push_unread_counts(registry: &ConnectionRegistry, unread: &UnreadCounter, user: UserId) {
    let event = OutboundEvent::UnreadCounts {
        counts: unread.snapshot(user),
    };
    if !send_to_user(registry, user, &event) {
        tracing::trace!(user_id = user, "Unread counts not pushed, user offline");
    }
}
