//! Subscription manager for broadcasting ledger notifications.

use crate::types::Event;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    DropReason, EventSummary, Notification, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};

/// Default threshold for including payload in notifications (bytes).
pub(crate) const DEFAULT_PAYLOAD_THRESHOLD: usize = 4096;

/// Internal subscription state.
struct Subscription {
    filter: SubscriptionFilter,
    sender: Sender<Notification>,
    /// Whether catch-up is complete.
    caught_up: bool,
}

impl Subscription {
    /// Try to send. Returns false if the buffer is full or the receiver is gone.
    fn try_send(&self, notification: Notification) -> bool {
        self.sender.try_send(notification).is_ok()
    }
}

/// Manages subscriptions and broadcasts notifications.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
    payload_threshold: usize,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::with_payload_threshold(DEFAULT_PAYLOAD_THRESHOLD)
    }

    pub fn with_payload_threshold(threshold: usize) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            payload_threshold: threshold,
        }
    }

    /// Register a subscription. It receives nothing live until
    /// [`mark_caught_up`](Self::mark_caught_up) is called.
    pub fn subscribe(&self, config: &SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        self.subscriptions.write().insert(
            id,
            Subscription {
                filter: config.filter.clone(),
                sender,
                caught_up: false,
            },
        );
        tracing::debug!(subscription = id.0, "subscription registered");

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.drop_subscription(id, DropReason::Unsubscribed);
    }

    /// Replay one historical event to a subscription that is still catching up.
    ///
    /// Non-matching events are skipped. Returns false if the subscription was
    /// dropped because its buffer filled.
    pub fn catch_up_event(&self, id: SubscriptionId, event: &Event) -> bool {
        let delivered = {
            let subs = self.subscriptions.read();
            match subs.get(&id) {
                Some(sub) if !sub.filter.matches_event(event) => true,
                Some(sub) => sub.try_send(Notification::Appended {
                    event: EventSummary::from_event(event, self.payload_threshold),
                }),
                None => false,
            }
        };
        if !delivered {
            self.drop_subscription(id, DropReason::BufferOverflow);
        }
        delivered
    }

    /// Mark a subscription as live and send `CaughtUp`.
    pub fn mark_caught_up(&self, id: SubscriptionId) -> bool {
        let delivered = {
            let mut subs = self.subscriptions.write();
            match subs.get_mut(&id) {
                Some(sub) => {
                    sub.caught_up = true;
                    sub.try_send(Notification::CaughtUp)
                }
                None => false,
            }
        };
        if !delivered {
            self.drop_subscription(id, DropReason::BufferOverflow);
        }
        delivered
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    /// Broadcast an appended event to matching live subscriptions.
    pub fn broadcast_appended(&self, event: &Event) {
        let mut summary = None;
        self.broadcast(
            |sub| sub.filter.matches_event(event),
            || Notification::Appended {
                event: summary
                    .get_or_insert_with(|| EventSummary::from_event(event, self.payload_threshold))
                    .clone(),
            },
        );
    }

    /// Broadcast a whole-chain replacement.
    pub fn broadcast_chain_replaced(&self, event_count: usize, head_hash: &str) {
        self.broadcast(
            |sub| sub.filter.include_chain_events,
            || Notification::ChainReplaced {
                event_count,
                head_hash: head_hash.to_string(),
            },
        );
    }

    /// Internal broadcast helper. Drops subscribers that fail to receive.
    fn broadcast<F, N>(&self, filter: F, mut notification: N)
    where
        F: Fn(&Subscription) -> bool,
        N: FnMut() -> Notification,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.caught_up && filter(sub) && !sub.try_send(notification()) {
                    to_remove.push(*id);
                }
            }
        }

        for id in to_remove {
            self.drop_subscription(id, DropReason::BufferOverflow);
        }
    }

    fn drop_subscription(&self, id: SubscriptionId, reason: DropReason) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            if reason == DropReason::BufferOverflow {
                tracing::warn!(subscription = id.0, "dropping slow subscriber");
            } else {
                tracing::debug!(subscription = id.0, "subscription removed");
            }
            // Best effort; a full buffer cannot take it either.
            let _ = sub.sender.try_send(Notification::Dropped { reason });
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
