//! Subscription types for live ledger updates.

use crate::chain::canonical_json;
use crate::types::{format_timestamp, Event};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered notifications before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Replay matching events already in the ledger before going live.
    pub catch_up: bool,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            catch_up: false,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only aggregates starting with one of these prefixes (None = all).
    pub aggregate_prefixes: Option<Vec<String>>,

    /// Only these event types (None = all).
    pub event_types: Option<Vec<String>>,

    /// Include appended events.
    pub include_events: bool,

    /// Include whole-chain replacements (imports and retention rewrites).
    pub include_chain_events: bool,
}

impl SubscriptionFilter {
    /// Every appended event.
    pub fn events() -> Self {
        Self {
            include_events: true,
            ..Default::default()
        }
    }

    /// Events whose aggregate id starts with one of `prefixes`, e.g. `task:`.
    pub fn aggregate_prefixes(prefixes: Vec<String>) -> Self {
        Self {
            aggregate_prefixes: Some(prefixes),
            include_events: true,
            ..Default::default()
        }
    }

    /// Events of specific types.
    pub fn event_types(types: Vec<String>) -> Self {
        Self {
            event_types: Some(types),
            include_events: true,
            ..Default::default()
        }
    }

    /// Chain replacements only.
    pub fn chain() -> Self {
        Self {
            include_chain_events: true,
            ..Default::default()
        }
    }

    /// Everything.
    pub fn all() -> Self {
        Self {
            include_events: true,
            include_chain_events: true,
            ..Default::default()
        }
    }

    pub(crate) fn matches_event(&self, event: &Event) -> bool {
        if !self.include_events {
            return false;
        }

        if let Some(ref prefixes) = self.aggregate_prefixes {
            if !prefixes.iter().any(|p| event.aggregate_id.starts_with(p.as_str())) {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }

        true
    }
}

/// Notifications delivered to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A new event was appended (or replayed during catch-up).
    Appended { event: EventSummary },

    /// The whole chain was replaced by an import or a retention rewrite.
    ChainReplaced { event_count: usize, head_hash: String },

    /// Finished catch-up, now streaming live.
    CaughtUp,

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Summary of an event (payload included only when small).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventSummary {
    pub id: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub actor: String,
    pub timestamp: String,
    pub version: u64,
    pub event_hash: String,
    /// Canonical payload size in bytes.
    pub payload_size: usize,
    pub payload: Option<serde_json::Value>,
}

impl EventSummary {
    pub fn from_event(event: &Event, include_payload_threshold: usize) -> Self {
        // A payload that cannot be rendered is never embedded.
        let payload_size = canonical_json(&event.payload).map_or(usize::MAX, |text| text.len());
        let payload = if payload_size <= include_payload_threshold {
            Some(event.payload.clone())
        } else {
            None
        };

        Self {
            id: event.id.0.clone(),
            aggregate_id: event.aggregate_id.clone(),
            event_type: event.event_type.clone(),
            actor: event.actor.clone(),
            timestamp: format_timestamp(&event.timestamp),
            version: event.version,
            event_hash: event.event_hash.clone(),
            payload_size,
            payload,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive notifications.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<Notification>,
}

impl SubscriptionHandle {
    /// Receive the next notification (blocking).
    pub fn recv(&self) -> Result<Notification, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a notification (non-blocking).
    pub fn try_recv(&self) -> Result<Notification, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Notification, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
