//! In-process notification feed for ledger changes.
//!
//! Dashboards and other read-side consumers can follow appends without
//! polling `events()`:
//! - appended events, filterable by aggregate prefix and event type
//! - whole-chain replacements from imports and retention rewrites
//!
//! Buffers are bounded; a subscriber that falls behind is dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig {
//!     catch_up: true,
//!     filter: SubscriptionFilter::aggregate_prefixes(vec!["task:".into()]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(Notification::Appended { event }) => println!("{} {}", event.aggregate_id, event.event_type),
//!         Ok(Notification::CaughtUp) => println!("live"),
//!         Ok(Notification::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, EventSummary, Notification, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};
