//! # Audit Ledger
//!
//! A tamper-evident, in-memory audit event store. Every consequential action
//! is appended as an immutable event linked into one global SHA-256 hash
//! chain, so any later edit is detectable.
//!
//! ## Core Concepts
//!
//! - **Events**: Immutable records grouped by aggregate id, versioned per aggregate
//! - **Chain**: One hash chain across all aggregates, starting at `"genesis"`
//! - **Replay**: Reducer folds and time-travel reads over an aggregate's history
//! - **Retention**: Age-based pruning with legal holds that re-chains the survivors
//!
//! ## Example
//!
//! ```ignore
//! use audit_ledger::{EventInput, EventStore, RetentionEnforcer};
//! use std::sync::Arc;
//!
//! let store = Arc::new(EventStore::new());
//! store.append(
//!     EventInput::new("task:42", "task.assigned", "controller")
//!         .with_payload(json!({"assignee": "alpha"})),
//! )?;
//! store.verify()?;
//!
//! // Persist elsewhere, rehydrate later.
//! let bytes = audit_ledger::export::encode_frame(&store.export())?;
//!
//! // Prune everything older than 90 days.
//! let enforcer = RetentionEnforcer::new(Arc::clone(&store));
//! enforcer.enforce(90)?;
//! ```

pub mod chain;
pub mod clock;
pub mod error;
pub mod export;
pub mod replay;
pub mod retention;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ChainField, LedgerError, Result};
pub use replay::PlaybackStep;
pub use retention::{rechain, ArchiveEntry, LegalHold, RetentionEnforcer, RetentionReport};
pub use store::{EventStore, StoreConfig};
pub use subscriptions::{
    DropReason, EventSummary, Notification, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
