//! Retention: age-based pruning that rebuilds a self-consistent chain.
//!
//! A pass keeps every event newer than the horizon plus every event of an
//! aggregate under an active legal hold. If anything is dropped, the prior
//! export is archived and the survivors are re-linked from genesis with their
//! business fields untouched.

mod enforcer;

pub use enforcer::{rechain, ArchiveEntry, LegalHold, RetentionEnforcer, RetentionReport};
