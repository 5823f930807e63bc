//! Hash-chain helpers shared by the store and the retention enforcer.
//!
//! Every event commits to its predecessor in global append order, so the
//! chain is a property of the whole store rather than of any one aggregate.

mod canonical;
mod digest;

pub use canonical::canonical_json;
pub use digest::DigestInput;

use crate::error::{ChainField, LedgerError, Result};
use crate::types::{Event, GENESIS};

/// Walk `events` from genesis and check every link and digest.
///
/// Returns the first mismatch as [`LedgerError::TamperDetected`].
pub fn verify_chain(events: &[Event]) -> Result<()> {
    let mut previous_hash = GENESIS;
    for event in events {
        if event.previous_hash != previous_hash {
            return Err(tampered(event, ChainField::PreviousHash, previous_hash, &event.previous_hash));
        }

        let expected = DigestInput::linked(event, previous_hash).event_hash()?;
        if event.event_hash != expected {
            return Err(tampered(event, ChainField::EventHash, &expected, &event.event_hash));
        }

        previous_hash = &event.event_hash;
    }
    Ok(())
}

fn tampered(event: &Event, field: ChainField, expected: &str, found: &str) -> LedgerError {
    tracing::warn!(event_id = %event.id, %field, "hash chain verification failed");
    LedgerError::TamperDetected {
        event_id: event.id.clone(),
        field,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}
