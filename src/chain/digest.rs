//! Event digest (SHA-256 over the pipe-joined event fields).

use super::canonical::canonical_json;
use crate::error::Result;
use crate::types::{format_timestamp, Event, Timestamp};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields that enter an event's digest.
#[derive(Clone, Copy, Debug)]
pub struct DigestInput<'a> {
    pub previous_hash: &'a str,
    pub aggregate_id: &'a str,
    pub event_type: &'a str,
    pub actor: &'a str,
    pub timestamp: &'a Timestamp,
    pub payload: &'a Value,
    pub version: u64,
}

impl<'a> DigestInput<'a> {
    /// Digest inputs for `event`, linked to `previous_hash` instead of its stored link.
    pub fn linked(event: &'a Event, previous_hash: &'a str) -> Self {
        Self {
            previous_hash,
            aggregate_id: &event.aggregate_id,
            event_type: &event.event_type,
            actor: &event.actor,
            timestamp: &event.timestamp,
            payload: &event.payload,
            version: event.version,
        }
    }

    /// Lowercase hex SHA-256 of
    /// `previous_hash|aggregate_id|event_type|actor|timestamp|payload|version`.
    pub fn event_hash(&self) -> Result<String> {
        let timestamp = format_timestamp(self.timestamp);
        let payload = canonical_json(self.payload)?;
        let version = self.version.to_string();

        let mut hasher = Sha256::new();
        let parts = [
            self.previous_hash,
            self.aggregate_id,
            self.event_type,
            self.actor,
            timestamp.as_str(),
            payload.as_str(),
            version.as_str(),
        ];
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update(b"|");
            }
            hasher.update(part.as_bytes());
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
