//! Core types for the audit ledger.

use crate::error::{LedgerError, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, SubsecRound, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Predecessor hash recorded on the first event of a chain.
pub const GENESIS: &str = "genesis";

/// Timezone-aware instant carried by every event.
pub type Timestamp = DateTime<FixedOffset>;

/// Globally unique event identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        EventId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render a timestamp the way it enters the digest and the wire format.
///
/// The fraction is omitted when zero, printed with six digits otherwise
/// (nine if there is sub-microsecond precision). The offset is kept as given,
/// with a seconds part only when it has one.
pub fn format_timestamp(ts: &Timestamp) -> String {
    let base = ts.format("%Y-%m-%dT%H:%M:%S");
    let offset = if ts.offset().local_minus_utc() % 60 == 0 {
        ts.format("%:z")
    } else {
        ts.format("%::z")
    };
    let nanos = ts.nanosecond();
    if nanos == 0 {
        format!("{}{}", base, offset)
    } else if nanos % 1_000 == 0 {
        format!("{}.{:06}{}", base, nanos / 1_000, offset)
    } else {
        format!("{}.{:09}{}", base, nanos, offset)
    }
}

/// Parse an ISO-8601 timestamp. Strings without an offset are taken as UTC.
///
/// Offsets may carry seconds (`+05:30:15`).
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts);
    }
    let invalid = || LedgerError::InvalidArgument(format!("invalid timestamp: {:?}", s));

    if let Some((local, offset)) = split_seconds_offset(s) {
        return parse_naive(local)
            .and_then(|naive| offset.from_local_datetime(&naive).single())
            .ok_or_else(invalid);
    }
    parse_naive(s).map(from_naive_utc).ok_or_else(invalid)
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Split a trailing `±HH:MM:SS` offset off `s`.
fn split_seconds_offset(s: &str) -> Option<(&str, FixedOffset)> {
    let at = s.len().checked_sub(9)?;
    let (local, offset) = (s.get(..at)?, s.get(at..)?);
    let bytes = offset.as_bytes();
    let sign = match bytes[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    if bytes[3] != b':' || bytes[6] != b':' {
        return None;
    }
    let field = |range: std::ops::Range<usize>| -> Option<i32> {
        let text = offset.get(range)?;
        if !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        text.parse().ok()
    };
    let seconds = field(1..3)? * 3600 + field(4..6)? * 60 + field(7..9)?;
    Some((local, FixedOffset::east_opt(sign * seconds)?))
}

/// Attach UTC to a naive instant.
pub fn from_naive_utc(naive: NaiveDateTime) -> Timestamp {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).into()
}

/// Truncate to the microsecond precision stored on appended events.
pub(crate) fn to_stored_precision(ts: Timestamp) -> Timestamp {
    ts.trunc_subsecs(6)
}

/// A single immutable event in the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier, assigned at creation.
    pub id: EventId,

    /// Groups related events, e.g. `task:42`.
    pub aggregate_id: String,

    /// What happened.
    pub event_type: String,

    /// Who did it.
    pub actor: String,

    /// When it happened.
    pub timestamp: Timestamp,

    /// Normalised JSON payload.
    pub payload: Value,

    /// 1-based, per aggregate.
    pub version: u64,

    /// Hash of the preceding event in global order, or [`GENESIS`].
    pub previous_hash: String,

    /// Digest over the predecessor hash and this event's fields.
    pub event_hash: String,
}

impl Event {
    /// Flatten into the export wire form.
    pub fn to_record(&self) -> ExportRecord {
        ExportRecord {
            id: self.id.0.clone(),
            aggregate_id: self.aggregate_id.clone(),
            event_type: self.event_type.clone(),
            actor: self.actor.clone(),
            timestamp: format_timestamp(&self.timestamp),
            payload: self.payload.clone(),
            version: self.version,
            previous_hash: self.previous_hash.clone(),
            event_hash: self.event_hash.clone(),
        }
    }

    /// Rebuild an event from an export record without checking its hashes.
    pub fn from_record(record: &ExportRecord) -> Result<Self> {
        if record.version == 0 {
            return Err(LedgerError::InvalidArgument(format!(
                "event {} has version 0",
                record.id
            )));
        }
        Ok(Self {
            id: EventId(record.id.clone()),
            aggregate_id: record.aggregate_id.clone(),
            event_type: record.event_type.clone(),
            actor: record.actor.clone(),
            timestamp: parse_timestamp(&record.timestamp)?,
            payload: record.payload.clone(),
            version: record.version,
            previous_hash: record.previous_hash.clone(),
            event_hash: record.event_hash.clone(),
        })
    }
}

/// Flat, serializable form of an event used by `export`/`load_export`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub actor: String,
    /// ISO-8601 with offset.
    pub timestamp: String,
    pub payload: Value,
    pub version: u64,
    pub previous_hash: String,
    pub event_hash: String,
}

/// Input for appending a new event (before id, version and hashes are assigned).
#[derive(Clone, Debug)]
pub struct EventInput {
    pub aggregate_id: String,
    pub event_type: String,
    pub actor: String,
    pub payload: Value,
    /// Defaults to the store clock's "now".
    pub timestamp: Option<Timestamp>,
}

impl EventInput {
    /// Create an input with an empty object payload.
    pub fn new(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            actor: actor.into(),
            payload: Value::Object(Default::default()),
            timestamp: None,
        }
    }

    /// Create an input from a typed payload.
    ///
    /// A value with no JSON form (a map with non-string keys, a failing
    /// `Serialize` impl) is recorded as its `Debug` text.
    pub fn json<T>(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        actor: impl Into<String>,
        payload: &T,
    ) -> Self
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "payload has no JSON form; recording it as text");
            Value::String(format!("{:?}", payload))
        });
        Self::new(aggregate_id, event_type, actor).with_payload(payload)
    }

    /// Set the payload. `null` is recorded as an empty object.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        self
    }

    /// Set an explicit timestamp.
    pub fn at(mut self, timestamp: impl Into<Timestamp>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Set an explicit timestamp from a naive instant, taken as UTC.
    pub fn at_naive(self, naive: NaiveDateTime) -> Self {
        self.at(from_naive_utc(naive))
    }
}

/// Ledger statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreStats {
    pub event_count: usize,
    pub aggregate_count: usize,
    pub head_hash: String,
    pub first_timestamp: Option<Timestamp>,
    pub last_timestamp: Option<Timestamp>,
}
