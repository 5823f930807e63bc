//! Retention enforcement with legal holds and pre-prune archives.

use crate::chain::DigestInput;
use crate::clock::Clock;
use crate::error::{LedgerError, Result};
use crate::store::EventStore;
use crate::types::{Event, ExportRecord, Timestamp, GENESIS};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// An aggregate exempt from age-based pruning until `until`.
#[derive(Clone, Debug, PartialEq)]
pub struct LegalHold {
    pub aggregate_id: String,
    pub until: Timestamp,
}

/// The full export as it stood right before a pruning rewrite.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveEntry {
    pub archived_at: DateTime<Utc>,
    pub records: Vec<ExportRecord>,
}

/// Outcome of one retention pass.
#[derive(Clone, Debug, PartialEq)]
pub struct RetentionReport {
    pub enforced_at: DateTime<Utc>,
    pub horizon: DateTime<Utc>,
    pub examined: usize,
    pub retained: usize,
    pub dropped: usize,
    /// Whether an archive entry was recorded (only when something was dropped).
    pub archived: bool,
}

/// Prunes old events from an [`EventStore`] while keeping its chain valid.
pub struct RetentionEnforcer {
    store: Arc<EventStore>,
    clock: Arc<dyn Clock>,
    holds: RwLock<HashMap<String, Timestamp>>,
    archives: Mutex<Vec<ArchiveEntry>>,
}

impl RetentionEnforcer {
    /// Enforcer sharing the store's clock.
    pub fn new(store: Arc<EventStore>) -> Self {
        let clock = store.clock();
        Self::with_clock(store, clock)
    }

    pub fn with_clock(store: Arc<EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            holds: RwLock::new(HashMap::new()),
            archives: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    // --- Legal holds ---

    /// Exempt `aggregate_id` from pruning until `until`. Replaces any existing hold.
    pub fn place_legal_hold(
        &self,
        aggregate_id: impl Into<String>,
        until: impl Into<Timestamp>,
    ) -> Result<()> {
        let aggregate_id = aggregate_id.into();
        if aggregate_id.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "legal hold needs an aggregate id".into(),
            ));
        }
        let until = until.into();
        tracing::info!(%aggregate_id, %until, "legal hold placed");
        self.holds.write().insert(aggregate_id, until);
        Ok(())
    }

    /// Remove a hold. Returns whether one existed.
    pub fn release_legal_hold(&self, aggregate_id: &str) -> bool {
        let released = self.holds.write().remove(aggregate_id).is_some();
        if released {
            tracing::info!(%aggregate_id, "legal hold released");
        }
        released
    }

    /// All holds, active or expired, sorted by aggregate id.
    pub fn legal_holds(&self) -> Vec<LegalHold> {
        let mut holds: Vec<LegalHold> = self
            .holds
            .read()
            .iter()
            .map(|(aggregate_id, until)| LegalHold {
                aggregate_id: aggregate_id.clone(),
                until: *until,
            })
            .collect();
        holds.sort_by(|a, b| a.aggregate_id.cmp(&b.aggregate_id));
        holds
    }

    /// True if `aggregate_id` has a hold expiring after now.
    pub fn is_held(&self, aggregate_id: &str) -> bool {
        let now: Timestamp = self.clock.now().into();
        self.holds
            .read()
            .get(aggregate_id)
            .is_some_and(|until| *until > now)
    }

    // --- Enforcement ---

    /// Drop events older than `retention_days` unless their aggregate is under
    /// an active hold, archiving the prior export and re-chaining the survivors.
    ///
    /// The whole pass runs under the store's write lock.
    pub fn enforce(&self, retention_days: u32) -> Result<RetentionReport> {
        let now = self.clock.now();
        let horizon = Duration::try_days(i64::from(retention_days))
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                LedgerError::InvalidArgument(format!(
                    "retention window of {} days is out of range",
                    retention_days
                ))
            })?;

        let now_ts: Timestamp = now.into();
        let horizon_ts: Timestamp = horizon.into();
        let holds = self.holds.read().clone();

        let mut report = RetentionReport {
            enforced_at: now,
            horizon,
            examined: 0,
            retained: 0,
            dropped: 0,
            archived: false,
        };

        self.store.rewrite(|events| {
            let survivors: Vec<&Event> = events
                .iter()
                .filter(|event| {
                    let held = holds
                        .get(&event.aggregate_id)
                        .is_some_and(|until| *until > now_ts);
                    held || event.timestamp >= horizon_ts
                })
                .collect();

            report.examined = events.len();
            report.retained = survivors.len();
            report.dropped = events.len() - survivors.len();
            if report.dropped == 0 {
                return Ok(None);
            }

            self.archives.lock().push(ArchiveEntry {
                archived_at: now,
                records: events.iter().map(Event::to_record).collect(),
            });
            report.archived = true;

            Ok(Some(rechain(survivors)?))
        })?;

        if report.dropped > 0 {
            tracing::info!(
                dropped = report.dropped,
                retained = report.retained,
                %horizon,
                "retention pass pruned events"
            );
        } else {
            tracing::debug!(examined = report.examined, %horizon, "retention pass kept everything");
        }
        Ok(report)
    }

    /// Pre-prune snapshots, oldest first.
    pub fn archive_snapshot(&self) -> Vec<ArchiveEntry> {
        self.archives.lock().clone()
    }
}

/// Re-link `events` into a fresh chain starting at genesis.
///
/// Every business field is carried over unchanged; only `previous_hash` and
/// `event_hash` are recomputed, in the given order.
pub fn rechain<'a, I>(events: I) -> Result<Vec<ExportRecord>>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut previous_hash = GENESIS.to_string();
    let mut records = Vec::new();
    for event in events {
        let event_hash = DigestInput::linked(event, &previous_hash).event_hash()?;
        records.push(ExportRecord {
            previous_hash: std::mem::replace(&mut previous_hash, event_hash.clone()),
            event_hash,
            ..event.to_record()
        });
    }
    Ok(records)
}
