//! The event store: an append-only, hash-chained sequence of audit events.

use crate::chain::{canonical_json, verify_chain, DigestInput};
use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, Result};
use crate::replay::{self, PlaybackStep};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager};
use crate::types::{
    to_stored_precision, Event, EventId, EventInput, ExportRecord, StoreStats, Timestamp, GENESIS,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Store configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Reject appends whose canonical payload is larger than this.
    pub max_payload_bytes: Option<usize>,

    /// Payloads up to this size are embedded in subscription notifications.
    pub payload_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: None,
            payload_threshold: 4096,
        }
    }
}

/// Everything guarded by the chain lock.
#[derive(Default)]
struct ChainState {
    events: Vec<Event>,
    /// Highest version seen per aggregate.
    versions: HashMap<String, u64>,
}

impl ChainState {
    /// Build a state from export records, taking them as ground truth, then verify it.
    fn from_records(records: &[ExportRecord]) -> Result<Self> {
        let mut events = Vec::with_capacity(records.len());
        let mut versions: HashMap<String, u64> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id.as_str()) {
                return Err(LedgerError::InvalidArgument(format!(
                    "duplicate event id {}",
                    record.id
                )));
            }
            let event = Event::from_record(record)?;
            let version = versions.entry(event.aggregate_id.clone()).or_insert(0);
            *version = (*version).max(event.version);
            events.push(event);
        }

        verify_chain(&events)?;
        Ok(Self { events, versions })
    }

    fn head_hash(&self) -> &str {
        self.events
            .last()
            .map(|e| e.event_hash.as_str())
            .unwrap_or(GENESIS)
    }

    fn aggregate_events<'a>(&'a self, aggregate_id: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events
            .iter()
            .filter(move |e| e.aggregate_id == aggregate_id)
    }
}

/// Append-only event store that chains hashes to detect tampering.
///
/// All events across all aggregates form one chain, so appends are
/// serialized through a single write lock. Reads take a shared lock and
/// work on cloned events, so reducers may call back into the store.
pub struct EventStore {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    chain: RwLock<ChainState>,
    subscriptions: SubscriptionManager,
}

impl EventStore {
    /// Empty store with default configuration and the wall clock.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let subscriptions = SubscriptionManager::with_payload_threshold(config.payload_threshold);
        Self {
            config,
            clock,
            chain: RwLock::new(ChainState::default()),
            subscriptions,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The clock used for default timestamps.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    // --- Writes ---

    /// Record an event and return it.
    pub fn append(&self, input: EventInput) -> Result<Event> {
        self.validate(&input)?;

        let timestamp = to_stored_precision(
            input
                .timestamp
                .unwrap_or_else(|| self.clock.now().into()),
        );

        let mut chain = self.chain.write();

        let version = chain.versions.get(&input.aggregate_id).copied().unwrap_or(0) + 1;
        let previous_hash = chain.head_hash().to_string();

        let mut event = Event {
            id: EventId::generate(),
            aggregate_id: input.aggregate_id,
            event_type: input.event_type,
            actor: input.actor,
            timestamp,
            payload: input.payload,
            version,
            previous_hash,
            event_hash: String::new(),
        };
        event.event_hash = DigestInput::linked(&event, &event.previous_hash).event_hash()?;

        tracing::trace!(
            aggregate_id = %event.aggregate_id,
            version,
            hash = &event.event_hash[..12],
            "appended event"
        );

        chain.versions.insert(event.aggregate_id.clone(), version);
        chain.events.push(event.clone());
        self.subscriptions.broadcast_appended(&event);

        Ok(event)
    }

    fn validate(&self, input: &EventInput) -> Result<()> {
        if let Some(max) = self.config.max_payload_bytes {
            let size = canonical_json(&input.payload)?.len();
            if size > max {
                return Err(LedgerError::InvalidArgument(format!(
                    "payload is {} bytes, limit is {}",
                    size, max
                )));
            }
        }
        Ok(())
    }

    /// Replace all state with `records`.
    ///
    /// The new chain is built and verified off to the side; on any error the
    /// current chain is left untouched.
    pub fn load_export(&self, records: &[ExportRecord]) -> Result<()> {
        let state = ChainState::from_records(records)?;
        let mut chain = self.chain.write();
        self.swap_in(&mut chain, state);
        Ok(())
    }

    /// Run `plan` against the current events under the write lock and, if it
    /// returns replacement records, swap them in exactly as `load_export` would.
    ///
    /// No append can land between the plan's view and the swap. `plan` must
    /// not call back into this store. Returns whether the chain was replaced.
    pub fn rewrite<F>(&self, plan: F) -> Result<bool>
    where
        F: FnOnce(&[Event]) -> Result<Option<Vec<ExportRecord>>>,
    {
        let mut chain = self.chain.write();
        let records = match plan(&chain.events)? {
            Some(records) => records,
            None => return Ok(false),
        };
        let state = ChainState::from_records(&records)?;
        self.swap_in(&mut chain, state);
        Ok(true)
    }

    fn swap_in(&self, chain: &mut ChainState, state: ChainState) {
        let replaced = chain.events.len();
        *chain = state;
        tracing::info!(
            replaced,
            loaded = chain.events.len(),
            aggregates = chain.versions.len(),
            "event chain replaced"
        );
        self.subscriptions
            .broadcast_chain_replaced(chain.events.len(), chain.head_hash());
    }

    // --- Reads ---

    /// All events, or only those of `aggregate_id`, in append order.
    pub fn events(&self, aggregate_id: Option<&str>) -> Vec<Event> {
        let chain = self.chain.read();
        match aggregate_id {
            Some(id) => chain.aggregate_events(id).cloned().collect(),
            None => chain.events.clone(),
        }
    }

    /// Walk the whole chain from genesis and recheck every link and digest.
    pub fn verify(&self) -> Result<()> {
        let chain = self.chain.read();
        verify_chain(&chain.events)?;
        tracing::debug!(events = chain.events.len(), "event chain verified");
        Ok(())
    }

    /// Fold `reducer` over the aggregate's events in append order.
    pub fn replay<S, F>(&self, aggregate_id: &str, initial_state: S, reducer: F) -> S
    where
        F: FnMut(S, &Event) -> S,
    {
        let events = self.events(Some(aggregate_id));
        replay::fold_events(&events, initial_state, reducer)
    }

    /// Like [`replay`](Self::replay), but only events with `timestamp <= as_of`.
    pub fn state_at<S, F>(
        &self,
        aggregate_id: &str,
        initial_state: S,
        as_of: impl Into<Timestamp>,
        reducer: F,
    ) -> S
    where
        F: FnMut(S, &Event) -> S,
    {
        let as_of = as_of.into();
        let events = self.events(Some(aggregate_id));
        replay::fold_events_until(&events, initial_state, &as_of, reducer)
    }

    /// The aggregate's events ordered by time, with delays divided by `speed`.
    pub fn playback_schedule(&self, aggregate_id: &str, speed: f64) -> Result<Vec<PlaybackStep>> {
        replay::playback_schedule(self.events(Some(aggregate_id)), speed)
    }

    /// Every event as a flat record, in append order.
    pub fn export(&self) -> Vec<ExportRecord> {
        self.chain.read().events.iter().map(Event::to_record).collect()
    }

    pub fn len(&self) -> usize {
        self.chain.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().events.is_empty()
    }

    /// Hash of the last event, or `"genesis"` when empty.
    pub fn head_hash(&self) -> String {
        self.chain.read().head_hash().to_string()
    }

    /// Latest version of an aggregate (0 if it has no events).
    pub fn current_version(&self, aggregate_id: &str) -> u64 {
        self.chain
            .read()
            .versions
            .get(aggregate_id)
            .copied()
            .unwrap_or(0)
    }

    /// Aggregate ids in order of first appearance.
    pub fn aggregate_ids(&self) -> Vec<String> {
        let chain = self.chain.read();
        let mut seen = HashSet::new();
        chain
            .events
            .iter()
            .filter(|e| seen.insert(e.aggregate_id.as_str()))
            .map(|e| e.aggregate_id.clone())
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let chain = self.chain.read();
        StoreStats {
            event_count: chain.events.len(),
            aggregate_count: chain.versions.len(),
            head_hash: chain.head_hash().to_string(),
            first_timestamp: chain.events.iter().map(|e| e.timestamp).min(),
            last_timestamp: chain.events.iter().map(|e| e.timestamp).max(),
        }
    }

    // --- Subscriptions ---

    /// Follow ledger changes.
    ///
    /// With `catch_up`, matching existing events are delivered first. This
    /// happens under the chain lock, so no append is missed or duplicated.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let chain = self.chain.read();
        let handle = self.subscriptions.subscribe(&config);

        if config.catch_up {
            for event in &chain.events {
                if !self.subscriptions.catch_up_event(handle.id, event) {
                    return handle;
                }
            }
        }
        self.subscriptions.mark_caught_up(handle.id);
        handle
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ChainField;
    use crate::subscriptions::{Notification, SubscriptionFilter};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn clocked_store() -> (EventStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let store = EventStore::with_clock(StoreConfig::default(), clock.clone());
        (store, clock)
    }

    fn status(aggregate: &str, status: &str) -> EventInput {
        EventInput::new(aggregate, "task.status_changed", "ops")
            .with_payload(json!({ "status": status }))
    }

    #[test]
    fn test_append_assigns_chain_fields() {
        let (store, _clock) = clocked_store();

        let first = store.append(status("task:1", "open")).unwrap();
        let second = store.append(status("task:1", "closed")).unwrap();

        assert_eq!(first.previous_hash, GENESIS);
        assert_eq!(second.previous_hash, first.event_hash);
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_ne!(first.id, second.id);
        assert_eq!(first.timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        store.verify().unwrap();
    }

    #[test]
    fn test_versions_are_per_aggregate() {
        let (store, _clock) = clocked_store();

        store.append(status("task:1", "open")).unwrap();
        store.append(status("task:2", "open")).unwrap();
        let third = store.append(status("task:1", "closed")).unwrap();

        assert_eq!(third.version, 2);
        assert_eq!(store.current_version("task:2"), 1);
        assert_eq!(store.current_version("task:3"), 0);
    }

    #[test]
    fn test_events_filter_preserves_order() {
        let (store, _clock) = clocked_store();

        store.append(status("task:1", "a")).unwrap();
        store.append(status("task:2", "b")).unwrap();
        store.append(status("task:1", "c")).unwrap();

        let filtered = store.events(Some("task:1"));
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].payload["status"], "a");
        assert_eq!(filtered[1].payload["status"], "c");
        assert_eq!(store.events(None).len(), 3);
        assert!(store.events(Some("task:9")).is_empty());
    }

    #[test]
    fn test_append_accepts_empty_fields() {
        let store = EventStore::new();
        let event = store.append(EventInput::new("task:1", "task.assigned", "")).unwrap();
        assert_eq!(event.actor, "");
        store.append(EventInput::new("", "", "ops")).unwrap();
        assert_eq!(store.current_version(""), 1);

        let restored = EventStore::new();
        restored.load_export(&store.export()).unwrap();
        assert_eq!(restored.events(None), store.events(None));
    }

    #[test]
    fn test_append_rejects_oversize_payload() {
        let store = EventStore::with_config(StoreConfig {
            max_payload_bytes: Some(16),
            ..Default::default()
        });
        assert_eq!(store.config().max_payload_bytes, Some(16));

        let input = EventInput::new("task:1", "task.note", "ops")
            .with_payload(json!({"note": "this is far too long"}));
        assert!(matches!(
            store.append(input),
            Err(LedgerError::InvalidArgument(_))
        ));

        // `{"note": "ok"}` is 14 bytes in canonical form.
        let small = EventInput::new("task:1", "task.note", "ops").with_payload(json!({"note": "ok"}));
        store.append(small).unwrap();
    }

    #[test]
    fn test_appended_timestamps_truncated_to_micros() {
        let store = EventStore::new();
        let ts = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .unwrap()
            + Duration::nanoseconds(1_234_567);
        let event = store.append(status("task:1", "open").at(ts)).unwrap();
        assert_eq!(event.to_record().timestamp, "2024-03-01T12:00:00.001234+00:00");
        store.verify().unwrap();
    }

    #[test]
    fn test_replay_and_state_at() {
        let (store, clock) = clocked_store();

        store.append(status("task:1", "open")).unwrap();
        clock.advance(Duration::minutes(5));
        let checkpoint = clock.now();
        store.append(status("task:1", "in_progress")).unwrap();
        clock.advance(Duration::minutes(5));
        store.append(status("task:1", "closed")).unwrap();

        let latest = |_: Option<String>, e: &Event| e.payload["status"].as_str().map(String::from);

        assert_eq!(store.replay("task:1", None, latest), Some("closed".to_string()));
        assert_eq!(
            store.state_at("task:1", None, checkpoint, latest),
            Some("in_progress".to_string())
        );
        assert_eq!(
            store.state_at("task:1", None, checkpoint - Duration::minutes(10), latest),
            None
        );
    }

    #[test]
    fn test_replay_unknown_aggregate_returns_initial() {
        let store = EventStore::new();
        let count = store.replay("task:404", 7, |n, _| n + 1);
        assert_eq!(count, 7);
    }

    #[test]
    fn test_reducer_may_read_store() {
        let (store, _clock) = clocked_store();
        store.append(status("task:1", "open")).unwrap();

        let total = store.replay("task:1", 0, |n, _| n + store.len());
        assert_eq!(total, 1);
    }

    #[test]
    fn test_export_load_roundtrip() {
        let (store, clock) = clocked_store();
        store.append(status("task:1", "open")).unwrap();
        clock.advance(Duration::seconds(1));
        store.append(status("operator:alice", "login")).unwrap();

        let restored = EventStore::new();
        restored.load_export(&store.export()).unwrap();

        assert_eq!(restored.events(None), store.events(None));
        assert_eq!(restored.head_hash(), store.head_hash());

        // Version counters continue from the loaded chain.
        let next = restored.append(status("task:1", "closed")).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.previous_hash, store.head_hash());
    }

    #[test]
    fn test_failed_load_leaves_store_untouched() {
        let (store, _clock) = clocked_store();
        store.append(status("task:1", "open")).unwrap();
        let before = store.events(None);

        let mut tampered = store.export();
        tampered[0].actor = "mallory".into();

        let err = store.load_export(&tampered).unwrap_err();
        match err {
            LedgerError::TamperDetected { field, .. } => assert_eq!(field, ChainField::EventHash),
            other => panic!("Expected tamper error, got {:?}", other),
        }
        assert_eq!(store.events(None), before);
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let (store, _clock) = clocked_store();
        store.append(status("task:1", "open")).unwrap();
        store.append(status("task:1", "closed")).unwrap();

        let mut records = store.export();
        records[1].id = records[0].id.clone();

        let restored = EventStore::new();
        assert!(matches!(
            restored.load_export(&records),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rewrite_plan_declines() {
        let (store, _clock) = clocked_store();
        store.append(status("task:1", "open")).unwrap();

        let replaced = store.rewrite(|events| {
            assert_eq!(events.len(), 1);
            Ok(None)
        });
        assert!(!replaced.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_stats() {
        let (store, clock) = clocked_store();
        let empty = store.stats();
        assert_eq!(empty.event_count, 0);
        assert_eq!(empty.head_hash, GENESIS);
        assert!(empty.first_timestamp.is_none());

        store.append(status("task:1", "open")).unwrap();
        clock.advance(Duration::seconds(30));
        let last = store.append(status("task:2", "open")).unwrap();

        let stats = store.stats();
        assert_eq!(stats.event_count, 2);
        assert_eq!(stats.aggregate_count, 2);
        assert_eq!(stats.head_hash, last.event_hash);
        assert_eq!(stats.last_timestamp, Some(last.timestamp));
        assert_eq!(store.aggregate_ids(), vec!["task:1", "task:2"]);
    }

    #[test]
    fn test_subscribe_with_catch_up() {
        let (store, _clock) = clocked_store();
        store.append(status("task:1", "open")).unwrap();
        store.append(status("operator:alice", "login")).unwrap();

        let handle = store.subscribe(SubscriptionConfig {
            catch_up: true,
            filter: SubscriptionFilter::aggregate_prefixes(vec!["task:".into()]),
            ..Default::default()
        });
        store.append(status("task:1", "closed")).unwrap();

        let received: Vec<Notification> = handle.receiver.try_iter().collect();
        assert_eq!(received.len(), 3);
        assert!(matches!(&received[0], Notification::Appended { event } if event.version == 1));
        assert!(matches!(received[1], Notification::CaughtUp));
        assert!(matches!(&received[2], Notification::Appended { event } if event.version == 2));
    }

    #[test]
    fn test_load_notifies_chain_subscribers() {
        let (source, _clock) = clocked_store();
        source.append(status("task:1", "open")).unwrap();

        let store = EventStore::new();
        let handle = store.subscribe(SubscriptionConfig {
            filter: SubscriptionFilter::chain(),
            ..Default::default()
        });
        store.load_export(&source.export()).unwrap();

        let received: Vec<Notification> = handle.receiver.try_iter().collect();
        assert!(matches!(
            &received[1],
            Notification::ChainReplaced { event_count: 1, head_hash } if *head_hash == source.head_hash()
        ));
    }
}
