//! Tamper detection: any edit to an exported chain must fail verification.

use audit_ledger::{
    format_timestamp, parse_timestamp, ChainField, EventInput, EventStore, ExportRecord,
    LedgerError, ManualClock, StoreConfig, GENESIS,
};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

const AGGREGATES: [&str; 4] = ["task:1", "task:2", "operator:alice", "incident:9"];

fn build_store(steps: &[(usize, i64)]) -> EventStore {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
    ));
    let store = EventStore::with_clock(StoreConfig::default(), clock.clone());
    for (agg, value) in steps {
        store
            .append(
                EventInput::new(AGGREGATES[*agg], "x.recorded", "ops")
                    .with_payload(json!({ "value": value, "note": "ok" })),
            )
            .unwrap();
        clock.advance(Duration::seconds(1 + value.rem_euclid(90)));
    }
    store
}

/// Change one field of a record so that it still parses.
fn mutate(record: &mut ExportRecord, field: usize) {
    match field {
        0 => record.aggregate_id.push('x'),
        1 => record.event_type.push('x'),
        2 => record.actor.push('x'),
        3 => {
            let ts = parse_timestamp(&record.timestamp).unwrap() + Duration::seconds(1);
            record.timestamp = format_timestamp(&ts);
        }
        4 => record.payload = json!([record.payload.clone()]),
        5 => record.version += 1,
        6 => record.previous_hash = flip_first_char(&record.previous_hash),
        _ => record.event_hash = flip_first_char(&record.event_hash),
    }
}

fn flip_first_char(s: &str) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    chars[0] = if chars[0] == 'a' { 'b' } else { 'a' };
    chars.into_iter().collect()
}

fn expect_tamper(result: Result<(), LedgerError>) -> (String, ChainField) {
    match result {
        Err(LedgerError::TamperDetected {
            event_id, field, ..
        }) => (event_id.0, field),
        other => panic!("Expected tamper error, got {:?}", other),
    }
}

proptest! {
    #[test]
    fn prop_appends_always_verify(steps in prop::collection::vec((0usize..4, -1000i64..1000), 0..40)) {
        let store = build_store(&steps);
        prop_assert!(store.verify().is_ok());

        let events = store.events(None);
        if let Some(first) = events.first() {
            prop_assert_eq!(first.previous_hash.as_str(), GENESIS);
        }
        for pair in events.windows(2) {
            prop_assert_eq!(&pair[1].previous_hash, &pair[0].event_hash);
        }

        for agg in AGGREGATES {
            let versions: Vec<u64> = store.events(Some(agg)).iter().map(|e| e.version).collect();
            let expected: Vec<u64> = (1..=versions.len() as u64).collect();
            prop_assert_eq!(versions, expected);
        }
    }

    #[test]
    fn prop_any_single_field_edit_is_detected(
        steps in prop::collection::vec((0usize..4, -1000i64..1000), 1..20),
        target in any::<prop::sample::Index>(),
        field in 0usize..8,
    ) {
        let store = build_store(&steps);
        let mut records = store.export();
        let index = target.index(records.len());
        mutate(&mut records[index], field);

        let fresh = EventStore::new();
        let result = fresh.load_export(&records);
        prop_assert!(matches!(result, Err(LedgerError::TamperDetected { .. })), "got {:?}", result);
        prop_assert!(fresh.is_empty());
    }
}

#[test]
fn test_edit_reports_edited_record() {
    let store = build_store(&[(0, 1), (1, 2), (0, 3)]);
    for field in 0..6 {
        let mut records = store.export();
        let id = records[1].id.clone();
        mutate(&mut records[1], field);

        let (event_id, kind) = expect_tamper(EventStore::new().load_export(&records));
        assert_eq!(event_id, id, "field {}", field);
        assert_eq!(kind, ChainField::EventHash);
    }
}

#[test]
fn test_renamed_id_is_not_covered_by_digest() {
    let store = build_store(&[(0, 1), (1, 2), (0, 3)]);
    let mut records = store.export();
    records[1].id = "renamed-0001".into();

    // The id is not a digest input, so a rename loads cleanly.
    let restored = EventStore::new();
    restored.load_export(&records).unwrap();
    restored.verify().unwrap();
    assert_eq!(restored.events(None)[1].id.as_str(), "renamed-0001");
    assert_eq!(restored.head_hash(), store.head_hash());

    // Reusing another record's id is still rejected.
    records[1].id = records[0].id.clone();
    let result = EventStore::new().load_export(&records);
    assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));
}

#[test]
fn test_relinked_record_reports_link() {
    let store = build_store(&[(0, 1), (1, 2), (0, 3)]);
    let mut records = store.export();
    let id = records[2].id.clone();
    records[2].previous_hash = GENESIS.to_string();

    let (event_id, kind) = expect_tamper(EventStore::new().load_export(&records));
    assert_eq!(event_id, id);
    assert_eq!(kind, ChainField::PreviousHash);
}

#[test]
fn test_dropped_record_detected() {
    let store = build_store(&[(0, 1), (1, 2), (0, 3)]);
    let mut records = store.export();
    let removed = records.remove(1);

    let (event_id, kind) = expect_tamper(EventStore::new().load_export(&records));
    assert_ne!(event_id, removed.id);
    assert_eq!(event_id, records[1].id);
    assert_eq!(kind, ChainField::PreviousHash);
}

#[test]
fn test_forged_hash_reports_expected_value() {
    let store = build_store(&[(0, 1), (2, 5)]);
    let mut records = store.export();
    let genuine = records[0].event_hash.clone();
    records[0].event_hash = "f".repeat(64);

    match EventStore::new().load_export(&records) {
        Err(LedgerError::TamperDetected {
            expected, found, ..
        }) => {
            assert_eq!(expected, genuine);
            assert_eq!(found, "f".repeat(64));
        }
        other => panic!("Expected tamper error, got {:?}", other),
    }
}

#[test]
fn test_tamper_error_message_names_event() {
    let store = build_store(&[(0, 1)]);
    let mut records = store.export();
    records[0].actor = "mallory".into();

    let err = EventStore::new().load_export(&records).unwrap_err();
    assert!(err.is_tamper());
    assert!(err.to_string().contains(&records[0].id));
}
