//! Reducer replay and playback scheduling over event slices.

use crate::error::{LedgerError, Result};
use crate::types::{Event, Timestamp};
use chrono::Duration;

/// One step of a playback: the event and how long to wait before showing it.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackStep {
    pub event: Event,
    /// Seconds since the previous step, scaled by the playback speed.
    pub delay_secs: f64,
}

/// Fold `reducer` over `events` in order.
pub fn fold_events<'a, S, F, I>(events: I, initial_state: S, mut reducer: F) -> S
where
    I: IntoIterator<Item = &'a Event>,
    F: FnMut(S, &Event) -> S,
{
    events
        .into_iter()
        .fold(initial_state, |state, event| reducer(state, event))
}

/// Fold only the events at or before `as_of`.
pub fn fold_events_until<'a, S, F, I>(events: I, initial_state: S, as_of: &Timestamp, reducer: F) -> S
where
    I: IntoIterator<Item = &'a Event>,
    F: FnMut(S, &Event) -> S,
{
    fold_events(
        events.into_iter().filter(|event| event.timestamp <= *as_of),
        initial_state,
        reducer,
    )
}

/// Order `events` by timestamp and attach inter-event delays divided by `speed`.
///
/// Events sharing a timestamp keep their append order.
pub fn playback_schedule(mut events: Vec<Event>, speed: f64) -> Result<Vec<PlaybackStep>> {
    if speed.is_nan() || speed <= 0.0 {
        return Err(LedgerError::InvalidArgument(format!(
            "playback speed must be positive, got {}",
            speed
        )));
    }

    events.sort_by_key(|event| event.timestamp);

    let mut schedule = Vec::with_capacity(events.len());
    let mut previous: Option<Timestamp> = None;
    for event in events {
        let delay_secs = match previous {
            Some(prev) => seconds(event.timestamp - prev) / speed,
            None => 0.0,
        };
        previous = Some(event.timestamp);
        schedule.push(PlaybackStep { event, delay_secs });
    }
    Ok(schedule)
}

/// Duration as fractional seconds at microsecond resolution.
fn seconds(delta: Duration) -> f64 {
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => delta.num_seconds() as f64,
    }
}
