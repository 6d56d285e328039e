//! Shared telemetry aggregate
//!
//! One [`TelemetryStore`] is constructed per controller session and shared
//! (via `Arc`) between the listener task, the metric aggregator, and the
//! optimization driver. Each structure inside is guarded by its own lock;
//! nothing blocking ever happens under a lock.

use crate::types::{FieldValue, MarkerEvent, SyncSample, SyncState, TelemetryMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Capacity of the recent-message inspection queue. Overflow silently
/// drops the incoming message rather than blocking the receive loop.
pub const RECENT_QUEUE_CAPACITY: usize = 1000;

/// Latest-per-channel telemetry plus bounded event history buffers.
///
/// The marker and sync buffers grow until explicitly cleared — the
/// optimization driver clears them at the start of each evaluation
/// window, which bounds them in practice.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    latest: Mutex<HashMap<String, TelemetryMessage>>,
    markers: Mutex<Vec<MarkerEvent>>,
    sync_samples: Mutex<Vec<SyncSample>>,
    recent: Mutex<VecDeque<TelemetryMessage>>,
}

/// Recover the guard from a poisoned lock — a panic in another thread
/// must not take the telemetry path down with it.
fn relock<'a, T>(r: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    r.unwrap_or_else(PoisonError::into_inner)
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decoded message: update the latest-per-channel map,
    /// append MARK/SYNC events to their history buffers, and offer the
    /// message to the recent queue.
    pub fn record(&self, msg: TelemetryMessage) {
        if msg.channel == "MARK" && !msg.parsed.is_empty() {
            relock(self.markers.lock()).push(marker_event(&msg));
        }
        if msg.channel == "SYNC" && !msg.parsed.is_empty() {
            relock(self.sync_samples.lock()).push(sync_sample(&msg));
        }

        {
            let mut recent = relock(self.recent.lock());
            if recent.len() < RECENT_QUEUE_CAPACITY {
                recent.push_back(msg.clone());
            }
        }

        relock(self.latest.lock()).insert(msg.channel.clone(), msg);
    }

    /// Most recent message for a channel, if any was ever received.
    pub fn latest(&self, channel: &str) -> Option<TelemetryMessage> {
        relock(self.latest.lock()).get(channel).cloned()
    }

    /// Snapshot of the latest message on every channel, sorted by tag.
    pub fn latest_snapshot(&self) -> Vec<TelemetryMessage> {
        let mut msgs: Vec<TelemetryMessage> = relock(self.latest.lock()).values().cloned().collect();
        msgs.sort_by(|a, b| a.channel.cmp(&b.channel));
        msgs
    }

    /// Clear marker history. Call before starting a marker collection window.
    pub fn clear_marker_events(&self) {
        relock(self.markers.lock()).clear();
    }

    pub fn marker_events(&self) -> Vec<MarkerEvent> {
        relock(self.markers.lock()).clone()
    }

    pub fn marker_count(&self) -> usize {
        relock(self.markers.lock()).len()
    }

    /// Clear sync state history. Call before starting a sync collection window.
    pub fn clear_sync_states(&self) {
        relock(self.sync_samples.lock()).clear();
    }

    pub fn sync_states(&self) -> Vec<SyncSample> {
        relock(self.sync_samples.lock()).clone()
    }

    /// Drain up to `max` messages from the recent queue, oldest first.
    pub fn drain_recent(&self, max: usize) -> Vec<TelemetryMessage> {
        let mut recent = relock(self.recent.lock());
        let n = max.min(recent.len());
        recent.drain(..n).collect()
    }
}

fn parsed_f64(msg: &TelemetryMessage, key: &str) -> f64 {
    msg.parsed.get(key).and_then(FieldValue::as_f64).unwrap_or(0.0)
}

fn marker_event(msg: &TelemetryMessage) -> MarkerEvent {
    MarkerEvent {
        observed_at: msg.received_at,
        duration_ms: parsed_f64(msg, "duration_ms"),
        peak_energy: parsed_f64(msg, "peak_energy"),
        since_last_sec: parsed_f64(msg, "since_last_sec"),
        confidence: msg
            .parsed
            .get("confidence")
            .and_then(FieldValue::as_str)
            .unwrap_or("UNKNOWN")
            .to_string(),
    }
}

fn sync_sample(msg: &TelemetryMessage) -> SyncSample {
    SyncSample {
        observed_at: msg.received_at,
        state: msg
            .parsed
            .get("state")
            .and_then(FieldValue::as_str)
            .map_or(SyncState::Unknown, SyncState::from_label),
        confidence: parsed_f64(msg, "confidence"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::parser::parse_datagram;

    fn msg(text: &str, at: f64) -> TelemetryMessage {
        parse_datagram(text, at).unwrap()
    }

    #[test]
    fn latest_is_overwritten_per_channel() {
        let store = TelemetryStore::new();
        store.record(msg("CHAN,-40.0,15.0,-55.0", 1.0));
        store.record(msg("CHAN,-41.0,16.0,-57.0", 2.0));

        let latest = store.latest("CHAN").unwrap();
        assert_eq!(latest.received_at, 2.0);
        assert_eq!(latest.parsed["snr_db"].as_f64(), Some(16.0));
        assert!(store.latest("CORR").is_none());
    }

    #[test]
    fn mark_messages_accumulate_until_cleared() {
        let store = TelemetryStore::new();
        store.record(msg("MARK,12:00,1,1,10.0,800.0,60.0,HIGH,0,0", 10.0));
        store.record(msg("MARK,12:01,2,2,11.0,790.0,60.0,HIGH,0,0", 70.0));
        assert_eq!(store.marker_count(), 2);

        let events = store.marker_events();
        assert_eq!(events[0].duration_ms, 800.0);
        assert_eq!(events[1].observed_at, 70.0);

        store.clear_marker_events();
        assert_eq!(store.marker_count(), 0);
    }

    #[test]
    fn malformed_mark_updates_latest_but_not_history() {
        let store = TelemetryStore::new();
        store.record(msg("MARK,12:00,1,1", 10.0));
        assert_eq!(store.marker_count(), 0);
        assert!(store.latest("MARK").is_some());
    }

    #[test]
    fn sync_samples_track_state_and_confidence() {
        let store = TelemetryStore::new();
        store.record(msg("SYNC,SEARCHING,0.1", 0.0));
        store.record(msg("SYNC,LOCKED,0.8,tick_chain", 10.0));

        let states = store.sync_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].state, SyncState::Searching);
        assert_eq!(states[1].state, SyncState::Locked);
        assert_eq!(states[1].confidence, 0.8);

        store.clear_sync_states();
        assert!(store.sync_states().is_empty());
    }

    #[test]
    fn recent_queue_drops_newest_on_overflow() {
        let store = TelemetryStore::new();
        for i in 0..RECENT_QUEUE_CAPACITY + 10 {
            store.record(msg(&format!("CHAN,{}.0,1.0,1.0", i), i as f64));
        }

        let drained = store.drain_recent(usize::MAX);
        assert_eq!(drained.len(), RECENT_QUEUE_CAPACITY);
        // Oldest retained, overflow discarded.
        assert_eq!(drained[0].received_at, 0.0);
        assert_eq!(
            drained.last().unwrap().received_at,
            (RECENT_QUEUE_CAPACITY - 1) as f64
        );
    }

    #[test]
    fn drain_recent_is_incremental() {
        let store = TelemetryStore::new();
        store.record(msg("CHAN,1.0,1.0,1.0", 1.0));
        store.record(msg("CHAN,2.0,1.0,1.0", 2.0));
        assert_eq!(store.drain_recent(1).len(), 1);
        assert_eq!(store.drain_recent(10).len(), 1);
        assert!(store.drain_recent(10).is_empty());
    }
}
