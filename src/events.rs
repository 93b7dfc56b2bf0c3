//! Event sequence buffer for `recent` / `within` conditions.
//!
//! A fixed-capacity ring (`heapless::Deque`, default 100 slots) behind one
//! lock. Every push evicts events older than the age ceiling (24 h by
//! default) and, when full, the oldest slot. Scans run newest-first and do not
//! assume timestamps arrive in order.

use std::sync::{Mutex, MutexGuard};

use heapless::Deque;

use crate::clock::DAY_MS;
use crate::rule::ContextMap;
use crate::soft_match::TemporalSource;

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default hard age ceiling.
pub const DEFAULT_MAX_AGE_MS: i64 = DAY_MS;

/// One pushed event.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextEvent {
    /// Event type, e.g. `geofence_enter`.
    pub event_type: String,
    /// Context at the time of the event.
    pub snapshot: ContextMap,
    /// Event time, Unix ms.
    pub timestamp_ms: i64,
}

/// Bounded, age-limited history of context events.
#[derive(Debug)]
pub struct EventBuffer<const CAP: usize = DEFAULT_CAPACITY> {
    ring: Mutex<Deque<ContextEvent, CAP>>,
    max_age_ms: i64,
}

impl<const CAP: usize> EventBuffer<CAP> {
    /// Empty buffer with the default 24 h ceiling.
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE_MS)
    }

    /// Empty buffer with a custom age ceiling.
    pub fn with_max_age(max_age_ms: i64) -> Self {
        Self {
            ring: Mutex::new(Deque::new()),
            max_age_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Deque<ContextEvent, CAP>> {
        self.ring.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("event buffer lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Append an event.
    ///
    /// Events older than the ceiling (relative to the newest timestamp seen)
    /// are dropped first; if the ring is still full the oldest slot goes.
    pub fn push(&self, event_type: impl Into<String>, snapshot: ContextMap, timestamp_ms: i64) {
        let mut ring = self.lock();
        let newest = ring
            .iter()
            .map(|e| e.timestamp_ms)
            .max()
            .map_or(timestamp_ms, |t| t.max(timestamp_ms));
        let cutoff = newest.saturating_sub(self.max_age_ms);

        if ring.iter().any(|e| e.timestamp_ms < cutoff) {
            let mut kept: Deque<ContextEvent, CAP> = Deque::new();
            while let Some(e) = ring.pop_front() {
                if e.timestamp_ms >= cutoff {
                    // Never overflows: `kept` holds a subset of `ring`.
                    let _ = kept.push_back(e);
                }
            }
            *ring = kept;
        }

        if timestamp_ms < cutoff {
            return;
        }
        if ring.is_full() {
            ring.pop_front();
        }
        let _ = ring.push_back(ContextEvent {
            event_type: event_type.into(),
            snapshot,
            timestamp_ms,
        });
    }

    /// View of the buffer as of `now_ms`, holding the lock until dropped.
    pub fn at(&self, now_ms: i64) -> EventsAt<'_, CAP> {
        EventsAt {
            ring: self.lock(),
            now_ms,
        }
    }

    /// Convenience: [`TemporalSource::has_recent`] at `now_ms`.
    pub fn has_recent(&self, event_type: &str, window_ms: i64, now_ms: i64) -> bool {
        self.at(now_ms).has_recent(event_type, window_ms)
    }

    /// Convenience: [`TemporalSource::has_sequence`] at `now_ms`.
    pub fn has_sequence(&self, a: &str, b: &str, window_ms: i64, now_ms: i64) -> bool {
        self.at(now_ms).has_sequence(a, b, window_ms)
    }

    /// Stored event count.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Most recent event of `event_type`, if any.
    pub fn latest(&self, event_type: &str) -> Option<ContextEvent> {
        self.lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .max_by_key(|e| e.timestamp_ms)
            .cloned()
    }

    /// Drop all events.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<const CAP: usize> Default for EventBuffer<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

/// Locked view of an [`EventBuffer`] at a fixed "now".
pub struct EventsAt<'a, const CAP: usize> {
    ring: MutexGuard<'a, Deque<ContextEvent, CAP>>,
    now_ms: i64,
}

impl<const CAP: usize> EventsAt<'_, CAP> {
    fn in_window(&self, e: &ContextEvent, window_ms: i64) -> bool {
        self.now_ms.saturating_sub(e.timestamp_ms).max(0) < window_ms
    }
}

impl<const CAP: usize> TemporalSource for EventsAt<'_, CAP> {
    fn has_recent(&self, event_type: &str, window_ms: i64) -> bool {
        self.ring
            .iter()
            .rev()
            .any(|e| e.event_type == event_type && self.in_window(e, window_ms))
    }

    fn has_sequence(&self, a: &str, b: &str, window_ms: i64) -> bool {
        let latest_b = self
            .ring
            .iter()
            .rev()
            .filter(|e| e.event_type == b && self.in_window(e, window_ms))
            .map(|e| e.timestamp_ms)
            .max();
        let Some(b_ts) = latest_b else {
            return false;
        };
        self.ring
            .iter()
            .rev()
            .any(|e| e.event_type == a && e.timestamp_ms < b_ts && self.in_window(e, window_ms))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
