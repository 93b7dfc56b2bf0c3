//! Place signal learning.
//!
//! While the device is inside a known geofence, the Wi-Fi networks and
//! Bluetooth peers it sees are remembered against that place. Later a Wi-Fi
//! SSID alone is enough to recognise the place when GPS is off or indoors.

use std::collections::{BTreeMap, BTreeSet};

/// Hours of day remembered per place; the oldest is dropped first.
pub const MAX_TYPICAL_HOURS: usize = 5;

/// What has been learned about one place.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct PlaceSignals {
    /// Wi-Fi SSIDs seen here.
    pub wifi: BTreeSet<String>,
    /// Bluetooth device names seen here.
    pub bluetooth: BTreeSet<String>,
    /// Distinct local hours of recent visits, oldest first.
    pub typical_hours: Vec<u32>,
    /// Last visit, Unix ms.
    pub last_seen_ms: i64,
    /// Number of visits recorded.
    pub visits: u32,
}

/// Per-place signal store.
#[derive(Clone, Debug, Default)]
pub struct PlaceLearner {
    places: BTreeMap<String, PlaceSignals>,
}

impl PlaceLearner {
    /// Empty learner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit to `place` at local `hour`, with the Wi-Fi network and
    /// Bluetooth peer currently in range. Empty names are ignored. Returns
    /// `true` when a signal not seen here before was learned.
    pub fn learn(&mut self, place: &str, wifi: Option<&str>, bluetooth: Option<&str>, now_ms: i64, hour: u32) -> bool {
        let signals = self.places.entry(place.to_string()).or_default();
        let mut learned = false;
        if let Some(ssid) = wifi.filter(|s| !s.is_empty()) {
            learned |= signals.wifi.insert(ssid.to_string());
        }
        if let Some(peer) = bluetooth.filter(|s| !s.is_empty()) {
            learned |= signals.bluetooth.insert(peer.to_string());
        }
        signals.visits = signals.visits.saturating_add(1);
        signals.last_seen_ms = now_ms;
        if !signals.typical_hours.contains(&hour) {
            signals.typical_hours.push(hour);
            if signals.typical_hours.len() > MAX_TYPICAL_HOURS {
                signals.typical_hours.remove(0);
            }
        }
        learned
    }

    /// `true` when `ssid` has been seen at `place`.
    pub fn matches_wifi(&self, place: &str, ssid: &str) -> bool {
        self.places.get(place).is_some_and(|s| s.wifi.contains(ssid))
    }

    /// Places where `ssid` has been seen, sorted by id.
    pub fn places_for_wifi(&self, ssid: &str) -> Vec<String> {
        self.places
            .iter()
            .filter(|(_, s)| s.wifi.contains(ssid))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Signals learned for `place`.
    pub fn signals(&self, place: &str) -> Option<&PlaceSignals> {
        self.places.get(place)
    }

    /// Every place, sorted by id.
    pub fn all(&self) -> &BTreeMap<String, PlaceSignals> {
        &self.places
    }

    /// Replace every place.
    pub fn replace(&mut self, places: BTreeMap<String, PlaceSignals>) {
        self.places = places;
    }

    /// Forget `place`. Returns `true` if it was known.
    pub fn clear(&mut self, place: &str) -> bool {
        self.places.remove(place).is_some()
    }

    /// Forget everything.
    pub fn clear_all(&mut self) {
        self.places.clear();
    }

    /// Number of places.
    pub fn len(&self) -> usize {
        self.places.len()
    }

    /// `true` when no place is known.
    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
