//! Sensor data tray: a TTL-decayed key → value cache that feeds context
//! snapshots.
//!
//! A reading is *fresh* while `age < ttl`. Between `ttl` and `2·ttl` it is
//! stale and its quality decays linearly to zero:
//!
//! ```text
//! quality_eff = quality × (1 − (age − ttl) / ttl)
//! ```
//!
//! A missing key reads as `(None, 0.5, stale)`, the same "unknown, not
//! wrong" convention the soft matcher uses. Time-derived fields (`hour`,
//! `minute`, `timeOfDay`, `dayOfWeek`, `isWeekend`) are computed on every
//! snapshot and never expire.

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDateTime, Timelike};
use hashbrown::HashMap;

use crate::clock::{MINUTE_MS, SECOND_MS};
use crate::rule::ContextMap;

/// Quality reported for a key that was never written.
pub const MISSING_QUALITY: f64 = 0.5;

/// TTL for keys without a table entry or override.
pub const FALLBACK_TTL_MS: i64 = 2 * MINUTE_MS;

/// Keys computed from the clock on each snapshot.
pub const TIME_KEYS: [&str; 5] = ["hour", "minute", "timeOfDay", "dayOfWeek", "isWeekend"];

/// Default TTL for `key`; `None` means never expires.
pub fn default_ttl(key: &str) -> Option<i64> {
    let ttl = match key {
        k if TIME_KEYS.contains(&k) => return None,
        "batteryLevel" | "isCharging" => 5 * MINUTE_MS,
        "networkType" | "wifiSsid" => 2 * MINUTE_MS,
        "motionState" | "stepCount" => 30 * SECOND_MS,
        "latitude" | "longitude" => 2 * MINUTE_MS,
        "geofence" => 5 * MINUTE_MS,
        "cellId" => 10 * MINUTE_MS,
        "heartRate" => MINUTE_MS,
        "ambientLight" | "noiseLevel" => 30 * SECOND_MS,
        _ => FALLBACK_TTL_MS,
    };
    Some(ttl)
}

/// Tray settings.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct TrayConfig {
    /// Per-key TTL overrides (ms).
    pub ttl_overrides: HashMap<String, i64>,
    /// Fixed UTC offset for time fields; `None` uses the host's local zone.
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Clone, Debug, PartialEq)]
struct TraySlot {
    value: String,
    written_ms: i64,
    ttl_ms: Option<i64>,
    quality: f64,
    source: String,
}

impl TraySlot {
    fn read(&self, now_ms: i64) -> (f64, bool, i64) {
        let age = (now_ms - self.written_ms).max(0);
        match self.ttl_ms {
            None => (self.quality, true, age),
            Some(ttl) if age < ttl => (self.quality, true, age),
            Some(ttl) => {
                let decay = if ttl > 0 {
                    (1.0 - (age - ttl) as f64 / ttl as f64).max(0.0)
                } else {
                    0.0
                };
                (self.quality * decay, false, age)
            }
        }
    }
}

/// Result of [`SensorTray::get`].
#[derive(Clone, Debug, PartialEq)]
pub struct TrayReading {
    /// Stored value, `None` if never written.
    pub value: Option<String>,
    /// Effective quality in [0, 1].
    pub quality: f64,
    /// `age < ttl`.
    pub fresh: bool,
    /// Milliseconds since the write (0 when missing).
    pub age_ms: i64,
}

/// One debug row of [`SensorTray::status`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SlotStatus {
    /// Key.
    pub key: String,
    /// Stored value.
    pub value: String,
    /// Age at the time of the call.
    pub age_ms: i64,
    /// TTL, `None` if it never expires.
    pub ttl_ms: Option<i64>,
    /// `age < ttl`.
    pub fresh: bool,
    /// Quality after decay.
    pub effective_quality: f64,
    /// Who wrote it.
    pub source: String,
}

/// The tray.
#[derive(Clone, Debug, Default)]
pub struct SensorTray {
    slots: HashMap<String, TraySlot>,
    config: TrayConfig,
}

impl SensorTray {
    /// Empty tray.
    pub fn new(config: TrayConfig) -> Self {
        Self {
            slots: HashMap::new(),
            config,
        }
    }

    fn ttl_for(&self, key: &str) -> Option<i64> {
        match self.config.ttl_overrides.get(key) {
            Some(&ttl) => Some(ttl),
            None => default_ttl(key),
        }
    }

    /// Store `value` (last writer wins). `quality` is clamped to [0, 1];
    /// `source` defaults to the key.
    pub fn put(
        &mut self,
        key: &str,
        value: impl Into<String>,
        quality: f64,
        source: Option<&str>,
        now_ms: i64,
    ) {
        let quality = if quality.is_nan() {
            0.0
        } else {
            quality.clamp(0.0, 1.0)
        };
        let slot = TraySlot {
            value: value.into(),
            written_ms: now_ms,
            ttl_ms: self.ttl_for(key),
            quality,
            source: source.unwrap_or(key).to_string(),
        };
        self.slots.insert(key.to_string(), slot);
    }

    /// Read with decay applied.
    pub fn get(&self, key: &str, now_ms: i64) -> TrayReading {
        match self.slots.get(key) {
            Some(slot) => {
                let (quality, fresh, age_ms) = slot.read(now_ms);
                TrayReading {
                    value: Some(slot.value.clone()),
                    quality,
                    fresh,
                    age_ms,
                }
            }
            None => TrayReading {
                value: None,
                quality: MISSING_QUALITY,
                fresh: false,
                age_ms: 0,
            },
        }
    }

    /// Flat context of every stored key plus freshly computed time fields.
    pub fn snapshot(&self, now_ms: i64) -> ContextMap {
        let mut ctx: ContextMap = self
            .slots
            .iter()
            .map(|(k, s)| (k.clone(), s.value.clone()))
            .collect();
        if let Some(local) = self.local_time(now_ms) {
            insert_time_fields(&mut ctx, &local);
        }
        ctx
    }

    /// Override the TTL of `key`, also retargeting an existing slot.
    pub fn set_ttl(&mut self, key: &str, ttl_ms: i64) {
        self.config.ttl_overrides.insert(key.to_string(), ttl_ms);
        if let Some(slot) = self.slots.get_mut(key) {
            slot.ttl_ms = Some(ttl_ms);
        }
    }

    /// Debug rows, sorted by key.
    pub fn status(&self, now_ms: i64) -> Vec<SlotStatus> {
        let mut rows: Vec<SlotStatus> = self
            .slots
            .iter()
            .map(|(key, slot)| {
                let (effective_quality, fresh, age_ms) = slot.read(now_ms);
                SlotStatus {
                    key: key.clone(),
                    value: slot.value.clone(),
                    age_ms,
                    ttl_ms: slot.ttl_ms,
                    fresh,
                    effective_quality,
                    source: slot.source.clone(),
                }
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    /// Drop every slot. TTL overrides are kept.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Stored slot count.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Local hour of day at `now_ms`, in the tray's time zone.
    pub fn local_hour(&self, now_ms: i64) -> Option<u32> {
        self.local_time(now_ms).map(|t| t.hour())
    }

    fn local_time(&self, now_ms: i64) -> Option<NaiveDateTime> {
        let utc = DateTime::from_timestamp_millis(now_ms)?;
        match self.config.utc_offset_minutes {
            Some(minutes) => {
                let offset = FixedOffset::east_opt(minutes.saturating_mul(60))?;
                Some(utc.with_timezone(&offset).naive_local())
            }
            None => Some(utc.with_timezone(&Local).naive_local()),
        }
    }
}

/// `morning` [5, 12), `afternoon` [12, 17), `evening` [17, 21), else `night`.
pub fn time_of_day(hour: u32) -> &'static str {
    match hour {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    }
}

fn insert_time_fields(ctx: &mut ContextMap, t: &NaiveDateTime) {
    let day = t.weekday().num_days_from_sunday();
    ctx.insert("hour".into(), t.hour().to_string());
    ctx.insert("minute".into(), t.minute().to_string());
    ctx.insert("timeOfDay".into(), time_of_day(t.hour()).to_string());
    ctx.insert("dayOfWeek".into(), day.to_string());
    ctx.insert("isWeekend".into(), (day == 0 || day == 6).to_string());
}

// ─── Tests ──────────────────────────────────────────────────────────────────
