//! Motion-state detection and the sensor sampling plan it drives.
//!
//! [`MotionDetector`] classifies raw accelerometer samples, optionally
//! backed by GPS speed, into a [`MotionState`]. GPS speed wins when present
//! because a car at constant speed looks stationary to an accelerometer.
//!
//! ```text
//!   gps > 20 m/s        → driving   (0.95)
//!   gps >  5 m/s        → driving   (0.85)
//!   gps > 1.5 m/s       → walking / running by |a|   (0.75)
//!   gps slow            → from |a|  (0.60)
//!   no gps              → from |a|  (0.50)
//!
//!   |a| < 10.5 stationary · < 12 walking · < 15 running · else driving
//! ```
//!
//! `|a|` is the mean magnitude over the last few samples, in m/s².
//!
//! [`SamplingStrategy`] maps the current state to GPS, Wi-Fi and
//! accelerometer intervals so a still phone samples rarely and a moving one
//! often.

use std::collections::VecDeque;

use crate::clock::{MINUTE_MS, SECOND_MS};
use crate::device::MotionState;

// ─── Detection ──────────────────────────────────────────────────────────────

/// One accelerometer sample in m/s².
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccelSample {
    /// X axis.
    pub x: f64,
    /// Y axis.
    pub y: f64,
    /// Z axis.
    pub z: f64,
    /// Sample time, Unix ms.
    pub timestamp_ms: i64,
}

impl AccelSample {
    /// Euclidean magnitude.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Detector thresholds.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct MotionConfig {
    /// Mean `|a|` below this is stationary. Default 10.5.
    pub stationary_threshold: f64,
    /// Below this is walking. Default 12.0.
    pub walking_threshold: f64,
    /// Below this is running, above it driving. Default 15.0.
    pub running_threshold: f64,
    /// GPS speed (m/s) above which the device is in a vehicle. Default 5.0.
    pub driving_speed: f64,
    /// GPS speed (m/s) of motorway or rail travel. Default 20.0.
    pub high_speed: f64,
    /// GPS speed (m/s) above which the device is on foot and moving. Default 1.5.
    pub moving_speed: f64,
    /// Samples averaged for `|a|`. Default 5.
    pub history: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            stationary_threshold: 10.5,
            walking_threshold: 12.0,
            running_threshold: 15.0,
            driving_speed: 5.0,
            high_speed: 20.0,
            moving_speed: 1.5,
            history: 5,
        }
    }
}

/// Output of one detection step.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionReading {
    /// Classified state.
    pub state: MotionState,
    /// Magnitude of this sample.
    pub magnitude: f64,
    /// GPS speed used, if any.
    pub gps_speed: Option<f64>,
    /// How much the classification can be trusted, in [0, 1].
    pub confidence: f64,
    /// `true` when the state differs from the previous reading.
    pub changed: bool,
}

/// Accelerometer and GPS motion classifier with a short magnitude history.
#[derive(Clone, Debug, Default)]
pub struct MotionDetector {
    config: MotionConfig,
    history: VecDeque<f64>,
    last: MotionState,
}

impl MotionDetector {
    /// Detector with `config`.
    pub fn new(config: MotionConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history.max(1)),
            config,
            last: MotionState::Unknown,
        }
    }

    /// Classify `sample`. A negative or non-finite `gps_speed` counts as absent.
    pub fn detect(&mut self, sample: &AccelSample, gps_speed: Option<f64>) -> MotionReading {
        let magnitude = sample.magnitude();
        if magnitude.is_finite() {
            self.history.push_back(magnitude);
            while self.history.len() > self.config.history.max(1) {
                self.history.pop_front();
            }
        }
        let mean = if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().sum::<f64>() / self.history.len() as f64
        };

        let gps_speed = gps_speed.filter(|v| v.is_finite() && *v >= 0.0);
        let c = &self.config;
        let (state, confidence) = match gps_speed {
            Some(v) if v > c.high_speed => (MotionState::Driving, 0.95),
            Some(v) if v > c.driving_speed => (MotionState::Driving, 0.85),
            Some(v) if v > c.moving_speed => {
                let on_foot = if mean > c.walking_threshold {
                    MotionState::Running
                } else {
                    MotionState::Walking
                };
                (on_foot, 0.75)
            }
            Some(_) => (self.from_magnitude(mean), 0.6),
            None => (self.from_magnitude(mean), 0.5),
        };

        let changed = state != self.last;
        self.last = state;
        MotionReading {
            state,
            magnitude,
            gps_speed,
            confidence,
            changed,
        }
    }

    fn from_magnitude(&self, mean: f64) -> MotionState {
        let c = &self.config;
        if mean < c.stationary_threshold {
            MotionState::Stationary
        } else if mean < c.walking_threshold {
            MotionState::Walking
        } else if mean < c.running_threshold {
            MotionState::Running
        } else {
            MotionState::Driving
        }
    }

    /// State of the last reading.
    pub fn last_state(&self) -> MotionState {
        self.last
    }

    /// Forget history and the last state.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last = MotionState::Unknown;
    }
}

// ─── Sampling ───────────────────────────────────────────────────────────────

/// How often each sensor should be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SensorIntervals {
    /// GPS fix interval.
    pub gps_ms: i64,
    /// Wi-Fi scan interval; `None` turns scanning off.
    pub wifi_ms: Option<i64>,
    /// Accelerometer interval.
    pub accel_ms: i64,
}

/// Intervals per motion state.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct SamplingPlan {
    /// At rest.
    pub stationary: SensorIntervals,
    /// On foot.
    pub walking: SensorIntervals,
    /// Running.
    pub running: SensorIntervals,
    /// In a vehicle.
    pub driving: SensorIntervals,
    /// State not known yet.
    pub unknown: SensorIntervals,
}

impl Default for SamplingPlan {
    fn default() -> Self {
        Self {
            stationary: SensorIntervals {
                gps_ms: 5 * MINUTE_MS,
                wifi_ms: Some(5 * MINUTE_MS),
                accel_ms: 5 * SECOND_MS,
            },
            walking: SensorIntervals {
                gps_ms: 30 * SECOND_MS,
                wifi_ms: Some(2 * MINUTE_MS),
                accel_ms: SECOND_MS,
            },
            running: SensorIntervals {
                gps_ms: 15 * SECOND_MS,
                wifi_ms: Some(5 * MINUTE_MS),
                accel_ms: 500,
            },
            driving: SensorIntervals {
                gps_ms: 5 * SECOND_MS,
                wifi_ms: None,
                accel_ms: 2 * SECOND_MS,
            },
            unknown: SensorIntervals {
                gps_ms: MINUTE_MS,
                wifi_ms: Some(2 * MINUTE_MS),
                accel_ms: SECOND_MS,
            },
        }
    }
}

/// Tracks which intervals are in force.
#[derive(Clone, Debug, Default)]
pub struct SamplingStrategy {
    plan: SamplingPlan,
    current: Option<SensorIntervals>,
}

impl SamplingStrategy {
    /// Strategy over `plan`; nothing is in force until the first update.
    pub fn new(plan: SamplingPlan) -> Self {
        Self { plan, current: None }
    }

    /// Intervals the plan prescribes for `state`.
    pub fn intervals_for(&self, state: MotionState) -> SensorIntervals {
        match state {
            MotionState::Stationary => self.plan.stationary,
            MotionState::Walking => self.plan.walking,
            MotionState::Running => self.plan.running,
            MotionState::Driving => self.plan.driving,
            MotionState::Unknown => self.plan.unknown,
        }
    }

    /// Switch to the intervals for `state`. Returns them if they differ
    /// from what was in force.
    pub fn update(&mut self, state: MotionState) -> Option<SensorIntervals> {
        let next = self.intervals_for(state);
        if self.current == Some(next) {
            return None;
        }
        self.current = Some(next);
        Some(next)
    }

    /// Intervals in force.
    pub fn current(&self) -> Option<SensorIntervals> {
        self.current
    }

    /// The plan.
    pub fn plan(&self) -> &SamplingPlan {
        &self.plan
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
