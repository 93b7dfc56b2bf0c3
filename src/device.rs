//! Phone reference vocabulary.
//!
//! [`DeviceContext`] is the [`ContextVocabulary`] the engine's LinUCB arms
//! learn over: time of day on the unit circle, battery, charging, weekend and
//! a one-hot motion state.
//!
//! | Index | Feature | Source key |
//! |---|---|---|
//! | 0 | `sin(2π·hour/24)` | `hour` |
//! | 1 | `cos(2π·hour/24)` | `hour` |
//! | 2 | battery fraction | `batteryLevel` (0–100) |
//! | 3 | charging flag | `isCharging` |
//! | 4 | weekend flag | `isWeekend` |
//! | 5–9 | motion one-hot | `motionState` |

use core::f64::consts::TAU;

use crate::guard::SanitizedInputs;
use crate::rule::ContextMap;
use crate::vocabulary::{ContextVocabulary, FEATURE_DIM};

/// Coarse motion state reported by the host's activity recogniser.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MotionState {
    /// Device at rest.
    Stationary,
    /// On foot.
    Walking,
    /// Running.
    Running,
    /// In a vehicle.
    Driving,
    /// Not reported or not recognised.
    #[default]
    Unknown,
}

impl MotionState {
    /// Parse the wire name; anything unrecognised is [`MotionState::Unknown`].
    pub fn parse(s: &str) -> Self {
        match s {
            "stationary" => MotionState::Stationary,
            "walking" => MotionState::Walking,
            "running" => MotionState::Running,
            "driving" => MotionState::Driving,
            _ => MotionState::Unknown,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            MotionState::Stationary => "stationary",
            MotionState::Walking => "walking",
            MotionState::Running => "running",
            MotionState::Driving => "driving",
            MotionState::Unknown => "unknown",
        }
    }

    fn bucket(self) -> usize {
        self as usize
    }
}

/// Typed device context.
///
/// ```rust
/// use context_core::device::{DeviceContext, MotionState};
/// use context_core::vocabulary::ContextVocabulary;
///
/// let ctx = DeviceContext {
///     hour: 6.0,
///     battery_level: 80.0,
///     is_charging: false,
///     is_weekend: false,
///     motion: MotionState::Walking,
/// };
/// let x = ctx.to_feature_vec();
/// assert!((x[0] - 1.0).abs() < 1e-9); // sin(π/2)
/// assert_eq!(x[6], 1.0);              // walking bucket
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceContext {
    /// Hour of day, fractional, in [0, 24).
    pub hour: f64,
    /// Battery percentage in [0, 100].
    pub battery_level: f64,
    /// Plugged in.
    pub is_charging: bool,
    /// Saturday or Sunday.
    pub is_weekend: bool,
    /// Motion bucket.
    pub motion: MotionState,
}

impl ContextVocabulary<FEATURE_DIM> for DeviceContext {
    fn from_inputs(inputs: &SanitizedInputs, ctx: &ContextMap) -> Self {
        Self {
            hour: inputs.get("hour").unwrap_or(12.0),
            battery_level: inputs.get("batteryLevel").unwrap_or(50.0),
            is_charging: inputs.get("isCharging").unwrap_or(0.0) >= 0.5,
            is_weekend: inputs.get("isWeekend").unwrap_or(0.0) >= 0.5,
            motion: ctx
                .get("motionState")
                .map_or(MotionState::Unknown, |s| MotionState::parse(s)),
        }
    }

    fn to_feature_vec(&self) -> [f64; FEATURE_DIM] {
        let angle = TAU * self.hour / 24.0;
        let mut x = [0.0; FEATURE_DIM];
        x[0] = angle.sin();
        x[1] = angle.cos();
        x[2] = (self.battery_level / 100.0).clamp(0.0, 1.0);
        x[3] = if self.is_charging { 1.0 } else { 0.0 };
        x[4] = if self.is_weekend { 1.0 } else { 0.0 };
        x[5 + self.motion.bucket()] = 1.0;
        x
    }
}
