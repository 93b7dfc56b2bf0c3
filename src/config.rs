//! Engine configuration.
//!
//! Every tunable lives in [`EngineConfig`] and defaults to the documented
//! constant of its component. With the `serde` feature a partial JSON
//! document can be layered over the defaults:
//!
//! ```rust
//! # #[cfg(feature = "serde")] {
//! use context_core::config::EngineConfig;
//!
//! let cfg = EngineConfig::from_json(r#"{
//!     "minConfidence": 0.2,
//!     "bandit": { "strategy": "lin_ucb", "alpha": 0.5 },
//!     "rateLimits": { "globalMaxPerHour": 4 }
//! }"#).unwrap();
//! assert_eq!(cfg.min_confidence, 0.2);
//! assert_eq!(cfg.rate_limits.global_max_per_hour, 4);
//! assert_eq!(cfg.rate_limits.category_max, 3);
//! # }
//! ```

use crate::bandit::BanditConfig;
use crate::events::DEFAULT_MAX_AGE_MS;
use crate::guard::GuardConfig;
use crate::motion::{MotionConfig, SamplingPlan};
use crate::rate_limit::{MergeConfig, RateLimits};
use crate::tray::TrayConfig;
use crate::tree::DEFAULT_MAX_KEYS;

/// Aggregate configuration of a [`RuleEngine`](crate::engine::RuleEngine).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct EngineConfig {
    /// Split-key budget of the decision tree. Default 5.
    pub max_tree_keys: usize,
    /// Results at or below this confidence are not reported. Default 0.1.
    pub min_confidence: f64,
    /// Install time (Unix ms) anchoring the cold-start schedule; `None`
    /// means "when the engine was created".
    pub install_time_ms: Option<i64>,
    /// Event buffer age ceiling. Default 24 h.
    pub event_max_age_ms: i64,
    /// Category and global caps.
    pub rate_limits: RateLimits,
    /// Merge-push queue.
    pub merge: MergeConfig,
    /// Learner.
    pub bandit: BanditConfig,
    /// Robustness guard.
    pub guard: GuardConfig,
    /// Sensor tray.
    pub tray: TrayConfig,
    /// Motion classifier thresholds.
    pub motion: MotionConfig,
    /// Sensor intervals per motion state.
    pub sampling: SamplingPlan,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tree_keys: DEFAULT_MAX_KEYS,
            min_confidence: 0.1,
            install_time_ms: None,
            event_max_age_ms: DEFAULT_MAX_AGE_MS,
            rate_limits: RateLimits::default(),
            merge: MergeConfig::default(),
            bandit: BanditConfig::default(),
            guard: GuardConfig::default(),
            tray: TrayConfig::default(),
            motion: MotionConfig::default(),
            sampling: SamplingPlan::default(),
        }
    }
}

#[cfg(feature = "serde")]
impl EngineConfig {
    /// Parse a (possibly partial) JSON document over the defaults.
    pub fn from_json(json: &str) -> Result<Self, crate::error::EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the full configuration.
    pub fn to_json(&self) -> Result<String, crate::error::EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use crate::bandit::{InverseMode, Strategy};

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let cfg = EngineConfig::from_json(
            r#"{"maxTreeKeys": 3, "bandit": {"strategy": "lin_ucb", "inverse": "full", "seed": 5},
                "guard": {"paramRate": 0.1}, "tray": {"utcOffsetMinutes": 60}}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_tree_keys, 3);
        assert_eq!(cfg.bandit.strategy, Strategy::LinUcb);
        assert_eq!(cfg.bandit.inverse, InverseMode::Full);
        assert_eq!(cfg.bandit.seed, Some(5));
        assert_eq!(cfg.bandit.epsilon, 0.1);
        assert_eq!(cfg.guard.param_rate, 0.1);
        assert_eq!(cfg.guard.bounds.len(), 4);
        assert_eq!(cfg.tray.utc_offset_minutes, Some(60));
    }

    #[test]
    fn test_motion_and_sampling_overrides() {
        let cfg = EngineConfig::from_json(
            r#"{"motion": {"drivingSpeed": 7.5},
                "sampling": {"driving": {"gpsMs": 10000, "wifiMs": null, "accelMs": 1000}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.motion.driving_speed, 7.5);
        assert_eq!(cfg.motion.walking_threshold, 12.0);
        assert_eq!(cfg.sampling.driving.gps_ms, 10_000);
        assert_eq!(cfg.sampling.walking, SamplingPlan::default().walking);
    }

    #[test]
    fn test_round_trip() {
        let cfg = EngineConfig::default();
        let back = EngineConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(EngineConfig::from_json("{\"minConfidence\": \"high\"}").is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
