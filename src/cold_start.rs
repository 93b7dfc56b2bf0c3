//! Cold-start schedule and the rule ↔ learned blender.
//!
//! # Phases
//!
//! ```text
//! days   0 ──── 14 ──── 28 ──────────── 56 ──── 70 ─────▶
//!        Bootstrap RampUp   Transition       Stable
//! rule   1.0      1.0→0.7   0.7→0.3          0.3→0.1  0.1
//! learn  0.0      0.0→0.3   0.3→0.7          0.7→0.9  0.9
//! ```
//!
//! Weights always sum to 1.0 and are continuous at every boundary. The
//! stable phase eases onto its 0.1 rule floor over its first 14 days; the
//! rule weight never drops below that floor.
//!
//! # Blending
//!
//! [`blend`] picks between the rule decision and the learned one:
//!
//! - learned confidence < [`LOW_CONFIDENCE`]: half the learned weight moves
//!   to the rule and the rule decision is returned as
//!   [`DecisionSource::RuleFallback`];
//! - otherwise the larger of `rule_conf × rule_w` and
//!   `learned_conf × learned_w` wins, exact ties going to the rule.

use crate::clock::DAY_MS;

/// Learned confidence below which the blender falls back to the rule.
pub const LOW_CONFIDENCE: f64 = 0.3;

/// Permanent minimum rule weight.
pub const RULE_FLOOR: f64 = 0.1;

const RAMP_UP_START: f64 = 14.0;
const TRANSITION_START: f64 = 28.0;
const STABLE_START: f64 = 56.0;
const FLOOR_REACHED: f64 = 70.0;

/// Linear ramp factor: 0.0 at `elapsed = 0`, 1.0 at `elapsed ≥ span`.
#[inline]
pub fn ramp(elapsed: f64, span: f64) -> f64 {
    if span <= 0.0 {
        return 1.0;
    }
    (elapsed / span).clamp(0.0, 1.0)
}

// ─── Phase ──────────────────────────────────────────────────────────────────

/// Cold-start phase by days since install.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ColdStartPhase {
    /// [0, 14) days: rules only.
    Bootstrap,
    /// [14, 28) days.
    RampUp,
    /// [28, 56) days.
    Transition,
    /// 56 days onward.
    Stable,
}

impl ColdStartPhase {
    /// Phase for a (possibly fractional) day count. Negative counts are day 0.
    pub fn from_days(days: f64) -> Self {
        if days < RAMP_UP_START {
            ColdStartPhase::Bootstrap
        } else if days < TRANSITION_START {
            ColdStartPhase::RampUp
        } else if days < STABLE_START {
            ColdStartPhase::Transition
        } else {
            ColdStartPhase::Stable
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ColdStartPhase::Bootstrap => "bootstrap",
            ColdStartPhase::RampUp => "rampup",
            ColdStartPhase::Transition => "transition",
            ColdStartPhase::Stable => "stable",
        }
    }
}

/// Rule and learned weights; they sum to 1.0.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlendWeights {
    /// Weight of the rule decision.
    pub rule: f64,
    /// Weight of the learned decision.
    pub learned: f64,
}

impl BlendWeights {
    /// Scheduled weights at `days` since install.
    pub fn at_days(days: f64) -> Self {
        let d = days.max(0.0);
        let learned = match ColdStartPhase::from_days(d) {
            ColdStartPhase::Bootstrap => 0.0,
            ColdStartPhase::RampUp => 0.3 * ramp(d - RAMP_UP_START, TRANSITION_START - RAMP_UP_START),
            ColdStartPhase::Transition => {
                0.3 + 0.4 * ramp(d - TRANSITION_START, STABLE_START - TRANSITION_START)
            }
            ColdStartPhase::Stable => {
                0.7 + (0.9 - 0.7) * ramp(d - STABLE_START, FLOOR_REACHED - STABLE_START)
            }
        };
        Self {
            rule: 1.0 - learned,
            learned,
        }
    }
}

/// Install-time anchored schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColdStartSchedule {
    install_ms: i64,
}

impl ColdStartSchedule {
    /// Schedule starting at `install_ms`.
    pub fn new(install_ms: i64) -> Self {
        Self { install_ms }
    }

    /// Install time, Unix ms.
    pub fn install_ms(&self) -> i64 {
        self.install_ms
    }

    /// Fractional days since install at `now_ms` (never negative).
    pub fn days_since_install(&self, now_ms: i64) -> f64 {
        ((now_ms - self.install_ms) as f64 / DAY_MS as f64).max(0.0)
    }

    /// Phase at `now_ms`.
    pub fn phase(&self, now_ms: i64) -> ColdStartPhase {
        ColdStartPhase::from_days(self.days_since_install(now_ms))
    }

    /// Weights at `now_ms`.
    pub fn weights(&self, now_ms: i64) -> BlendWeights {
        BlendWeights::at_days(self.days_since_install(now_ms))
    }
}

// ─── Blend ──────────────────────────────────────────────────────────────────

/// Which side produced a blended decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DecisionSource {
    /// The rule decision won on weighted confidence.
    Rule,
    /// The learned decision won on weighted confidence.
    Learned,
    /// The learned side was not trusted; rules decided.
    RuleFallback,
}

/// One side's proposal.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision<T> {
    /// What is proposed.
    pub item: T,
    /// Confidence in [0, 1].
    pub confidence: f64,
}

/// Blender output.
#[derive(Clone, Debug, PartialEq)]
pub struct Blended<T> {
    /// The chosen proposal.
    pub item: T,
    /// Confidence of the chosen side.
    pub confidence: f64,
    /// Which side won.
    pub source: DecisionSource,
    /// Weights actually applied (after any low-confidence reassignment).
    pub weights: BlendWeights,
}

/// Choose between a rule decision and a learned decision under `weights`.
///
/// With only one side present that side is returned unchanged.
pub fn blend<T>(
    rule: Option<Decision<T>>,
    learned: Option<Decision<T>>,
    weights: BlendWeights,
) -> Option<Blended<T>> {
    match (rule, learned) {
        (None, None) => None,
        (Some(r), None) => Some(Blended {
            item: r.item,
            confidence: r.confidence,
            source: DecisionSource::Rule,
            weights,
        }),
        (None, Some(l)) => Some(Blended {
            item: l.item,
            confidence: l.confidence,
            source: DecisionSource::Learned,
            weights,
        }),
        (Some(r), Some(l)) => {
            if l.confidence < LOW_CONFIDENCE {
                let moved = weights.learned / 2.0;
                return Some(Blended {
                    item: r.item,
                    confidence: r.confidence,
                    source: DecisionSource::RuleFallback,
                    weights: BlendWeights {
                        rule: weights.rule + moved,
                        learned: weights.learned - moved,
                    },
                });
            }
            if r.confidence * weights.rule >= l.confidence * weights.learned {
                Some(Blended {
                    item: r.item,
                    confidence: r.confidence,
                    source: DecisionSource::Rule,
                    weights,
                })
            } else {
                Some(Blended {
                    item: l.item,
                    confidence: l.confidence,
                    source: DecisionSource::Learned,
                    weights,
                })
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
