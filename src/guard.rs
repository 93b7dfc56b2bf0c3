//! Robustness guard: five protection layers around every learning and
//! decision step.
//!
//! | Layer | Type | Effect |
//! |---|---|---|
//! | 1 | [`InputSanitizer`] | NaN / missing / out-of-range numeric features replaced by defaults |
//! | 2 | [`RewardSanitizer`] | rewards > 3σ from the rolling mean rejected, the rest clipped to ±3 |
//! | 3 | [`ParameterClamp`] | each parameter moves at most `max(|old|·rate, rate)` per update |
//! | 4 | [`UncertaintyGate`] | low-confidence learned decisions fall back to rules |
//! | 5 | [`PerformanceMonitor`] | windowed reward average, periodic checkpoints, rollback signal |
//!
//! Layers 1–4 correct silently and count what they did ([`GuardStats`]).
//! Only layer 5 surfaces to the caller, as a [`RollbackSignal`].

use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::{info, warn};

use crate::rule::ContextMap;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Accepted range and replacement for one numeric input.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureBound {
    /// Context key.
    pub key: String,
    /// Inclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound.
    pub max: f64,
    /// Value used when the input is missing, non-numeric, NaN or out of range.
    pub default: f64,
}

impl FeatureBound {
    /// Construct a bound.
    pub fn new(key: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self {
            key: key.into(),
            min,
            max,
            default,
        }
    }
}

/// Tunables for all five layers.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct GuardConfig {
    /// Layer 1 bounds.
    pub bounds: Vec<FeatureBound>,
    /// Layer 2: rolling reward history length. Default 50.
    pub reward_history: usize,
    /// Layer 2: samples needed before outliers are rejected. Default 10.
    pub reward_min_samples: usize,
    /// Layer 2: rejection distance in standard deviations. Default 3.
    pub reward_sigma: f64,
    /// Layer 2: clip magnitude. Default 3.
    pub reward_clip: f64,
    /// Layer 3: relative step limit. Default 0.05.
    pub param_rate: f64,
    /// Layer 4: minimum learned confidence. Default 0.3.
    pub uncertainty_threshold: f64,
    /// Layer 5: reward window. Default 50.
    pub monitor_window: usize,
    /// Layer 5: updates between checkpoints. Default 100.
    pub checkpoint_interval: u64,
    /// Layer 5: fractional drop below the checkpoint that triggers rollback. Default 0.3.
    pub rollback_drop: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            bounds: default_bounds(),
            reward_history: 50,
            reward_min_samples: 10,
            reward_sigma: 3.0,
            reward_clip: 3.0,
            param_rate: 0.05,
            uncertainty_threshold: 0.3,
            monitor_window: 50,
            checkpoint_interval: 100,
            rollback_drop: 0.3,
        }
    }
}

/// Bounds for the numeric inputs of [`DeviceContext`](crate::device::DeviceContext).
pub fn default_bounds() -> Vec<FeatureBound> {
    vec![
        FeatureBound::new("hour", 0.0, 24.0, 12.0),
        FeatureBound::new("batteryLevel", 0.0, 100.0, 50.0),
        FeatureBound::new("isCharging", 0.0, 1.0, 0.0),
        FeatureBound::new("isWeekend", 0.0, 1.0, 0.0),
    ]
}

// ─── Layer 1: input sanitation ──────────────────────────────────────────────

/// Range-checked numeric inputs, keyed like the context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SanitizedInputs {
    values: HashMap<String, f64>,
    replaced: usize,
}

impl SanitizedInputs {
    /// Build directly from `(key, value)` pairs, nothing replaced.
    pub fn from_pairs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self {
            values: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            replaced: 0,
        }
    }

    /// Sanitized value for `key`, if the key is bounded.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// How many inputs were replaced by their default.
    pub fn replaced(&self) -> usize {
        self.replaced
    }
}

/// Layer 1.
#[derive(Clone, Debug, PartialEq)]
pub struct InputSanitizer {
    bounds: Vec<FeatureBound>,
}

impl InputSanitizer {
    /// Sanitizer over the given bounds.
    pub fn new(bounds: Vec<FeatureBound>) -> Self {
        Self { bounds }
    }

    /// Parse and range-check every bounded key of `ctx`.
    ///
    /// Booleans (`true`/`false`) read as 1.0/0.0. The context itself is left
    /// untouched.
    pub fn sanitize(&self, ctx: &ContextMap) -> SanitizedInputs {
        let mut out = SanitizedInputs::default();
        for b in &self.bounds {
            let parsed = ctx.get(&b.key).and_then(|raw| parse_numeric(raw));
            let value = match parsed {
                Some(v) if v >= b.min && v <= b.max => v,
                _ => {
                    out.replaced += 1;
                    b.default
                }
            };
            out.values.insert(b.key.clone(), value);
        }
        out
    }
}

impl Default for InputSanitizer {
    fn default() -> Self {
        Self::new(default_bounds())
    }
}

fn parse_numeric(raw: &str) -> Option<f64> {
    match raw.trim() {
        "true" => Some(1.0),
        "false" => Some(0.0),
        s => s.parse::<f64>().ok().filter(|v| !v.is_nan()),
    }
}

// ─── Layer 2: reward sanitation ─────────────────────────────────────────────

/// What layer 2 did with a reward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RewardVerdict {
    /// Used as given.
    Accepted(f64),
    /// Used after clipping to ±clip.
    Clipped(f64),
    /// Dropped: non-finite or an outlier.
    Rejected,
}

impl RewardVerdict {
    /// The reward to learn from, if any.
    pub fn value(self) -> Option<f64> {
        match self {
            RewardVerdict::Accepted(v) | RewardVerdict::Clipped(v) => Some(v),
            RewardVerdict::Rejected => None,
        }
    }
}

/// Layer 2: rolling 3σ outlier rejection plus clipping.
#[derive(Clone, Debug)]
pub struct RewardSanitizer {
    history: VecDeque<f64>,
    capacity: usize,
    min_samples: usize,
    sigma: f64,
    clip: f64,
}

impl RewardSanitizer {
    /// Sanitizer with the layer-2 settings of `config`.
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.reward_history),
            capacity: config.reward_history.max(1),
            min_samples: config.reward_min_samples,
            sigma: config.reward_sigma,
            clip: config.reward_clip,
        }
    }

    /// Judge one reward. Accepted and clipped rewards join the history.
    pub fn sanitize(&mut self, reward: f64) -> RewardVerdict {
        if !reward.is_finite() {
            return RewardVerdict::Rejected;
        }
        if self.history.len() >= self.min_samples {
            let (mean, std) = mean_std(&self.history);
            if std > 1e-9 && (reward - mean).abs() > self.sigma * std {
                return RewardVerdict::Rejected;
            }
        }
        let clipped = reward.clamp(-self.clip, self.clip);
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(clipped);
        if clipped == reward {
            RewardVerdict::Accepted(reward)
        } else {
            RewardVerdict::Clipped(clipped)
        }
    }

    /// Samples held.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// `true` before the first accepted reward.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

fn mean_std(xs: &VecDeque<f64>) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
    (mean, var.sqrt())
}

// ─── Layer 3: parameter protection ──────────────────────────────────────────

/// Layer 3: bounded per-update parameter steps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterClamp {
    /// Relative step limit; also the absolute floor for parameters near zero.
    pub rate: f64,
}

impl ParameterClamp {
    /// Clamp with the given rate.
    pub fn new(rate: f64) -> Self {
        Self { rate: rate.abs() }
    }

    /// Largest step allowed away from `old`.
    pub fn max_step(&self, old: f64) -> f64 {
        (old.abs() * self.rate).max(self.rate)
    }

    /// Move from `old` toward `new`, at most [`max_step`](Self::max_step).
    /// A non-finite `new` keeps `old`.
    pub fn protect(&self, old: f64, new: f64) -> f64 {
        self.protect_counted(old, new).0
    }

    /// Like [`protect`](Self::protect), also reporting whether the step was cut.
    pub fn protect_counted(&self, old: f64, new: f64) -> (f64, bool) {
        if !new.is_finite() {
            return (old, true);
        }
        let limit = self.max_step(old);
        let delta = new - old;
        if delta.abs() <= limit {
            (new, false)
        } else {
            (old + delta.signum() * limit, true)
        }
    }
}

impl Default for ParameterClamp {
    fn default() -> Self {
        Self::new(0.05)
    }
}

// ─── Layer 4: uncertainty gate ──────────────────────────────────────────────

/// Layer 4.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UncertaintyGate {
    /// Minimum learned confidence to act on.
    pub threshold: f64,
}

impl UncertaintyGate {
    /// `true` when `confidence` is high enough to act on.
    pub fn passes(&self, confidence: f64) -> bool {
        confidence >= self.threshold
    }
}

// ─── Layer 5: performance monitor ───────────────────────────────────────────

/// Saved parameters and the window average they were achieving.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint<P> {
    /// Parameters at checkpoint time.
    pub params: P,
    /// Reward window average at checkpoint time.
    pub window_average: f64,
    /// Update count at checkpoint time.
    pub at_update: u64,
}

/// Regression detected: restore the last checkpoint.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct RollbackSignal {
    /// Window average stored with the checkpoint.
    pub baseline_average: f64,
    /// Current window average.
    pub current_average: f64,
    /// Update count of the checkpoint to restore.
    pub checkpoint_update: u64,
}

/// What one observed reward led to.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitorEvent {
    /// Nothing to do.
    Nothing,
    /// A checkpoint is due; call [`PerformanceMonitor::store_checkpoint`].
    CheckpointDue {
        /// Average to store with the checkpoint.
        window_average: f64,
    },
    /// Performance regressed past the threshold.
    Rollback(RollbackSignal),
}

/// Layer 5: sliding reward average, periodic checkpoints, rollback detection.
///
/// Generic over the parameter snapshot `P` it checkpoints.
#[derive(Clone, Debug)]
pub struct PerformanceMonitor<P> {
    window: VecDeque<f64>,
    window_size: usize,
    interval: u64,
    drop: f64,
    updates: u64,
    checkpoint: Option<Checkpoint<P>>,
    checkpoints: u64,
    rollbacks: u64,
}

impl<P: Clone> PerformanceMonitor<P> {
    /// Monitor with the layer-5 settings of `config`.
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.monitor_window),
            window_size: config.monitor_window.max(1),
            interval: config.checkpoint_interval.max(1),
            drop: config.rollback_drop,
            updates: 0,
            checkpoint: None,
            checkpoints: 0,
            rollbacks: 0,
        }
    }

    /// Record an applied reward.
    ///
    /// Once the window is full, a drop of more than `rollback_drop` below
    /// the checkpointed average yields [`MonitorEvent::Rollback`] and resets
    /// the window; otherwise every `checkpoint_interval` updates a
    /// checkpoint is requested.
    pub fn observe(&mut self, reward: f64) -> MonitorEvent {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(reward);
        self.updates += 1;

        if self.window.len() < self.window_size {
            return MonitorEvent::Nothing;
        }
        let current = self.window_average();

        if let Some(cp) = &self.checkpoint {
            let baseline = cp.window_average;
            if baseline.abs() > 1e-9 && baseline - current > baseline.abs() * self.drop {
                let signal = RollbackSignal {
                    baseline_average: baseline,
                    current_average: current,
                    checkpoint_update: cp.at_update,
                };
                warn!(
                    baseline = baseline,
                    current = current,
                    "reward average regressed, rollback advised"
                );
                self.rollbacks += 1;
                self.window.clear();
                return MonitorEvent::Rollback(signal);
            }
        }

        if self.updates % self.interval == 0 {
            MonitorEvent::CheckpointDue {
                window_average: current,
            }
        } else {
            MonitorEvent::Nothing
        }
    }

    /// Save `params` as the new baseline.
    pub fn store_checkpoint(&mut self, params: P, window_average: f64) {
        info!(update = self.updates, average = window_average, "checkpoint stored");
        self.checkpoint = Some(Checkpoint {
            params,
            window_average,
            at_update: self.updates,
        });
        self.checkpoints += 1;
    }

    /// Most recent checkpoint.
    pub fn last_checkpoint(&self) -> Option<&Checkpoint<P>> {
        self.checkpoint.as_ref()
    }

    /// Mean of the current window (0.0 when empty).
    pub fn window_average(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// Rewards observed so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Checkpoints stored so far.
    pub fn checkpoint_count(&self) -> u64 {
        self.checkpoints
    }

    /// Rollback signals emitted so far.
    pub fn rollback_count(&self) -> u64 {
        self.rollbacks
    }
}

// ─── Aggregate ──────────────────────────────────────────────────────────────

/// Counters of what the guard corrected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct GuardStats {
    /// Layer 1 replacements.
    pub inputs_replaced: u64,
    /// Layer 2 rejections.
    pub rewards_rejected: u64,
    /// Layer 2 clips.
    pub rewards_clipped: u64,
    /// Layer 3 clamped parameter steps.
    pub params_clamped: u64,
    /// Layer 4 fallbacks.
    pub decisions_gated: u64,
    /// Layer 5 checkpoints.
    pub checkpoints: u64,
    /// Layer 5 rollback signals.
    pub rollbacks: u64,
}

/// Layers 1–4 plus their counters.
#[derive(Clone, Debug)]
pub struct RobustnessGuard {
    /// Layer 1.
    pub inputs: InputSanitizer,
    /// Layer 2.
    pub rewards: RewardSanitizer,
    /// Layer 3.
    pub clamp: ParameterClamp,
    /// Layer 4.
    pub gate: UncertaintyGate,
    stats: GuardStats,
}

impl RobustnessGuard {
    /// Guard built from `config`.
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            inputs: InputSanitizer::new(config.bounds.clone()),
            rewards: RewardSanitizer::new(config),
            clamp: ParameterClamp::new(config.param_rate),
            gate: UncertaintyGate {
                threshold: config.uncertainty_threshold,
            },
            stats: GuardStats::default(),
        }
    }

    /// Layer 1, counted.
    pub fn sanitize_inputs(&mut self, ctx: &ContextMap) -> SanitizedInputs {
        let out = self.inputs.sanitize(ctx);
        self.stats.inputs_replaced += out.replaced() as u64;
        out
    }

    /// Layer 2, counted.
    pub fn sanitize_reward(&mut self, reward: f64) -> RewardVerdict {
        let verdict = self.rewards.sanitize(reward);
        match verdict {
            RewardVerdict::Rejected => {
                self.stats.rewards_rejected += 1;
                warn!(reward = reward, "reward rejected as outlier");
            }
            RewardVerdict::Clipped(_) => self.stats.rewards_clipped += 1,
            RewardVerdict::Accepted(_) => {}
        }
        verdict
    }

    /// Record layer-3 clamps performed by a learner.
    pub fn note_clamped(&mut self, count: usize) {
        self.stats.params_clamped += count as u64;
    }

    /// Layer 4, counted. `true` means "fall back to rules".
    pub fn gate_rejects(&mut self, confidence: f64) -> bool {
        let rejects = !self.gate.passes(confidence);
        if rejects {
            self.stats.decisions_gated += 1;
        }
        rejects
    }

    /// Counters so far (layer-5 counts are filled in by the owner of the monitor).
    pub fn stats(&self) -> GuardStats {
        self.stats.clone()
    }
}

impl Default for RobustnessGuard {
    fn default() -> Self {
        Self::new(&GuardConfig::default())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
