//! The decision engine: one thread-safe façade over every component.
//!
//! ```text
//!  put / push_event ─► SensorTray, EventBuffer
//!                                │
//!  evaluate(ctx) ─► DecisionTree ─► soft match ─► RateLimiter ─► ranked results
//!                                                                    │
//!  decide(ctx) ─► guard L1 ─► features ─► Bandit ─► cold-start blend ─► guard L4
//!                                                                    │
//!  dispatch(result) ─► MergeQueue ─► Delivery
//!
//!  update_reward ─► guard L2 ─► Bandit (guard L3) ─► PerformanceMonitor (guard L5)
//! ```
//!
//! Every public method takes `&self`. Each component sits behind its own
//! mutex; a poisoned lock is recovered rather than propagated.
//!
//! Lock order: `rules` may be held while `limiter` is taken, and the event
//! buffer locks internally under either. `guard`, `learner`, `merge`,
//! `tray`, `motion` and `places` are only ever held alone; a method that
//! needs two of them (reward updates, `guard_stats`, `observe_wifi`) releases
//! the first before taking the next.

use std::sync::{Arc, Mutex, MutexGuard};

use hashbrown::HashMap;
use tracing::{debug, info, warn};

use crate::bandit::{ArmTable, Bandit, Features, Selection, Strategy};
use crate::clock::{Clock, SystemClock};
use crate::cold_start::{blend, BlendWeights, ColdStartPhase, ColdStartSchedule, Decision, DecisionSource};
use crate::config::EngineConfig;
use crate::device::DeviceContext;
use crate::events::{ContextEvent, EventBuffer};
use crate::guard::{GuardStats, MonitorEvent, PerformanceMonitor, RobustnessGuard, RollbackSignal};
use crate::motion::{AccelSample, MotionDetector, MotionReading, SamplingStrategy, SensorIntervals};
use crate::places::{PlaceLearner, PlaceSignals};
use crate::rate_limit::{Delivery, MergeQueue, Priority, RateLimiter};
use crate::rule::{ContextMap, MatchResult, Rule};
use crate::soft_match::rule_confidence;
use crate::tray::{SensorTray, SlotStatus, TrayReading};
use crate::tree::DecisionTree;
use crate::vocabulary::ContextVocabulary;

// ─── Outcomes ───────────────────────────────────────────────────────────────

/// Result of [`RuleEngine::decide`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DecisionOutcome {
    /// The chosen rule result.
    pub result: MatchResult,
    /// Which side chose it.
    pub source: DecisionSource,
    /// Confidence of the chosen side.
    pub confidence: f64,
    /// Cold-start phase at decision time.
    pub phase: ColdStartPhase,
    /// Weights applied after any fallback reassignment.
    pub weights: BlendWeights,
}

/// Result of [`RuleEngine::observe_motion`].
#[derive(Clone, Debug, PartialEq)]
pub struct MotionUpdate {
    /// The classification.
    pub reading: MotionReading,
    /// New sensor intervals, present only when they changed.
    pub intervals: Option<SensorIntervals>,
}

/// Result of a reward update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Reward that reached the learner after sanitation; `None` if it was
    /// rejected or the update could not be applied.
    pub applied_reward: Option<f64>,
    /// Present when the performance monitor advises a rollback.
    pub rollback: Option<RollbackSignal>,
}

// ─── Component state ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RuleTable {
    rules: Vec<Rule>,
    tree: DecisionTree,
}

impl RuleTable {
    fn rebuild(&mut self, max_keys: usize) {
        self.tree = DecisionTree::compile(&self.rules, max_keys);
    }

    fn find(&self, rule_id: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.id == rule_id)
    }
}

#[derive(Debug)]
struct Learner {
    bandit: Bandit,
    monitor: PerformanceMonitor<ArmTable>,
    /// Features each action was last chosen under, for context-free feedback.
    last_features: HashMap<String, Features>,
}

#[derive(Debug)]
struct MotionTracker {
    detector: MotionDetector,
    sampling: SamplingStrategy,
}

fn lock<'a, T>(m: &'a Mutex<T>, component: &'static str) -> MutexGuard<'a, T> {
    m.lock().unwrap_or_else(|poisoned| {
        warn!(component, "lock poisoned, recovering");
        poisoned.into_inner()
    })
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// On-device context decision engine.
///
/// # Example
///
/// ```rust
/// use context_core::engine::RuleEngine;
/// use context_core::config::EngineConfig;
/// use context_core::rule::{context_map, Action, Condition, Operator, Rule};
///
/// let engine = RuleEngine::new(EngineConfig::default());
/// engine.add_rule(
///     Rule::new("low-battery", Action::new("saver", "alert"))
///         .with_condition(Condition::new("batteryLevel", Operator::Lte, "20"))
///         .with_condition(Condition::new("isCharging", Operator::Eq, "false")),
/// );
///
/// let ctx = context_map([("batteryLevel", "12"), ("isCharging", "false")]);
/// let results = engine.evaluate(&ctx, 3);
/// assert_eq!(results[0].rule_id, "low-battery");
/// assert_eq!(results[0].confidence, 1.0);
/// ```
pub struct RuleEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    schedule: ColdStartSchedule,
    rules: Mutex<RuleTable>,
    events: EventBuffer,
    limiter: Mutex<RateLimiter>,
    merge: Mutex<MergeQueue>,
    learner: Mutex<Learner>,
    guard: Mutex<RobustnessGuard>,
    tray: Mutex<SensorTray>,
    motion: Mutex<MotionTracker>,
    places: Mutex<PlaceLearner>,
}

impl core::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("config", &self.config)
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl RuleEngine {
    /// Engine on the system clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Engine on a caller-supplied clock.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let install_ms = config.install_time_ms.unwrap_or_else(|| clock.now_ms());
        let learner = Learner {
            bandit: Bandit::new(&config.bandit),
            monitor: PerformanceMonitor::new(&config.guard),
            last_features: HashMap::new(),
        };
        Self {
            schedule: ColdStartSchedule::new(install_ms),
            rules: Mutex::new(RuleTable::default()),
            events: EventBuffer::with_max_age(config.event_max_age_ms),
            limiter: Mutex::new(RateLimiter::new(config.rate_limits.clone())),
            merge: Mutex::new(MergeQueue::new(config.merge.clone())),
            learner: Mutex::new(learner),
            guard: Mutex::new(RobustnessGuard::new(&config.guard)),
            tray: Mutex::new(SensorTray::new(config.tray.clone())),
            motion: Mutex::new(MotionTracker {
                detector: MotionDetector::new(config.motion.clone()),
                sampling: SamplingStrategy::new(config.sampling.clone()),
            }),
            places: Mutex::new(PlaceLearner::new()),
            clock,
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    // ── Rules ───────────────────────────────────────────────────────────────

    /// Replace the whole rule set and recompile the tree.
    pub fn load_rules(&self, rules: Vec<Rule>) {
        let mut table = lock(&self.rules, "rules");
        table.rules = rules;
        table.rebuild(self.config.max_tree_keys);
        info!(
            rules = table.rules.len(),
            nodes = table.tree.node_count(),
            "rule set loaded"
        );
    }

    /// Add a rule, replacing any rule with the same id.
    pub fn add_rule(&self, rule: Rule) {
        let mut table = lock(&self.rules, "rules");
        match table.find(&rule.id) {
            Some(i) => table.rules[i] = rule,
            None => table.rules.push(rule),
        }
        table.rebuild(self.config.max_tree_keys);
    }

    /// Remove a rule and its cooldown. Returns `false` if it was not loaded.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut table = lock(&self.rules, "rules");
        let Some(i) = table.find(rule_id) else {
            return false;
        };
        table.rules.remove(i);
        table.rebuild(self.config.max_tree_keys);
        lock(&self.limiter, "limiter").forget_rule(rule_id);
        true
    }

    /// Enable or disable a rule without removing it.
    pub fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> bool {
        let mut table = lock(&self.rules, "rules");
        let Some(i) = table.find(rule_id) else {
            return false;
        };
        if table.rules[i].enabled != enabled {
            table.rules[i].enabled = enabled;
            table.rebuild(self.config.max_tree_keys);
        }
        true
    }

    /// Copy of the loaded rules.
    pub fn rules(&self) -> Vec<Rule> {
        lock(&self.rules, "rules").rules.clone()
    }

    /// Number of loaded rules, enabled or not.
    pub fn rule_count(&self) -> usize {
        lock(&self.rules, "rules").rules.len()
    }

    // ── Ingress ─────────────────────────────────────────────────────────────

    /// Record a context event.
    pub fn push_event(&self, event_type: &str, snapshot: ContextMap, timestamp_ms: i64) {
        self.events.push(event_type, snapshot, timestamp_ms);
    }

    /// Record a context event stamped with the engine clock.
    pub fn push_event_now(&self, event_type: &str, snapshot: ContextMap) {
        self.events.push(event_type, snapshot, self.now());
    }

    /// Most recent event of `event_type`.
    pub fn latest_event(&self, event_type: &str) -> Option<ContextEvent> {
        self.events.latest(event_type)
    }

    /// Stored event count.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Store a sensor reading in the tray.
    pub fn put(&self, key: &str, value: impl Into<String>, quality: f64, source: Option<&str>) {
        let now = self.now();
        lock(&self.tray, "tray").put(key, value, quality, source, now);
    }

    /// Read one tray key with decay applied.
    pub fn get(&self, key: &str) -> TrayReading {
        let now = self.now();
        lock(&self.tray, "tray").get(key, now)
    }

    /// Flat context of the tray plus time fields.
    pub fn snapshot(&self) -> ContextMap {
        let now = self.now();
        lock(&self.tray, "tray").snapshot(now)
    }

    /// Override the TTL of a tray key.
    pub fn set_ttl(&self, key: &str, ttl_ms: i64) {
        lock(&self.tray, "tray").set_ttl(key, ttl_ms);
    }

    /// Debug rows for every tray slot.
    pub fn tray_status(&self) -> Vec<SlotStatus> {
        let now = self.now();
        lock(&self.tray, "tray").status(now)
    }

    // ── Motion and places ───────────────────────────────────────────────────

    /// Classify an accelerometer sample, optionally with GPS speed in m/s.
    /// The state lands in the tray as `motionState` with the classifier's
    /// confidence as quality, and the sampling plan follows it.
    pub fn observe_motion(&self, sample: &AccelSample, gps_speed: Option<f64>) -> MotionUpdate {
        let update = {
            let mut motion = lock(&self.motion, "motion");
            let reading = motion.detector.detect(sample, gps_speed);
            let intervals = motion.sampling.update(reading.state);
            MotionUpdate { reading, intervals }
        };
        if update.reading.changed {
            debug!(state = update.reading.state.as_str(), confidence = update.reading.confidence, "motion state changed");
        }
        self.put("motionState", update.reading.state.as_str(), update.reading.confidence, Some("motion"));
        update
    }

    /// Sensor intervals currently in force; `None` before the first motion
    /// sample.
    pub fn sampling_intervals(&self) -> Option<SensorIntervals> {
        lock(&self.motion, "motion").sampling.current()
    }

    /// Remember the Wi-Fi network and Bluetooth peer seen at `place` now.
    /// Returns `true` when either was new for that place.
    pub fn learn_place(&self, place: &str, wifi: Option<&str>, bluetooth: Option<&str>) -> bool {
        let now = self.now();
        let hour = lock(&self.tray, "tray").local_hour(now).unwrap_or(0);
        let learned = lock(&self.places, "places").learn(place, wifi, bluetooth, now, hour);
        if learned {
            debug!(place, "new place signal learned");
        }
        learned
    }

    /// Record the current Wi-Fi SSID. When exactly one learned place knows
    /// it, that place is also written as `geofence`. Returns the places that
    /// know the SSID.
    pub fn observe_wifi(&self, ssid: &str) -> Vec<String> {
        self.put("wifiSsid", ssid, 1.0, Some("wifi"));
        let places = lock(&self.places, "places").places_for_wifi(ssid);
        if let [place] = places.as_slice() {
            self.put("geofence", place.as_str(), 1.0, Some("wifi"));
        }
        places
    }

    /// Signals learned for `place`.
    pub fn place_signals(&self, place: &str) -> Option<PlaceSignals> {
        lock(&self.places, "places").signals(place).cloned()
    }

    /// Forget `place`. Returns `true` if it was known.
    pub fn forget_place(&self, place: &str) -> bool {
        lock(&self.places, "places").clear(place)
    }

    // ── Evaluation ──────────────────────────────────────────────────────────

    /// Rules matching `ctx`, best first, at most `max_results`.
    ///
    /// Results at or below `min_confidence` and rules held by the rate
    /// limiter are dropped. Ranking is `confidence × priority` descending,
    /// ties on ascending rule id. The top result is recorded as a firing.
    pub fn evaluate(&self, ctx: &ContextMap, max_results: usize) -> Vec<MatchResult> {
        if max_results == 0 {
            return Vec::new();
        }
        let now = self.now();
        let table = lock(&self.rules, "rules");

        let scored: Vec<(usize, f64)> = {
            let events = self.events.at(now);
            table
                .tree
                .candidates(ctx)
                .into_iter()
                .filter_map(|i| {
                    let c = rule_confidence(&table.rules[i].conditions, ctx, &events);
                    (c > self.config.min_confidence).then_some((i, c))
                })
                .collect()
        };

        let mut limiter = lock(&self.limiter, "limiter");
        let mut best: HashMap<&str, (usize, f64)> = HashMap::with_capacity(scored.len());
        for (i, confidence) in scored {
            let rule = &table.rules[i];
            if let Err(why) = limiter.check(&rule.id, rule.cooldown_ms, &rule.action.kind, now) {
                debug!(rule = %rule.id, ?why, "rule suppressed");
                continue;
            }
            let slot = best.entry(rule.id.as_str()).or_insert((i, confidence));
            if confidence > slot.1 {
                *slot = (i, confidence);
            }
        }

        let mut ranked: Vec<(usize, f64)> = best.into_values().collect();
        ranked.sort_by(|&(ia, ca), &(ib, cb)| {
            let (ra, rb) = (&table.rules[ia], &table.rules[ib]);
            (cb * rb.priority)
                .total_cmp(&(ca * ra.priority))
                .then_with(|| ra.id.cmp(&rb.id))
        });
        ranked.truncate(max_results);

        if let Some(&(top, _)) = ranked.first() {
            let rule = &table.rules[top];
            limiter.record(&rule.id, &rule.action.kind, now);
        }

        ranked
            .into_iter()
            .map(|(i, confidence)| MatchResult {
                rule_id: table.rules[i].id.clone(),
                confidence,
                action: table.rules[i].action.clone(),
            })
            .collect()
    }

    /// Full decision for `ctx`: evaluate, let the bandit pick among the
    /// matching actions, blend the two by cold-start phase, and gate the
    /// learned side on its confidence.
    ///
    /// `None` when no rule matches.
    pub fn decide(&self, ctx: &ContextMap) -> Option<DecisionOutcome> {
        let results = self.evaluate(ctx, usize::MAX);
        let top = results.first()?.clone();
        let now = self.now();

        let inputs = lock(&self.guard, "guard").sanitize_inputs(ctx);
        let features = DeviceContext::from_inputs(&inputs, ctx).to_feature_vec();

        let mut action_ids: Vec<&str> = Vec::with_capacity(results.len());
        for r in &results {
            if !action_ids.contains(&r.action.id.as_str()) {
                action_ids.push(&r.action.id);
            }
        }

        let learned = {
            let mut learner = lock(&self.learner, "learner");
            let selection = learner.bandit.select(&action_ids, &features);
            if let Some(sel) = &selection {
                learner.last_features.insert(sel.action_id.clone(), features);
            }
            selection
        }
        .and_then(|sel| {
            results
                .iter()
                .find(|r| r.action.id == sel.action_id)
                .map(|r| Decision {
                    item: r.clone(),
                    confidence: sel.confidence,
                })
        });

        let rule_side = Decision {
            confidence: top.confidence,
            item: top,
        };
        let phase = self.schedule.phase(now);
        let mut blended = blend(Some(rule_side.clone()), learned, self.schedule.weights(now))?;

        if blended.source == DecisionSource::Learned
            && lock(&self.guard, "guard").gate_rejects(blended.confidence)
        {
            debug!(confidence = blended.confidence, "learned decision gated");
            blended.item = rule_side.item;
            blended.confidence = rule_side.confidence;
            blended.source = DecisionSource::RuleFallback;
        }

        Some(DecisionOutcome {
            result: blended.item,
            source: blended.source,
            confidence: blended.confidence,
            phase,
            weights: blended.weights,
        })
    }

    /// Let the learner choose among `candidates` directly, under `ctx`.
    pub fn select_action(&self, candidates: &[&str], ctx: &ContextMap) -> Option<Selection> {
        let inputs = lock(&self.guard, "guard").sanitize_inputs(ctx);
        let features = DeviceContext::from_inputs(&inputs, ctx).to_feature_vec();
        let mut learner = lock(&self.learner, "learner");
        let selection = learner.bandit.select(candidates, &features)?;
        learner.last_features.insert(selection.action_id.clone(), features);
        Some(selection)
    }

    // ── Feedback ────────────────────────────────────────────────────────────

    /// Reward an action. LinUCB uses the features the action was last chosen
    /// under by [`decide`](Self::decide).
    pub fn update_reward(&self, action_id: &str, reward: f64) -> UpdateOutcome {
        self.apply_reward(action_id, reward, None)
    }

    /// Reward an action under an explicit context.
    pub fn update_reward_with_context(&self, action_id: &str, reward: f64, ctx: &ContextMap) -> UpdateOutcome {
        let inputs = lock(&self.guard, "guard").sanitize_inputs(ctx);
        let features = DeviceContext::from_inputs(&inputs, ctx).to_feature_vec();
        self.apply_reward(action_id, reward, Some(features))
    }

    fn apply_reward(&self, action_id: &str, reward: f64, features: Option<Features>) -> UpdateOutcome {
        let (verdict, clamp) = {
            let mut guard = lock(&self.guard, "guard");
            (guard.sanitize_reward(reward), guard.clamp)
        };
        let Some(applied) = verdict.value() else {
            return UpdateOutcome::default();
        };

        let (clamped, rollback) = {
            let mut learner = lock(&self.learner, "learner");
            let features = features.or_else(|| learner.last_features.get(action_id).copied());
            let Some(clamped) = learner.bandit.update(action_id, applied, features.as_ref(), &clamp) else {
                debug!(action = action_id, "no features for contextual update, skipped");
                return UpdateOutcome::default();
            };
            let rollback = match learner.monitor.observe(applied) {
                MonitorEvent::Nothing => None,
                MonitorEvent::CheckpointDue { window_average } => {
                    let arms = learner.bandit.arms();
                    learner.monitor.store_checkpoint(arms, window_average);
                    None
                }
                MonitorEvent::Rollback(signal) => Some(signal),
            };
            (clamped, rollback)
        };

        if clamped > 0 {
            lock(&self.guard, "guard").note_clamped(clamped);
        }
        UpdateOutcome {
            applied_reward: Some(applied),
            rollback,
        }
    }

    /// Restore the learner to its last checkpoint. Returns `false` when
    /// there is none.
    pub fn restore_checkpoint(&self) -> bool {
        let mut learner = lock(&self.learner, "learner");
        let Some(params) = learner.monitor.last_checkpoint().map(|cp| cp.params.clone()) else {
            return false;
        };
        let restored = learner.bandit.restore_arms(params);
        if restored {
            info!("learner restored from checkpoint");
        }
        restored
    }

    /// Forget everything the learner has learned.
    pub fn reset_learning(&self) {
        let mut learner = lock(&self.learner, "learner");
        learner.bandit.reset();
        learner.last_features.clear();
    }

    // ── Delivery ────────────────────────────────────────────────────────────

    /// Route a chosen result through merge-push. High and Urgent results
    /// come straight back; Low and Normal may be held and later collapsed.
    pub fn dispatch(&self, result: &MatchResult) -> Option<Delivery> {
        let priority = {
            let table = lock(&self.rules, "rules");
            table
                .find(&result.rule_id)
                .map_or(Priority::Normal, |i| Priority::from_weight(table.rules[i].priority))
        };
        let now = self.now();
        lock(&self.merge, "merge").offer(&result.rule_id, result.action.clone(), priority, now)
    }

    /// Release held deliveries once the oldest has waited the merge window.
    pub fn flush_pending(&self) -> Option<Delivery> {
        let now = self.now();
        lock(&self.merge, "merge").flush_due(now)
    }

    /// Deliveries waiting in the merge queue.
    pub fn pending_count(&self) -> usize {
        lock(&self.merge, "merge").len()
    }

    // ── Introspection ───────────────────────────────────────────────────────

    /// Current cold-start phase.
    pub fn phase(&self) -> ColdStartPhase {
        self.schedule.phase(self.now())
    }

    /// Current scheduled blend weights.
    pub fn blend_weights(&self) -> BlendWeights {
        self.schedule.weights(self.now())
    }

    /// Strategy the learner runs.
    pub fn strategy(&self) -> Strategy {
        lock(&self.learner, "learner").bandit.strategy()
    }

    /// Copy of every learned arm.
    pub fn bandit_stats(&self) -> ArmTable {
        lock(&self.learner, "learner").bandit.arms()
    }

    /// Guard counters, including checkpoints and rollbacks.
    pub fn guard_stats(&self) -> GuardStats {
        let mut stats = lock(&self.guard, "guard").stats();
        let learner = lock(&self.learner, "learner");
        stats.checkpoints = learner.monitor.checkpoint_count();
        stats.rollbacks = learner.monitor.rollback_count();
        stats
    }
}

// ─── Persistence ────────────────────────────────────────────────────────────

#[cfg(feature = "serde")]
impl RuleEngine {
    /// Rule set as JSON.
    pub fn export_rules(&self) -> Result<String, crate::error::EngineError> {
        crate::persist::export_rules(&lock(&self.rules, "rules").rules)
    }

    /// Replace the rule set from JSON, skipping bad entries. Returns how many
    /// rules were loaded.
    pub fn import_rules(&self, json: &str) -> Result<usize, crate::error::EngineError> {
        let rules = crate::persist::import_rules(json)?;
        let n = rules.len();
        self.load_rules(rules);
        Ok(n)
    }

    /// Learner statistics as JSON.
    pub fn export_bandit(&self) -> Result<String, crate::error::EngineError> {
        crate::persist::export_bandit(&self.bandit_stats())
    }

    /// Replace learner statistics from JSON. Returns how many arms were loaded.
    pub fn load_bandit(&self, json: &str) -> Result<usize, crate::error::EngineError> {
        let mut learner = lock(&self.learner, "learner");
        let strategy = learner.bandit.strategy();
        let table = crate::persist::import_bandit(json, strategy, self.config.bandit.inverse)?;
        let n = table.len();
        learner.bandit.restore_arms(table);
        info!(arms = n, "bandit statistics loaded");
        Ok(n)
    }

    /// Learned place signals as JSON.
    pub fn export_places(&self) -> Result<String, crate::error::EngineError> {
        Ok(serde_json::to_string(lock(&self.places, "places").all())?)
    }

    /// Replace learned place signals from JSON. Returns how many places were
    /// loaded.
    pub fn load_places(&self, json: &str) -> Result<usize, crate::error::EngineError> {
        let places: std::collections::BTreeMap<String, PlaceSignals> = serde_json::from_str(json)?;
        let n = places.len();
        lock(&self.places, "places").replace(places);
        info!(places = n, "place signals loaded");
        Ok(n)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::{BanditConfig, Strategy};
    use crate::clock::{ManualClock, DAY_MS, HOUR_MS, MINUTE_MS};
    use crate::device::MotionState;
    use crate::rule::{context_map, Action, Condition, Operator};

    const T0: i64 = 1_700_000_000_000;

    fn engine_at(config: EngineConfig) -> (RuleEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        (RuleEngine::with_clock(config, clock.clone()), clock)
    }

    fn seeded() -> EngineConfig {
        EngineConfig {
            bandit: BanditConfig {
                seed: Some(3),
                epsilon: 0.0,
                ..BanditConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn battery_rule() -> Rule {
        Rule::new("battery", Action::new("saver", "alert"))
            .with_condition(Condition::new("batteryLevel", Operator::Lte, "20"))
            .with_condition(Condition::new("isCharging", Operator::Eq, "false"))
    }

    #[test]
    fn test_add_replaces_same_id() {
        let (engine, _) = engine_at(seeded());
        engine.add_rule(battery_rule());
        engine.add_rule(battery_rule().with_priority(2.0));
        assert_eq!(engine.rule_count(), 1);
        assert_eq!(engine.rules()[0].priority, 2.0);
    }

    #[test]
    fn test_remove_and_disable() {
        let (engine, _) = engine_at(seeded());
        engine.add_rule(battery_rule());
        let ctx = context_map([("batteryLevel", "10"), ("isCharging", "false")]);

        assert!(engine.set_rule_enabled("battery", false));
        assert!(engine.evaluate(&ctx, 5).is_empty());
        assert!(engine.set_rule_enabled("battery", true));
        assert_eq!(engine.evaluate(&ctx, 5).len(), 1);

        assert!(engine.remove_rule("battery"));
        assert!(!engine.remove_rule("battery"));
        assert!(!engine.set_rule_enabled("battery", true));
        assert!(engine.evaluate(&ctx, 5).is_empty());
    }

    #[test]
    fn test_ranking_by_weighted_confidence_then_id() {
        let (engine, _) = engine_at(seeded());
        engine.load_rules(vec![
            Rule::new("b", Action::new("x", "t1")),
            Rule::new("a", Action::new("y", "t2")),
            Rule::new("c", Action::new("z", "t3")).with_priority(2.0),
        ]);
        let ids: Vec<String> = engine
            .evaluate(&ContextMap::new(), 10)
            .into_iter()
            .map(|r| r.rule_id)
            .collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn test_min_confidence_filters_results() {
        let (engine, _) = engine_at(seeded());
        engine.add_rule(
            Rule::new("weak", Action::new("a", "t"))
                .with_condition(Condition::new("x", Operator::Eq, "1"))
                .with_condition(Condition::new("y", Operator::Eq, "1"))
                .with_condition(Condition::new("z", Operator::Eq, "1"))
                .with_condition(Condition::new("w", Operator::Eq, "1")),
        );
        // 0.5^4 = 0.0625 is below the 0.1 floor.
        assert!(engine.evaluate(&ContextMap::new(), 5).is_empty());
    }

    #[test]
    fn test_cooldown_blocks_refire() {
        let (engine, clock) = engine_at(seeded());
        engine.add_rule(battery_rule().with_cooldown_ms(10 * MINUTE_MS));
        let ctx = context_map([("batteryLevel", "10"), ("isCharging", "false")]);

        assert_eq!(engine.evaluate(&ctx, 1).len(), 1);
        clock.advance(10 * MINUTE_MS - 1);
        assert!(engine.evaluate(&ctx, 1).is_empty());
        clock.advance(1);
        assert_eq!(engine.evaluate(&ctx, 1).len(), 1);
    }

    #[test]
    fn test_temporal_condition_uses_event_buffer() {
        let (engine, clock) = engine_at(seeded());
        engine.add_rule(
            Rule::new("after-meeting", Action::new("notes", "suggestion"))
                .with_condition(Condition::new("event:meeting_end", Operator::Recent, "600000")),
        );
        assert!(engine.evaluate(&ContextMap::new(), 1).is_empty());
        engine.push_event_now("meeting_end", ContextMap::new());
        clock.advance(5 * MINUTE_MS);
        assert_eq!(engine.evaluate(&ContextMap::new(), 1)[0].confidence, 1.0);
        clock.advance(6 * MINUTE_MS);
        assert!(engine.evaluate(&ContextMap::new(), 1).is_empty());
    }

    #[test]
    fn test_decide_in_bootstrap_uses_rules() {
        let (engine, _) = engine_at(seeded());
        engine.add_rule(battery_rule());
        let ctx = context_map([("batteryLevel", "10"), ("isCharging", "false")]);
        let out = engine.decide(&ctx).unwrap();
        assert_eq!(out.phase, ColdStartPhase::Bootstrap);
        assert_eq!(out.result.rule_id, "battery");
        assert_ne!(out.source, DecisionSource::Learned);
        assert!(engine.decide(&context_map([("batteryLevel", "90"), ("isCharging", "true")])).is_none());
    }

    #[test]
    fn test_untrained_learner_falls_back_when_stable() {
        let cfg = EngineConfig {
            install_time_ms: Some(T0 - 100 * DAY_MS),
            ..seeded()
        };
        let (engine, _) = engine_at(cfg);
        engine.add_rule(battery_rule());
        let ctx = context_map([("batteryLevel", "10"), ("isCharging", "false")]);
        engine.update_reward("saver", 1.0);
        engine.update_reward("saver", 1.0);
        let out = engine.decide(&ctx).unwrap();
        assert_eq!(out.phase, ColdStartPhase::Stable);
        assert_eq!(out.source, DecisionSource::RuleFallback);
        assert!((out.weights.rule + out.weights.learned - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_outlier_reward_never_reaches_learner() {
        let (engine, _) = engine_at(seeded());
        for i in 0..20 {
            let r = if i % 2 == 0 { 0.4 } else { 0.6 };
            assert!(engine.update_reward("a", r).applied_reward.is_some());
        }
        assert_eq!(engine.update_reward("a", f64::NAN).applied_reward, None);
        assert_eq!(engine.update_reward("a", 1e9).applied_reward, None);
        let stats = engine.guard_stats();
        assert_eq!(stats.rewards_rejected, 2);
        match engine.bandit_stats() {
            ArmTable::Mab(arms) => assert_eq!(arms["a"].pulls, 20),
            other => panic!("unexpected table {other:?}"),
        }
    }

    #[test]
    fn test_linucb_feedback_uses_decision_features() {
        let cfg = EngineConfig {
            bandit: BanditConfig {
                strategy: Strategy::LinUcb,
                ..BanditConfig::default()
            },
            ..EngineConfig::default()
        };
        let (engine, _) = engine_at(cfg);
        engine.add_rule(battery_rule());

        assert_eq!(engine.update_reward("saver", 1.0).applied_reward, None);

        let ctx = context_map([("batteryLevel", "10"), ("isCharging", "false")]);
        engine.decide(&ctx).unwrap();
        assert_eq!(engine.update_reward("saver", 1.0).applied_reward, Some(1.0));

        let other = context_map([("hour", "20"), ("motionState", "driving")]);
        assert!(engine.update_reward_with_context("other", 0.5, &other).applied_reward.is_some());
        assert_eq!(engine.bandit_stats().len(), 2);
    }

    #[test]
    fn test_rollback_signal_and_restore() {
        let mut cfg = seeded();
        cfg.guard.monitor_window = 5;
        cfg.guard.checkpoint_interval = 5;
        cfg.guard.reward_min_samples = 1000;
        let (engine, _) = engine_at(cfg);

        for _ in 0..5 {
            engine.update_reward("a", 1.0);
        }
        assert_eq!(engine.guard_stats().checkpoints, 1);

        let mut signal = None;
        for _ in 0..5 {
            if let Some(s) = engine.update_reward("a", -1.0).rollback {
                signal = Some(s);
            }
        }
        let signal = signal.expect("regression should be reported");
        assert_eq!(signal.baseline_average, 1.0);
        assert_eq!(engine.guard_stats().rollbacks, 1);

        assert!(engine.restore_checkpoint());
        match engine.bandit_stats() {
            ArmTable::Mab(arms) => assert_eq!(arms["a"].pulls, 5),
            other => panic!("unexpected table {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_merges_low_priority() {
        let (engine, clock) = engine_at(seeded());
        for id in ["n1", "n2", "n3"] {
            engine.add_rule(Rule::new(id, Action::new(id, id)).with_priority(0.5));
        }
        engine.add_rule(Rule::new("urgent", Action::new("u", "u")).with_priority(5.0));

        let urgent = MatchResult {
            rule_id: "urgent".into(),
            confidence: 1.0,
            action: Action::new("u", "u"),
        };
        assert_eq!(engine.dispatch(&urgent).unwrap().count(), 1);

        let mut out = Vec::new();
        for id in ["n1", "n2", "n3"] {
            clock.advance(MINUTE_MS);
            let r = MatchResult {
                rule_id: id.into(),
                confidence: 1.0,
                action: Action::new(id, id),
            };
            out.extend(engine.dispatch(&r));
        }
        assert_eq!(out.len(), 1);
        assert!(out[0].is_merged());
        assert_eq!(out[0].count(), 3);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_flush_pending_after_window() {
        let (engine, clock) = engine_at(seeded());
        engine.add_rule(Rule::new("n", Action::new("n", "n")).with_priority(0.5));
        let r = MatchResult {
            rule_id: "n".into(),
            confidence: 1.0,
            action: Action::new("n", "n"),
        };
        assert!(engine.dispatch(&r).is_none());
        assert!(engine.flush_pending().is_none());
        clock.advance(HOUR_MS);
        let d = engine.flush_pending().unwrap();
        assert!(!d.is_merged());
        assert_eq!(d.action.id, "n");
    }

    #[test]
    fn test_tray_round_trip_through_engine() {
        let (engine, clock) = engine_at(seeded());
        engine.put("batteryLevel", "15", 1.0, Some("os"));
        assert!(engine.get("batteryLevel").fresh);
        let snap = engine.snapshot();
        assert_eq!(snap.get("batteryLevel").map(String::as_str), Some("15"));
        assert!(snap.contains_key("timeOfDay"));
        engine.set_ttl("batteryLevel", MINUTE_MS);
        clock.advance(2 * MINUTE_MS);
        assert!(!engine.get("batteryLevel").fresh);
        assert_eq!(engine.tray_status().len(), 1);
    }

    #[test]
    fn test_select_action_picks_a_candidate() {
        let (engine, _) = engine_at(seeded());
        assert!(engine.select_action(&[], &ContextMap::new()).is_none());
        let sel = engine.select_action(&["a", "b"], &ContextMap::new()).unwrap();
        assert!(["a", "b"].contains(&sel.action_id.as_str()));
    }

    // ─── Motion and places ──────────────────────────────────────────────────

    fn still() -> AccelSample {
        AccelSample {
            x: 0.0,
            y: 0.0,
            z: 9.8,
            timestamp_ms: T0,
        }
    }

    #[test]
    fn test_observe_motion_feeds_tray_and_sampling() {
        let (engine, _) = engine_at(seeded());
        assert_eq!(engine.sampling_intervals(), None);

        let update = engine.observe_motion(&still(), Some(12.0));
        assert_eq!(update.reading.state, MotionState::Driving);
        let driving = update.intervals.unwrap();
        assert_eq!(driving.wifi_ms, None);
        assert_eq!(engine.sampling_intervals(), Some(driving));

        let r = engine.get("motionState");
        assert_eq!(r.value.as_deref(), Some("driving"));
        assert_eq!(r.quality, 0.85);

        // Same state again: intervals unchanged.
        assert_eq!(engine.observe_motion(&still(), Some(12.0)).intervals, None);
    }

    #[test]
    fn test_motion_state_drives_rules() {
        let (engine, _) = engine_at(seeded());
        engine.add_rule(
            Rule::new("podcast", Action::new("podcast", "media"))
                .with_condition(Condition::new("motionState", Operator::Eq, "driving")),
        );
        engine.observe_motion(&still(), Some(25.0));
        let results = engine.evaluate(&engine.snapshot(), 3);
        assert_eq!(results[0].rule_id, "podcast");
        assert_eq!(results[0].confidence, 1.0);
    }

    #[test]
    fn test_wifi_recognises_a_learned_place() {
        let (engine, clock) = engine_at(seeded());
        assert!(engine.learn_place("home", Some("HomeNet"), Some("Speaker")));
        assert!(!engine.learn_place("home", Some("HomeNet"), None));
        assert!(engine.learn_place("office", Some("Corp"), None));
        assert_eq!(engine.place_signals("home").unwrap().visits, 2);

        clock.advance(HOUR_MS);
        assert_eq!(engine.observe_wifi("HomeNet"), vec!["home".to_string()]);
        assert_eq!(engine.get("geofence").value.as_deref(), Some("home"));
        assert_eq!(engine.get("wifiSsid").value.as_deref(), Some("HomeNet"));
    }

    #[test]
    fn test_ambiguous_wifi_leaves_geofence_alone() {
        let (engine, _) = engine_at(seeded());
        engine.learn_place("office", Some("Corp"), None);
        engine.learn_place("annex", Some("Corp"), None);
        assert_eq!(engine.observe_wifi("Corp").len(), 2);
        assert_eq!(engine.get("geofence").value, None);
        assert!(engine.observe_wifi("Guest").is_empty());

        assert!(engine.forget_place("annex"));
        assert_eq!(engine.observe_wifi("Corp"), vec!["office".to_string()]);
        assert_eq!(engine.get("geofence").value.as_deref(), Some("office"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_place_signals_survive_export() {
        let (engine, _) = engine_at(seeded());
        engine.learn_place("home", Some("HomeNet"), None);
        let json = engine.export_places().unwrap();

        let (fresh, _) = engine_at(seeded());
        assert_eq!(fresh.load_places(&json).unwrap(), 1);
        assert_eq!(fresh.place_signals("home"), engine.place_signals("home"));
        assert!(fresh.load_places("[1, 2]").is_err());
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RuleEngine>();
    }
}
