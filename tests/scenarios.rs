//! End-to-end decision scenarios driven through [`RuleEngine`].
//!
//! Each test builds an engine on a [`ManualClock`] so time-dependent
//! behaviour (cooldowns, merge windows, cold-start phase) is exact.

use std::sync::Arc;

use context_core::bandit::{BanditConfig, Strategy};
use context_core::clock::{ManualClock, DAY_MS, MINUTE_MS};
use context_core::cold_start::{blend, BlendWeights, ColdStartPhase, Decision, DecisionSource};
use context_core::rate_limit::MERGED_SUMMARY;
use context_core::{context_map, Action, Condition, EngineConfig, MatchResult, Operator, Rule, RuleEngine};

// ─── helpers ─────────────────────────────────────────────────────────────────

const NOW: i64 = 1_760_000_000_000;

fn engine_with(config: EngineConfig) -> (RuleEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW));
    (RuleEngine::with_clock(config, clock.clone()), clock)
}

fn engine() -> (RuleEngine, Arc<ManualClock>) {
    engine_with(EngineConfig {
        bandit: BanditConfig {
            seed: Some(42),
            ..BanditConfig::default()
        },
        ..EngineConfig::default()
    })
}

fn commute_rule() -> Rule {
    Rule::new("morning-commute", Action::new("traffic", "suggestion"))
        .with_name("Morning commute")
        .with_condition(Condition::new("hour", Operator::Range, "7,8"))
        .with_condition(Condition::new("isWeekend", Operator::Eq, "false"))
        .with_condition(Condition::new("motionState", Operator::In, "walking,driving"))
}

fn battery_rule() -> Rule {
    Rule::new("low-battery", Action::new("saver", "alert"))
        .with_condition(Condition::new("batteryLevel", Operator::Lte, "20"))
        .with_condition(Condition::new("isCharging", Operator::Eq, "false"))
}

// ─── scenario 1: full match ──────────────────────────────────────────────────

#[test]
fn test_commute_full_match() {
    let (engine, _) = engine();
    engine.add_rule(commute_rule());
    let ctx = context_map([("hour", "7.5"), ("isWeekend", "false"), ("motionState", "walking")]);
    let results = engine.evaluate(&ctx, 5);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].rule_id, "morning-commute");
    assert_eq!(results[0].confidence, 1.0);
    assert_eq!(results[0].action.id, "traffic");
}

// ─── scenario 2: one reading missing ─────────────────────────────────────────

#[test]
fn test_commute_missing_motion_scores_half() {
    let (engine, _) = engine();
    engine.add_rule(commute_rule());
    let ctx = context_map([("hour", "7.5"), ("isWeekend", "false")]);
    let results = engine.evaluate(&ctx, 5);
    assert_eq!(results.len(), 1, "rule must stay reachable with a missing split key");
    assert_eq!(results[0].confidence, 0.5);
}

// ─── scenario 3: numeric near miss ───────────────────────────────────────────

#[test]
fn test_battery_near_miss_is_partial() {
    let (engine, _) = engine();
    engine.add_rule(battery_rule());
    let ctx = context_map([("batteryLevel", "21"), ("isCharging", "false")]);
    let results = engine.evaluate(&ctx, 5);
    assert_eq!(results.len(), 1);
    // One unit past a threshold of 20: margin 2, so the score halves.
    let c = results[0].confidence;
    assert_eq!(c, 0.5);

    let closer = context_map([("batteryLevel", "20.5"), ("isCharging", "false")]);
    let c2 = engine.evaluate(&closer, 5)[0].confidence;
    assert!(c2 > c && c2 < 1.0, "closer miss scored {c2}");
}

// ─── scenario 4: merge-push ──────────────────────────────────────────────────

#[test]
fn test_three_low_priority_actions_merge() {
    let (engine, clock) = engine();
    for id in ["news", "weather", "podcast"] {
        engine.add_rule(Rule::new(id, Action::new(id, "info")).with_priority(0.5));
    }

    let mut delivered = Vec::new();
    for id in ["news", "weather", "podcast"] {
        let result = MatchResult {
            rule_id: id.to_string(),
            confidence: 0.9,
            action: Action::new(id, "info"),
        };
        delivered.extend(engine.dispatch(&result));
        clock.advance(MINUTE_MS);
    }

    assert_eq!(delivered.len(), 1);
    let summary = &delivered[0];
    assert_eq!(summary.action.id, MERGED_SUMMARY);
    assert_eq!(summary.action.kind, MERGED_SUMMARY);
    assert_eq!(summary.count(), 3);
    let payload: serde_json::Value = serde_json::from_str(&summary.action.payload).unwrap();
    assert_eq!(payload["count"], 3);
}

#[test]
fn test_high_priority_is_never_merged() {
    let (engine, _) = engine();
    engine.add_rule(Rule::new("fall", Action::new("sos", "alert")).with_priority(3.0));
    let result = MatchResult {
        rule_id: "fall".into(),
        confidence: 1.0,
        action: Action::new("sos", "alert"),
    };
    for _ in 0..5 {
        let d = engine.dispatch(&result).expect("high priority passes straight through");
        assert!(!d.is_merged());
    }
    assert_eq!(engine.pending_count(), 0);
}

// ─── scenario 5: stable phase, unsure learner ────────────────────────────────

#[test]
fn test_stable_phase_low_learned_confidence_falls_back() {
    let weights = BlendWeights::at_days(100.0);
    for rule_conf in [0.0, 0.2, 0.9, 1.0] {
        let out = blend(
            Some(Decision {
                item: "rule",
                confidence: rule_conf,
            }),
            Some(Decision {
                item: "learned",
                confidence: 0.2,
            }),
            weights,
        )
        .unwrap();
        assert_eq!(out.source, DecisionSource::RuleFallback);
        assert_eq!(out.item, "rule");
    }
}

#[test]
fn test_engine_decide_falls_back_after_100_days() {
    let (engine, _) = engine_with(EngineConfig {
        install_time_ms: Some(NOW - 100 * DAY_MS),
        bandit: BanditConfig {
            strategy: Strategy::EpsilonGreedy,
            seed: Some(7),
            ..BanditConfig::default()
        },
        ..EngineConfig::default()
    });
    engine.add_rule(battery_rule());
    // Two pulls: learned confidence 2 / 12.
    engine.update_reward("saver", 1.0);
    engine.update_reward("saver", 1.0);
    let ctx = context_map([("batteryLevel", "5"), ("isCharging", "false")]);
    let out = engine.decide(&ctx).unwrap();
    assert_eq!(out.phase, ColdStartPhase::Stable);
    assert_eq!(out.source, DecisionSource::RuleFallback);
    assert_eq!(out.result.rule_id, "low-battery");
    assert!(out.weights.rule > 0.1);
}

#[test]
fn test_untrained_linucb_defers_to_rules_when_stable() {
    let (engine, _) = engine_with(EngineConfig {
        install_time_ms: Some(NOW - 100 * DAY_MS),
        bandit: BanditConfig {
            strategy: Strategy::LinUcb,
            seed: Some(7),
            ..BanditConfig::default()
        },
        ..EngineConfig::default()
    });
    engine.add_rule(battery_rule());
    let ctx = context_map([("batteryLevel", "5"), ("isCharging", "false"), ("hour", "9")]);
    let out = engine.decide(&ctx).unwrap();
    assert!(engine.bandit_stats().is_empty());
    assert_eq!(out.phase, ColdStartPhase::Stable);
    assert_eq!(out.source, DecisionSource::RuleFallback);
    assert_eq!(out.result.rule_id, "low-battery");
}

// ─── tray → evaluate ─────────────────────────────────────────────────────────

#[test]
fn test_tray_snapshot_feeds_evaluation() {
    let (engine, clock) = engine();
    engine.add_rule(battery_rule());
    engine.put("batteryLevel", "12", 1.0, None);
    engine.put("isCharging", "false", 1.0, None);

    let results = engine.evaluate(&engine.snapshot(), 1);
    assert_eq!(results[0].confidence, 1.0);

    clock.advance(20 * MINUTE_MS);
    let reading = engine.get("batteryLevel");
    assert!(!reading.fresh);
    assert_eq!(reading.quality, 0.0);
}
