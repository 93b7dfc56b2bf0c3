//! # A Commuter's Day
//!
//! Drives a [`RuleEngine`] through one simulated weekday on a manual clock:
//! sensor readings land in the tray, events are recorded, rules are
//! evaluated and blended with the learner, low-priority nudges are merged,
//! and user feedback is fed back as rewards.
//!
//! ```bash
//! RUST_LOG=context_core=debug cargo run --example commute_day
//! ```

use std::sync::Arc;

use context_core::bandit::BanditConfig;
use context_core::clock::{Clock, ManualClock, DAY_MS, HOUR_MS, MINUTE_MS};
use context_core::motion::AccelSample;
use context_core::{context_map, Action, Condition, ContextMap, EngineConfig, Operator, Rule, RuleEngine};
use tracing_subscriber::EnvFilter;

// 2025-06-18 05:00 UTC, a Wednesday.
const DAWN: i64 = 1_750_222_800_000;

fn rules() -> Vec<Rule> {
    vec![
        Rule::new("morning-commute", Action::new("traffic", "suggestion"))
            .with_name("Morning commute")
            .with_condition(Condition::new("hour", Operator::Range, "7,9"))
            .with_condition(Condition::new("isWeekend", Operator::Eq, "false"))
            .with_condition(Condition::new("motionState", Operator::In, "walking,driving"))
            .with_priority(2.0)
            .with_cooldown_ms(2 * HOUR_MS),
        Rule::new("podcast", Action::new("podcast", "media"))
            .with_condition(Condition::new("motionState", Operator::Eq, "driving"))
            .with_condition(Condition::new("headphones", Operator::Eq, "true"))
            .with_priority(0.8),
        Rule::new("news", Action::new("news", "info")).with_priority(0.5),
        Rule::new("weather", Action::new("weather", "info"))
            .with_condition(Condition::new("timeOfDay", Operator::In, "morning,evening"))
            .with_priority(0.5),
        Rule::new("low-battery", Action::new("saver", "alert"))
            .with_condition(Condition::new("batteryLevel", Operator::Lte, "20"))
            .with_condition(Condition::new("isCharging", Operator::Eq, "false"))
            .with_priority(3.0),
        Rule::new("wind-down", Action::new("dim-screen", "suggestion"))
            .with_condition(Condition::new("hour", Operator::Gte, "22"))
            .with_condition(Condition::new(
                "sequence:arrivedHome,chargerConnected",
                Operator::Within,
                (2 * HOUR_MS).to_string(),
            )),
    ]
}

fn header(title: &str) {
    println!("\n── {title} {}", "─".repeat(60usize.saturating_sub(title.len())));
}

fn with_overrides(mut ctx: ContextMap, overrides: &[(&str, &str)]) -> ContextMap {
    for (k, v) in overrides {
        ctx.insert((*k).to_string(), (*v).to_string());
    }
    ctx
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("context_core=info")))
        .init();

    let clock = Arc::new(ManualClock::new(DAWN));
    let config = EngineConfig {
        install_time_ms: Some(DAWN - 20 * DAY_MS),
        bandit: BanditConfig {
            seed: Some(2025),
            ..BanditConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = RuleEngine::with_clock(config, clock.clone());
    engine.load_rules(rules());
    println!(
        "{} rules loaded, phase {} (rule weight {:.2})",
        engine.rule_count(),
        engine.phase().as_str(),
        engine.blend_weights().rule
    );

    // ── 07:30 leaving the house ─────────────────────────────────────────────
    clock.advance(2 * HOUR_MS + 30 * MINUTE_MS);
    header("07:30 leaving the house");
    engine.put("batteryLevel", "64", 1.0, Some("battery"));
    engine.put("isCharging", "false", 1.0, Some("battery"));
    engine.put("motionState", "walking", 0.8, Some("activity"));
    engine.push_event_now("leftHome", context_map([("geofence", "home")]));

    // `decide` evaluates first, which records the winning rule as fired.
    let ctx = with_overrides(engine.snapshot(), &[("hour", "7.5")]);
    if let Some(out) = engine.decide(&ctx) {
        println!(
            "  decide {} via {:?} (conf {:.2}, weights {:.2}/{:.2})",
            out.result.action.id, out.source, out.confidence, out.weights.rule, out.weights.learned
        );
        if let Some(d) = engine.dispatch(&out.result) {
            println!("  deliver {} [{:?}]", d.action.id, d.priority);
        }
        engine.update_reward_with_context(&out.result.action.id, 1.0, &ctx);
    }

    // ── 07:50 driving, headphones in ────────────────────────────────────────
    clock.advance(20 * MINUTE_MS);
    header("07:50 driving");
    let motion = engine.observe_motion(
        &AccelSample {
            x: 0.3,
            y: 0.2,
            z: 9.8,
            timestamp_ms: clock.now_ms(),
        },
        Some(14.0),
    );
    println!(
        "  motion {} (conf {:.2}), gps every {}s",
        motion.reading.state.as_str(),
        motion.reading.confidence,
        motion.intervals.map_or(0, |i| i.gps_ms / 1000)
    );
    engine.put("headphones", "true", 1.0, None);
    let ctx = with_overrides(engine.snapshot(), &[("hour", "7.8")]);
    let results = engine.evaluate(&ctx, 5);
    println!("  commute suppressed by cooldown: {}", !results.iter().any(|r| r.rule_id == "morning-commute"));
    for r in &results {
        if let Some(d) = engine.dispatch(r) {
            println!("  deliver {} ({} item(s))", d.action.id, d.count());
        }
        clock.advance(MINUTE_MS);
    }
    println!("  queued for merge: {}", engine.pending_count());

    clock.advance(10 * MINUTE_MS);
    if let Some(d) = engine.flush_pending() {
        println!("  flushed {} carrying {:?}", d.action.id, d.rule_ids);
    }

    // Feedback: the user listened to the podcast, swiped the news away.
    engine.update_reward_with_context("podcast", 1.0, &ctx);
    engine.update_reward_with_context("news", 0.0, &ctx);

    // ── 16:00 battery running low ───────────────────────────────────────────
    clock.advance(8 * HOUR_MS);
    header("16:00 battery low");
    engine.put("batteryLevel", "14", 1.0, Some("battery"));
    engine.put("motionState", "still", 0.9, Some("activity"));
    let ctx = with_overrides(engine.snapshot(), &[("hour", "16")]);
    if let Some(out) = engine.decide(&ctx) {
        println!("  decide {} via {:?}", out.result.rule_id, out.source);
        if let Some(d) = engine.dispatch(&out.result) {
            println!("  deliver {} immediately [{:?}]", d.action.id, d.priority);
        }
    }

    // ── 22:30 home, charging ────────────────────────────────────────────────
    clock.advance(6 * HOUR_MS);
    header("22:30 winding down");
    engine.learn_place("home", Some("HomeNet"), None);
    println!("  wifi places: {:?}", engine.observe_wifi("HomeNet"));
    engine.push_event_now("arrivedHome", context_map([("geofence", "home")]));
    clock.advance(30 * MINUTE_MS);
    engine.push_event_now("chargerConnected", ContextMap::new());
    engine.put("isCharging", "true", 1.0, Some("battery"));
    let ctx = with_overrides(engine.snapshot(), &[("hour", "22.5")]);
    for r in engine.evaluate(&ctx, 3) {
        println!("  match {:<16} conf {:.2}", r.rule_id, r.confidence);
    }

    // ── the sensor tray after a long quiet spell ────────────────────────────
    clock.advance(2 * HOUR_MS);
    header("tray status");
    for slot in engine.tray_status() {
        println!(
            "  {:<14} fresh {:<5} quality {:.2} age {:>6}s ({})",
            slot.key,
            slot.fresh,
            slot.effective_quality,
            slot.age_ms / 1000,
            slot.source
        );
    }

    header("guard");
    let stats = engine.guard_stats();
    println!("  {stats:?}");
    println!("  {} events buffered, strategy {:?}", engine.event_count(), engine.strategy());
}
