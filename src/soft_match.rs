//! Soft matching: each condition yields a confidence in [0.0, 1.0] instead of
//! a boolean.
//!
//! | Operator | Match | Miss | Key missing |
//! |---|---|---|---|
//! | `eq` / `neq` | 1.0 | 0.0 | 0.5 |
//! | `in` | 1.0 | 0.0 | 0.5 |
//! | `gt` `gte` `lt` `lte` | 1.0 | linear decay over `max(10% × threshold, 1)` | 0.5 |
//! | `range` | 1.0 | linear decay over `max(10% × span, 1)` | 0.5 |
//! | `recent` / `within` | 1.0 | 0.0 | n/a (event buffer) |
//!
//! Missing data means uncertainty, so it is never penalised below 0.5.

use crate::rule::{Condition, ContextMap, Operator};

/// Confidence returned for a condition whose key is absent from the context.
pub const MISSING_CONFIDENCE: f64 = 0.5;

/// Running product below which rule evaluation stops early.
pub const SHORT_CIRCUIT: f64 = 0.01;

/// Answers temporal questions for `recent` / `within` conditions.
///
/// Implemented by [`EventBuffer`](crate::events::EventBuffer).
pub trait TemporalSource {
    /// An event of `event_type` happened less than `window_ms` ago.
    fn has_recent(&self, event_type: &str, window_ms: i64) -> bool;
    /// An `a` happened strictly before the latest `b`, both less than `window_ms` ago.
    fn has_sequence(&self, a: &str, b: &str, window_ms: i64) -> bool;
}

/// A temporal source with no history. Every temporal condition scores 0.0.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoEvents;

impl TemporalSource for NoEvents {
    fn has_recent(&self, _: &str, _: i64) -> bool {
        false
    }
    fn has_sequence(&self, _: &str, _: &str, _: i64) -> bool {
        false
    }
}

fn parse_num(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn csv(s: &str) -> impl Iterator<Item = &str> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty())
}

/// Linear decay: 1.0 at distance 0, 0.0 at distance ≥ margin.
fn decay(distance: f64, margin: f64) -> f64 {
    (1.0 - distance / margin).max(0.0)
}

/// Score a non-temporal condition against the context.
///
/// Temporal operators score 0.0 here; use [`match_condition`] to resolve
/// them against an event history.
pub fn soft_match(cond: &Condition, ctx: &ContextMap) -> f64 {
    let actual = match ctx.get(&cond.key) {
        Some(v) => v.as_str(),
        None => {
            return match cond.op {
                Operator::Recent | Operator::Within | Operator::Unknown(_) => 0.0,
                _ => MISSING_CONFIDENCE,
            }
        }
    };

    match &cond.op {
        Operator::Eq => bool_score(actual == cond.value),
        Operator::Neq => bool_score(actual != cond.value),
        Operator::In => bool_score(csv(&cond.value).any(|opt| opt == actual)),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let (Some(a), Some(t)) = (parse_num(actual), parse_num(&cond.value)) else {
                // Not numeric on one side: fall back to exact equality.
                return bool_score(actual == cond.value);
            };
            let margin = (t.abs() * 0.1).max(1.0);
            let holds = match cond.op {
                Operator::Gt => a > t,
                Operator::Gte => a >= t,
                Operator::Lt => a < t,
                _ => a <= t,
            };
            if holds {
                1.0
            } else {
                decay((a - t).abs(), margin)
            }
        }
        Operator::Range => {
            let Some(a) = parse_num(actual) else {
                return 0.0;
            };
            let mut bounds = csv(&cond.value).map(parse_num);
            let (Some(Some(lo)), Some(Some(hi)), None) =
                (bounds.next(), bounds.next(), bounds.next())
            else {
                return 0.0;
            };
            if a >= lo && a <= hi {
                return 1.0;
            }
            let distance = if a < lo { lo - a } else { a - hi };
            decay(distance, ((hi - lo) * 0.1).max(1.0))
        }
        Operator::Recent | Operator::Within | Operator::Unknown(_) => 0.0,
    }
}

/// Score any condition, resolving temporal operators through `events`.
///
/// `recent` expects key `event:<type>`; `within` expects key
/// `sequence:<A>,<B>`. The value is the window in ms. Malformed temporal
/// conditions score 0.0.
pub fn match_condition<T: TemporalSource + ?Sized>(
    cond: &Condition,
    ctx: &ContextMap,
    events: &T,
) -> f64 {
    match cond.op {
        Operator::Recent => {
            let (Some(event_type), Some(window)) =
                (temporal_body(&cond.key, "event:"), parse_window(&cond.value))
            else {
                return 0.0;
            };
            bool_score(events.has_recent(event_type, window))
        }
        Operator::Within => {
            let (Some(body), Some(window)) =
                (temporal_body(&cond.key, "sequence:"), parse_window(&cond.value))
            else {
                return 0.0;
            };
            match body.split_once(',') {
                Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => {
                    bool_score(events.has_sequence(a.trim(), b.trim(), window))
                }
                _ => 0.0,
            }
        }
        _ => soft_match(cond, ctx),
    }
}

/// Combined confidence of a condition list: the product of each score,
/// stopping once it falls below [`SHORT_CIRCUIT`].
///
/// An empty list scores 1.0 (an unconditional rule).
pub fn rule_confidence<T: TemporalSource + ?Sized>(
    conditions: &[Condition],
    ctx: &ContextMap,
    events: &T,
) -> f64 {
    let mut confidence = 1.0;
    for cond in conditions {
        confidence *= match_condition(cond, ctx, events);
        if confidence < SHORT_CIRCUIT {
            break;
        }
    }
    confidence
}

fn bool_score(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn temporal_body<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

fn parse_window(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok().filter(|w| *w >= 0)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::context_map;

    fn cond(key: &str, op: Operator, value: &str) -> Condition {
        Condition::new(key, op, value)
    }

    struct FixedEvents {
        recent: bool,
        sequence: bool,
    }

    impl TemporalSource for FixedEvents {
        fn has_recent(&self, _: &str, _: i64) -> bool {
            self.recent
        }
        fn has_sequence(&self, _: &str, _: &str, _: i64) -> bool {
            self.sequence
        }
    }

    #[test]
    fn test_eq_missing_match_mismatch() {
        let ctx = context_map([("motionState", "walking")]);
        assert_eq!(soft_match(&cond("motionState", Operator::Eq, "walking"), &ctx), 1.0);
        assert_eq!(soft_match(&cond("motionState", Operator::Eq, "driving"), &ctx), 0.0);
        assert_eq!(soft_match(&cond("geofence", Operator::Eq, "home"), &ctx), 0.5);
    }

    #[test]
    fn test_eq_holds_for_many_keys_and_values() {
        for i in 0..50 {
            let key = format!("k{i}");
            let value = format!("v{}", i * 7 % 13);
            let ctx = context_map([(key.clone(), value.clone())]);
            assert_eq!(soft_match(&cond(&key, Operator::Eq, &value), &ctx), 1.0);
            assert_eq!(soft_match(&cond(&key, Operator::Eq, "other"), &ctx), 0.0);
            assert_eq!(soft_match(&cond("absent", Operator::Eq, &value), &ctx), 0.5);
        }
    }

    #[test]
    fn test_neq_is_complement() {
        let ctx = context_map([("networkType", "wifi")]);
        assert_eq!(soft_match(&cond("networkType", Operator::Neq, "wifi"), &ctx), 0.0);
        assert_eq!(soft_match(&cond("networkType", Operator::Neq, "cellular"), &ctx), 1.0);
        assert_eq!(soft_match(&cond("missing", Operator::Neq, "x"), &ctx), 0.5);
    }

    #[test]
    fn test_in_set_membership_trims_whitespace() {
        let ctx = context_map([("motionState", "driving")]);
        assert_eq!(soft_match(&cond("motionState", Operator::In, "walking, driving"), &ctx), 1.0);
        assert_eq!(soft_match(&cond("motionState", Operator::In, "walking,running"), &ctx), 0.0);
        assert_eq!(soft_match(&cond("absent", Operator::In, "a,b"), &ctx), 0.5);
    }

    #[test]
    fn test_numeric_comparisons_decay_outside() {
        let ctx = context_map([("batteryLevel", "21")]);
        // margin = max(2.0, 1.0) = 2.0, distance 1 → 0.5
        let s = soft_match(&cond("batteryLevel", Operator::Lte, "20"), &ctx);
        assert!((s - 0.5).abs() < 1e-9, "got {s}");
        assert_eq!(soft_match(&cond("batteryLevel", Operator::Lte, "21"), &ctx), 1.0);
        assert_eq!(soft_match(&cond("batteryLevel", Operator::Lt, "30"), &ctx), 1.0);
        assert_eq!(soft_match(&cond("batteryLevel", Operator::Gt, "50"), &ctx), 0.0);
        // gt threshold 22, margin max(2.2,1)=2.2, distance 1
        let s = soft_match(&cond("batteryLevel", Operator::Gt, "22"), &ctx);
        assert!((s - (1.0 - 1.0 / 2.2)).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn test_small_thresholds_use_unit_margin() {
        let ctx = context_map([("x", "0.5")]);
        // threshold 0 → margin 1.0, distance 0.5
        let s = soft_match(&cond("x", Operator::Lte, "0"), &ctx);
        assert!((s - 0.5).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn test_non_numeric_comparison_falls_back_to_equality() {
        let ctx = context_map([("level", "high")]);
        assert_eq!(soft_match(&cond("level", Operator::Gt, "high"), &ctx), 1.0);
        assert_eq!(soft_match(&cond("level", Operator::Gt, "10"), &ctx), 0.0);
    }

    #[test]
    fn test_range_inside_and_decay() {
        let ctx = context_map([("hour", "7.5")]);
        assert_eq!(soft_match(&cond("hour", Operator::Range, "7,8"), &ctx), 1.0);
        let ctx = context_map([("hour", "8.5")]);
        // span 1 → margin 1.0, distance 0.5
        let s = soft_match(&cond("hour", Operator::Range, "7,8"), &ctx);
        assert!((s - 0.5).abs() < 1e-9, "got {s}");
        let ctx = context_map([("hour", "12")]);
        assert_eq!(soft_match(&cond("hour", Operator::Range, "7,8"), &ctx), 0.0);
    }

    #[test]
    fn test_range_wide_span_margin() {
        let ctx = context_map([("temp", "95")]);
        // span 100 → margin 10, distance 5 below lo=100
        let s = soft_match(&cond("temp", Operator::Range, "100,200"), &ctx);
        assert!((s - 0.5).abs() < 1e-9, "got {s}");
    }

    #[test]
    fn test_range_malformed_scores_zero() {
        let ctx = context_map([("hour", "7")]);
        assert_eq!(soft_match(&cond("hour", Operator::Range, "7"), &ctx), 0.0);
        assert_eq!(soft_match(&cond("hour", Operator::Range, "a,b"), &ctx), 0.0);
        assert_eq!(soft_match(&cond("hour", Operator::Range, "1,2,3"), &ctx), 0.0);
        assert_eq!(soft_match(&cond("missing", Operator::Range, "1,2"), &ctx), 0.5);
    }

    #[test]
    fn test_temporal_resolved_through_source() {
        let ctx = ContextMap::new();
        let yes = FixedEvents { recent: true, sequence: true };
        let no = FixedEvents { recent: false, sequence: false };
        let recent = cond("event:geofence_enter", Operator::Recent, "60000");
        let seq = cond("sequence:wifi_lost,geofence_exit", Operator::Within, "60000");
        assert_eq!(match_condition(&recent, &ctx, &yes), 1.0);
        assert_eq!(match_condition(&recent, &ctx, &no), 0.0);
        assert_eq!(match_condition(&seq, &ctx, &yes), 1.0);
        assert_eq!(match_condition(&seq, &ctx, &no), 0.0);
    }

    #[test]
    fn test_malformed_temporal_scores_zero() {
        let ctx = ContextMap::new();
        let yes = FixedEvents { recent: true, sequence: true };
        assert_eq!(match_condition(&cond("geofence_enter", Operator::Recent, "10"), &ctx, &yes), 0.0);
        assert_eq!(match_condition(&cond("event:x", Operator::Recent, "soon"), &ctx, &yes), 0.0);
        assert_eq!(match_condition(&cond("sequence:a", Operator::Within, "10"), &ctx, &yes), 0.0);
        assert_eq!(match_condition(&cond("sequence:a,", Operator::Within, "10"), &ctx, &yes), 0.0);
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        let ctx = context_map([("k", "v")]);
        assert_eq!(soft_match(&cond("k", Operator::from("like"), "v"), &ctx), 0.0);
    }

    #[test]
    fn test_confidence_is_product_and_non_increasing() {
        let ctx = context_map([("batteryLevel", "21"), ("isCharging", "false")]);
        let conds = vec![
            cond("batteryLevel", Operator::Lte, "20"),
            cond("isCharging", Operator::Eq, "false"),
            cond("geofence", Operator::Eq, "home"),
        ];
        let mut previous = 1.0;
        let mut product = 1.0;
        for n in 1..=conds.len() {
            let c = rule_confidence(&conds[..n], &ctx, &NoEvents);
            product *= soft_match(&conds[n - 1], &ctx);
            assert!((c - product).abs() < 1e-12, "n={n} c={c} product={product}");
            assert!(c <= previous + 1e-12, "confidence increased at n={n}");
            previous = c;
        }
        assert!((previous - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_short_circuit_stops_below_threshold() {
        let ctx = context_map([("a", "1")]);
        let conds = vec![cond("a", Operator::Eq, "2"), cond("b", Operator::Eq, "x")];
        assert_eq!(rule_confidence(&conds, &ctx, &NoEvents), 0.0);
    }

    #[test]
    fn test_empty_conditions_always_match() {
        assert_eq!(rule_confidence(&[], &ContextMap::new(), &NoEvents), 1.0);
    }
}
