//! Declarative rule model: conditions, actions, rules and match results.
//!
//! Rules are flat: an ordered list of [`Condition`]s that must all (softly)
//! hold for the rule's [`Action`] to be recommended. The engine compiles the
//! enabled rules into a [`DecisionTree`](crate::tree::DecisionTree) and scores
//! the candidates it reaches with [`soft_match`](crate::soft_match).
//!
//! ```rust
//! use context_core::rule::{Action, Condition, Operator, Rule};
//!
//! let rule = Rule::new("low-battery", Action::new("charge-reminder", "notification"))
//!     .with_condition(Condition::new("batteryLevel", Operator::Lte, "20"))
//!     .with_condition(Condition::new("isCharging", Operator::Eq, "false"))
//!     .with_priority(2.0)
//!     .with_cooldown_ms(30 * 60 * 1000);
//! assert!(rule.enabled);
//! ```

use core::fmt;

/// Flat key→value snapshot of the sensed state.
///
/// Values are strings; numeric operators parse them on demand.
pub type ContextMap = hashbrown::HashMap<String, String>;

/// Build a [`ContextMap`] from `(key, value)` pairs.
pub fn context_map<K, V, I>(pairs: I) -> ContextMap
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

// ─── Operator ───────────────────────────────────────────────────────────────

/// Comparison operator of a [`Condition`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "String", into = "String"))]
pub enum Operator {
    /// Exact string equality.
    Eq,
    /// Exact string inequality.
    Neq,
    /// Membership in a comma-delimited set.
    In,
    /// Numeric `>`.
    Gt,
    /// Numeric `>=`.
    Gte,
    /// Numeric `<`.
    Lt,
    /// Numeric `<=`.
    Lte,
    /// Numeric inclusive range, value `"lo,hi"`.
    Range,
    /// An `event:<type>` happened within the last `value` ms.
    Recent,
    /// `sequence:<A>,<B>`: A happened before B, both within the last `value` ms.
    Within,
    /// Anything else. Never matches.
    Unknown(String),
}

impl Operator {
    /// Canonical wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::In => "in",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Range => "range",
            Operator::Recent => "recent",
            Operator::Within => "within",
            Operator::Unknown(s) => s.as_str(),
        }
    }

    /// `true` for operators resolved through the event buffer.
    pub fn is_temporal(&self) -> bool {
        matches!(self, Operator::Recent | Operator::Within)
    }
}

impl From<&str> for Operator {
    fn from(s: &str) -> Self {
        match s {
            "eq" => Operator::Eq,
            "neq" => Operator::Neq,
            "in" => Operator::In,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "range" => Operator::Range,
            "recent" => Operator::Recent,
            "within" => Operator::Within,
            other => Operator::Unknown(other.to_string()),
        }
    }
}

impl From<String> for Operator {
    fn from(s: String) -> Self {
        Operator::from(s.as_str())
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Condition / Action ─────────────────────────────────────────────────────

/// A single `key op value` test against the context.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Condition {
    /// Context key, or `event:<type>` / `sequence:<A>,<B>` for temporal operators.
    pub key: String,
    /// Comparison operator.
    pub op: Operator,
    /// Operand. Numbers, sets (`"a,b"`), ranges (`"lo,hi"`) and windows (ms) are strings.
    #[cfg_attr(
        feature = "serde",
        serde(default, deserialize_with = "crate::persist::lenient_string")
    )]
    pub value: String,
}

impl Condition {
    /// Construct a condition.
    pub fn new(key: impl Into<String>, op: Operator, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op,
            value: value.into(),
        }
    }
}

/// What a rule recommends when it fires.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Action {
    /// Unique action id; also the bandit arm id.
    pub id: String,
    /// Category (e.g. `suggestion`, `automation`, `notification`), used for rate limiting.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: String,
    /// Opaque payload, usually JSON, interpreted by the host.
    pub payload: String,
}

impl Action {
    /// Construct an action with an empty payload.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload: String::new(),
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }
}

// ─── Rule ───────────────────────────────────────────────────────────────────

/// A flat rule: conditions → action, with priority and cooldown.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Rule {
    /// Unique id within the active rule set.
    pub id: String,
    /// Human-readable name.
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
    /// Conditions, evaluated in order. Empty means "always matches".
    #[cfg_attr(feature = "serde", serde(default))]
    pub conditions: Vec<Condition>,
    /// Recommended action.
    #[cfg_attr(feature = "serde", serde(default))]
    pub action: Action,
    /// Sort weight; higher is more important.
    #[cfg_attr(feature = "serde", serde(default = "default_priority"))]
    pub priority: f64,
    /// Minimum interval between two firings of this rule.
    #[cfg_attr(feature = "serde", serde(default))]
    pub cooldown_ms: i64,
    /// Disabled rules stay stored but are left out of the compiled tree.
    #[cfg_attr(feature = "serde", serde(default = "default_enabled"))]
    pub enabled: bool,
}

#[cfg(feature = "serde")]
fn default_priority() -> f64 {
    1.0
}

#[cfg(feature = "serde")]
fn default_enabled() -> bool {
    true
}

impl Rule {
    /// New enabled rule with priority 1.0, no cooldown and no conditions.
    pub fn new(id: impl Into<String>, action: Action) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            conditions: Vec::new(),
            action,
            priority: 1.0,
            cooldown_ms: 0,
            enabled: true,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append a condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Set the priority weight.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the cooldown.
    pub fn with_cooldown_ms(mut self, cooldown_ms: i64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ─── MatchResult ────────────────────────────────────────────────────────────

/// One rule that matched an evaluation. Never persisted.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct MatchResult {
    /// Id of the matching rule.
    pub rule_id: String,
    /// Product of the condition confidences, in [0, 1].
    pub confidence: f64,
    /// The rule's action.
    pub action: Action,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_round_trips_through_str() {
        for name in ["eq", "neq", "in", "gt", "gte", "lt", "lte", "range", "recent", "within"] {
            let op = Operator::from(name);
            assert!(!matches!(op, Operator::Unknown(_)), "{name} parsed as unknown");
            assert_eq!(op.as_str(), name);
        }
        assert_eq!(Operator::from("between"), Operator::Unknown("between".into()));
    }

    #[test]
    fn test_temporal_operators() {
        assert!(Operator::Recent.is_temporal());
        assert!(Operator::Within.is_temporal());
        assert!(!Operator::Range.is_temporal());
    }

    #[test]
    fn test_builder_sets_fields() {
        let rule = Rule::new("r1", Action::new("a1", "suggestion").with_payload("{}"))
            .with_name("Morning")
            .with_condition(Condition::new("hour", Operator::Range, "7,8"))
            .with_priority(3.0)
            .with_cooldown_ms(1_000)
            .with_enabled(false);
        assert_eq!(rule.name, "Morning");
        assert_eq!(rule.conditions.len(), 1);
        assert_eq!(rule.action.payload, "{}");
        assert_eq!(rule.priority, 3.0);
        assert_eq!(rule.cooldown_ms, 1_000);
        assert!(!rule.enabled);
    }

    #[test]
    fn test_context_map_from_pairs() {
        let ctx = context_map([("hour", "7"), ("isWeekend", "false")]);
        assert_eq!(ctx.get("hour").map(String::as_str), Some("7"));
        assert_eq!(ctx.len(), 2);
    }
}
