//! JSON persistence for rule sets and bandit statistics.
//!
//! Both documents are plain JSON so a host app can keep them in whatever
//! store it already has. Loading is forgiving: a document that is not an
//! array (or not an object, for snapshots) is an error, but a single bad
//! entry inside it is logged and skipped.
//!
//! # Bandit snapshot layout
//!
//! ```text
//! {
//!   "version": 1,
//!   "strategy": "epsilon_greedy" | "lin_ucb",
//!   "dim": 10,
//!   "arms": [
//!     { "id": "nudge", "pulls": 12, "totalReward": 7.5, "avg": 0.625 },   // ε-greedy
//!     { "id": "nudge", "pulls": 12, "a": [[..]; dim], "b": [..; dim] }     // LinUCB
//!   ]
//! }
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::bandit::{ArmStats, ArmTable, InverseMode, LinArm, Strategy};
use crate::error::EngineError;
use crate::rule::Rule;
use crate::vocabulary::FEATURE_DIM;

/// Current bandit snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

// ─── Condition values ───────────────────────────────────────────────────────

/// Deserialize a condition value written as a string, number, bool, null or
/// array of scalars. Arrays join with `,`, the list form `in` and `range`
/// read.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        other => scalar_text(&other),
    })
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ─── Rules ──────────────────────────────────────────────────────────────────

/// Serialize a rule set as a JSON array.
pub fn export_rules(rules: &[Rule]) -> Result<String, EngineError> {
    Ok(serde_json::to_string(rules)?)
}

/// Parse a JSON array of rules. Entries that fail to parse are skipped.
pub fn import_rules(json: &str) -> Result<Vec<Rule>, EngineError> {
    let doc: Value = serde_json::from_str(json)?;
    let Value::Array(entries) = doc else {
        return Err(EngineError::NotAnArray("rules"));
    };
    let total = entries.len();
    let rules: Vec<Rule> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match serde_json::from_value::<Rule>(entry) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(index = i, error = %e, "skipping malformed rule");
                None
            }
        })
        .collect();
    if rules.len() < total {
        warn!(loaded = rules.len(), total, "rule import skipped entries");
    }
    Ok(rules)
}

// ─── Bandit statistics ──────────────────────────────────────────────────────

/// Portable copy of a bandit's arm table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BanditSnapshot {
    /// Format version, [`SNAPSHOT_VERSION`] when written by this build.
    pub version: u16,
    /// [`Strategy::as_str`] of the learner that wrote it.
    pub strategy: String,
    /// Feature dimension of LinUCB records.
    pub dim: usize,
    /// One record per arm; see the module docs for the shapes.
    pub arms: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MabRecord {
    id: String,
    pulls: u64,
    total_reward: f64,
    #[serde(default, skip_deserializing)]
    avg: f64,
}

#[derive(Serialize, Deserialize)]
struct LinRecord {
    id: String,
    pulls: u64,
    a: Vec<Vec<f64>>,
    b: Vec<f64>,
}

impl BanditSnapshot {
    /// Capture `table`. Arms are written in id order.
    pub fn from_table(table: &ArmTable) -> Result<Self, EngineError> {
        let (strategy, mut arms) = match table {
            ArmTable::Mab(m) => {
                let records = m
                    .iter()
                    .map(|(id, s)| {
                        serde_json::to_value(MabRecord {
                            id: id.clone(),
                            pulls: s.pulls,
                            total_reward: s.total_reward,
                            avg: if s.pulls == 0 { 0.0 } else { s.average() },
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (Strategy::EpsilonGreedy, records)
            }
            ArmTable::Lin(m) => {
                let records = m
                    .iter()
                    .map(|(id, arm)| {
                        serde_json::to_value(LinRecord {
                            id: id.clone(),
                            pulls: arm.pulls,
                            a: arm.a.iter().map(|row| row.to_vec()).collect(),
                            b: arm.b.to_vec(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (Strategy::LinUcb, records)
            }
        };
        arms.sort_by(|x, y| x["id"].as_str().cmp(&y["id"].as_str()));
        Ok(Self {
            version: SNAPSHOT_VERSION,
            strategy: strategy.as_str().to_owned(),
            dim: FEATURE_DIM,
            arms,
        })
    }

    /// Rebuild an arm table for a learner running `expected`.
    ///
    /// Version, strategy and dimension are checked up front; individual
    /// records that fail to parse or have the wrong shape are skipped.
    pub fn into_table(self, expected: Strategy, mode: InverseMode) -> Result<ArmTable, EngineError> {
        if self.version > SNAPSHOT_VERSION {
            return Err(EngineError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        if self.strategy != expected.as_str() {
            return Err(EngineError::StrategyMismatch {
                expected: expected.as_str(),
                found: self.strategy,
            });
        }
        match expected {
            Strategy::EpsilonGreedy => {
                let mut arms = HashMap::with_capacity(self.arms.len());
                for (i, raw) in self.arms.into_iter().enumerate() {
                    match serde_json::from_value::<MabRecord>(raw) {
                        Ok(r) if r.total_reward.is_finite() => {
                            arms.insert(
                                r.id,
                                ArmStats {
                                    pulls: r.pulls,
                                    total_reward: r.total_reward,
                                },
                            );
                        }
                        Ok(r) => warn!(index = i, id = %r.id, "skipping arm with non-finite reward"),
                        Err(e) => warn!(index = i, error = %e, "skipping malformed arm record"),
                    }
                }
                Ok(ArmTable::Mab(arms))
            }
            Strategy::LinUcb => {
                if self.dim != FEATURE_DIM {
                    return Err(EngineError::DimensionMismatch {
                        expected: FEATURE_DIM,
                        found: self.dim,
                    });
                }
                let mut arms = HashMap::with_capacity(self.arms.len());
                for (i, raw) in self.arms.into_iter().enumerate() {
                    let record = match serde_json::from_value::<LinRecord>(raw) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(index = i, error = %e, "skipping malformed arm record");
                            continue;
                        }
                    };
                    match lin_arm(&record, mode) {
                        Some(arm) => {
                            arms.insert(record.id, arm);
                        }
                        None => warn!(index = i, id = %record.id, "skipping arm with wrong shape"),
                    }
                }
                Ok(ArmTable::Lin(arms))
            }
        }
    }
}

fn lin_arm(r: &LinRecord, mode: InverseMode) -> Option<LinArm<FEATURE_DIM>> {
    if r.a.len() != FEATURE_DIM || r.b.len() != FEATURE_DIM {
        return None;
    }
    let mut a = [[0.0; FEATURE_DIM]; FEATURE_DIM];
    for (dst, src) in a.iter_mut().zip(&r.a) {
        if src.len() != FEATURE_DIM || src.iter().any(|v| !v.is_finite()) {
            return None;
        }
        dst.copy_from_slice(src);
    }
    if r.b.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut b = [0.0; FEATURE_DIM];
    b.copy_from_slice(&r.b);
    Some(LinArm::from_parts(a, b, r.pulls, mode))
}

/// Serialize an arm table as a [`BanditSnapshot`] document.
pub fn export_bandit(table: &ArmTable) -> Result<String, EngineError> {
    Ok(serde_json::to_string(&BanditSnapshot::from_table(table)?)?)
}

/// Parse a [`BanditSnapshot`] document for a learner running `expected`.
pub fn import_bandit(json: &str, expected: Strategy, mode: InverseMode) -> Result<ArmTable, EngineError> {
    let snapshot: BanditSnapshot = serde_json::from_str(json)?;
    snapshot.into_table(expected, mode)
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::ParameterClamp;
    use crate::rule::{Action, Condition, Operator};

    fn sample_rules() -> Vec<Rule> {
        vec![
            Rule::new("commute", Action::new("maps", "suggestion"))
                .with_name("Morning commute")
                .with_condition(Condition::new("hour", Operator::Range, "7,8"))
                .with_condition(Condition::new("motionState", Operator::In, "walking,driving"))
                .with_priority(2.0)
                .with_cooldown_ms(3_600_000),
            Rule::new("battery", Action::new("saver", "alert")),
        ]
    }

    #[test]
    fn test_rules_round_trip() {
        let rules = sample_rules();
        let json = export_rules(&rules).unwrap();
        assert_eq!(import_rules(&json).unwrap(), rules);
    }

    #[test]
    fn test_bad_rule_entry_is_skipped() {
        let json = r#"[
            {"id": "ok", "action": {"id": "a", "type": "t"}},
            {"name": "no id"},
            42,
            {"id": "ok2", "action": {"id": "b", "type": "t"}, "priority": 3}
        ]"#;
        let rules = import_rules(json).unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["ok", "ok2"]);
        assert!(rules[0].enabled);
        assert_eq!(rules[0].priority, 1.0);
        assert_eq!(rules[1].priority, 3.0);
    }

    #[test]
    fn test_rules_document_must_be_array() {
        assert!(matches!(import_rules("{}"), Err(EngineError::NotAnArray(_))));
        assert!(matches!(import_rules("[1,"), Err(EngineError::InvalidJson(_))));
    }

    #[test]
    fn test_lenient_condition_values() {
        let json = r#"[{"id": "r", "action": {"id": "a", "type": "t"}, "conditions": [
            {"key": "batteryLevel", "op": "lte", "value": 20},
            {"key": "isCharging", "op": "eq", "value": false},
            {"key": "hour", "op": "range", "value": [7, 8]},
            {"key": "place", "op": "eq", "value": null},
            {"key": "mode", "op": "neq"}
        ]}]"#;
        let rules = import_rules(json).unwrap();
        let values: Vec<_> = rules[0].conditions.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(values, ["20", "false", "7,8", "", ""]);
    }

    #[test]
    fn test_mab_snapshot_round_trip() {
        let clamp = ParameterClamp::default();
        let mut arms = HashMap::new();
        let mut s = ArmStats::default();
        s.update(0.8, &clamp);
        s.update(0.8, &clamp);
        arms.insert("nudge".to_owned(), s);
        arms.insert("quiet".to_owned(), ArmStats::default());
        let table = ArmTable::Mab(arms);

        let json = export_bandit(&table).unwrap();
        let doc: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["strategy"], "epsilon_greedy");
        assert_eq!(doc["arms"][0]["id"], "nudge");
        assert_eq!(doc["arms"][0]["pulls"], 2);

        let back = import_bandit(&json, Strategy::EpsilonGreedy, InverseMode::Diagonal).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_lin_snapshot_round_trip() {
        let clamp = ParameterClamp::default();
        let mut arm = LinArm::<FEATURE_DIM>::default();
        arm.update(&[0.5; FEATURE_DIM], 1.0, 0.99, &clamp, InverseMode::Diagonal);
        let mut arms = HashMap::new();
        arms.insert("a".to_owned(), arm);
        let table = ArmTable::Lin(arms);

        let json = export_bandit(&table).unwrap();
        let back = import_bandit(&json, Strategy::LinUcb, InverseMode::Diagonal).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_snapshot_header_checks() {
        let json = export_bandit(&ArmTable::Mab(HashMap::new())).unwrap();
        assert!(matches!(
            import_bandit(&json, Strategy::LinUcb, InverseMode::Diagonal),
            Err(EngineError::StrategyMismatch { .. })
        ));

        let newer = r#"{"version": 9, "strategy": "epsilon_greedy", "dim": 10, "arms": []}"#;
        assert!(matches!(
            import_bandit(newer, Strategy::EpsilonGreedy, InverseMode::Diagonal),
            Err(EngineError::UnsupportedVersion { found: 9, .. })
        ));

        let wide = r#"{"version": 1, "strategy": "lin_ucb", "dim": 12, "arms": []}"#;
        assert!(matches!(
            import_bandit(wide, Strategy::LinUcb, InverseMode::Diagonal),
            Err(EngineError::DimensionMismatch { expected: 10, found: 12 })
        ));
    }

    #[test]
    fn test_bad_arm_records_are_skipped() {
        let json = r#"{"version": 1, "strategy": "epsilon_greedy", "dim": 10, "arms": [
            {"id": "good", "pulls": 4, "totalReward": 2.0},
            {"id": "bad", "pulls": "many"},
            {"pulls": 1, "totalReward": 1.0}
        ]}"#;
        let ArmTable::Mab(arms) = import_bandit(json, Strategy::EpsilonGreedy, InverseMode::Diagonal).unwrap() else {
            panic!("expected mab table");
        };
        assert_eq!(arms.len(), 1);
        assert_eq!(arms["good"].pulls, 4);

        let lin = r#"{"version": 1, "strategy": "lin_ucb", "dim": 10, "arms": [
            {"id": "short", "pulls": 1, "a": [[1.0]], "b": [0.0]}
        ]}"#;
        let table = import_bandit(lin, Strategy::LinUcb, InverseMode::Full).unwrap();
        assert!(table.is_empty());
    }
}
