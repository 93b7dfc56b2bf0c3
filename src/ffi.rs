//! Python FFI bindings via PyO3.
//!
//! Exposes [`RuleEngine`] to Python. Rules, results and statistics cross the
//! boundary as JSON strings; context snapshots are plain `dict[str, str]`.
//!
//! # Building the Python extension
//!
//! ```bash
//! pip install maturin
//! maturin develop --features python-ffi
//! ```
//!
//! # Usage
//!
//! ```python
//! from context_core import ContextEngine
//!
//! engine = ContextEngine()
//! engine.load_rules('[{"id": "low-battery", "action": {"id": "saver", "type": "alert"},'
//!                   ' "conditions": [{"key": "batteryLevel", "op": "lte", "value": 20}]}]')
//! engine.put("batteryLevel", "12")
//! results = engine.evaluate({"batteryLevel": "12"}, 3)   # JSON list
//! engine.update_reward("saver", 1.0)
//! stats = engine.get_stats()                              # JSON snapshot
//! ```

use std::collections::HashMap as StdHashMap;

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::config::EngineConfig;
use crate::engine::RuleEngine;
use crate::error::EngineError;
use crate::motion::AccelSample;
use crate::rule::{ContextMap, Rule};
use crate::vocabulary::FEATURE_DIM;

fn py_err(e: EngineError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn to_context(snapshot: StdHashMap<String, String>) -> ContextMap {
    snapshot.into_iter().collect()
}

/// Context decision engine.
///
/// Args:
///     config: optional JSON document overriding the default configuration
#[pyclass(name = "ContextEngine")]
pub struct PyContextEngine {
    inner: RuleEngine,
}

#[pymethods]
impl PyContextEngine {
    /// Create an engine, optionally from a JSON configuration.
    #[new]
    #[pyo3(signature = (config=None))]
    pub fn new(config: Option<&str>) -> PyResult<Self> {
        let config = match config {
            Some(json) => EngineConfig::from_json(json).map_err(py_err)?,
            None => EngineConfig::default(),
        };
        Ok(Self {
            inner: RuleEngine::new(config),
        })
    }

    /// Replace the rule set from a JSON array. Bad entries are skipped.
    ///
    /// Returns:
    ///     Number of rules loaded
    pub fn load_rules(&self, rules_json: &str) -> PyResult<usize> {
        self.inner.import_rules(rules_json).map_err(py_err)
    }

    /// Add one rule from a JSON object, replacing any rule with the same id.
    pub fn add_rule(&self, rule_json: &str) -> PyResult<()> {
        let rule: Rule = serde_json::from_str(rule_json)
            .map_err(|e| py_err(EngineError::InvalidJson(e)))?;
        self.inner.add_rule(rule);
        Ok(())
    }

    /// Remove a rule. Returns False if it was not loaded.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        self.inner.remove_rule(rule_id)
    }

    /// Evaluate a snapshot.
    ///
    /// Returns:
    ///     JSON list of {ruleId, confidence, action}, best first
    #[pyo3(signature = (snapshot, max_results=5))]
    pub fn evaluate(&self, snapshot: StdHashMap<String, String>, max_results: usize) -> PyResult<String> {
        let results = self.inner.evaluate(&to_context(snapshot), max_results);
        serde_json::to_string(&results).map_err(|e| py_err(EngineError::InvalidJson(e)))
    }

    /// Reward an action, optionally under an explicit snapshot.
    ///
    /// Returns:
    ///     The reward actually applied, or None if it was rejected
    #[pyo3(signature = (action_id, reward, snapshot=None))]
    pub fn update_reward(
        &self,
        action_id: &str,
        reward: f64,
        snapshot: Option<StdHashMap<String, String>>,
    ) -> Option<f64> {
        let outcome = match snapshot {
            Some(s) => self
                .inner
                .update_reward_with_context(action_id, reward, &to_context(s)),
            None => self.inner.update_reward(action_id, reward),
        };
        outcome.applied_reward
    }

    /// Let the learner pick one of `candidates`.
    #[pyo3(signature = (candidates, snapshot=None))]
    pub fn select_action(
        &self,
        candidates: Vec<String>,
        snapshot: Option<StdHashMap<String, String>>,
    ) -> Option<String> {
        let ids: Vec<&str> = candidates.iter().map(String::as_str).collect();
        let ctx = snapshot.map(to_context).unwrap_or_default();
        self.inner.select_action(&ids, &ctx).map(|s| s.action_id)
    }

    /// Learner statistics as a JSON snapshot.
    pub fn get_stats(&self) -> PyResult<String> {
        self.inner.export_bandit().map_err(py_err)
    }

    /// Restore learner statistics from `get_stats` output.
    ///
    /// Returns:
    ///     Number of arms loaded
    pub fn load_stats(&self, stats_json: &str) -> PyResult<usize> {
        self.inner.load_bandit(stats_json).map_err(py_err)
    }

    /// Number of loaded rules.
    pub fn get_rule_count(&self) -> usize {
        self.inner.rule_count()
    }

    /// Rule set as a JSON array.
    pub fn export_rules(&self) -> PyResult<String> {
        self.inner.export_rules().map_err(py_err)
    }

    /// Store a sensor reading.
    #[pyo3(signature = (key, value, quality=1.0, source=None))]
    pub fn put(&self, key: &str, value: String, quality: f64, source: Option<&str>) {
        self.inner.put(key, value, quality, source);
    }

    /// Record a context event. `timestamp_ms` defaults to now.
    #[pyo3(signature = (event_type, snapshot, timestamp_ms=None))]
    pub fn push_event(
        &self,
        event_type: &str,
        snapshot: StdHashMap<String, String>,
        timestamp_ms: Option<i64>,
    ) {
        match timestamp_ms {
            Some(ts) => self.inner.push_event(event_type, to_context(snapshot), ts),
            None => self.inner.push_event_now(event_type, to_context(snapshot)),
        }
    }

    /// Classify an accelerometer sample. Returns the motion state name.
    #[pyo3(signature = (x, y, z, gps_speed=None))]
    pub fn observe_motion(&self, x: f64, y: f64, z: f64, gps_speed: Option<f64>) -> &'static str {
        let sample = AccelSample {
            x,
            y,
            z,
            timestamp_ms: 0,
        };
        self.inner.observe_motion(&sample, gps_speed).reading.state.as_str()
    }

    /// Remember the Wi-Fi network and Bluetooth peer seen at `place`.
    #[pyo3(signature = (place, wifi=None, bluetooth=None))]
    pub fn learn_place(&self, place: &str, wifi: Option<&str>, bluetooth: Option<&str>) -> bool {
        self.inner.learn_place(place, wifi, bluetooth)
    }

    /// Record the current Wi-Fi SSID; returns the places that know it.
    pub fn observe_wifi(&self, ssid: &str) -> Vec<String> {
        self.inner.observe_wifi(ssid)
    }

    /// Current tray contents plus time fields.
    pub fn snapshot(&self) -> StdHashMap<String, String> {
        self.inner.snapshot().into_iter().collect()
    }

    /// Python repr string.
    pub fn __repr__(&self) -> String {
        format!(
            "ContextEngine(rules={}, phase={})",
            self.inner.rule_count(),
            self.inner.phase().as_str()
        )
    }
}

/// Context intelligence engine Python bindings.
#[pymodule]
pub fn context_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyContextEngine>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add("FEATURE_DIM", FEATURE_DIM)?;
    Ok(())
}
