//! # context-core
//!
//! On-device context intelligence: decide *what to suggest, and when*, from
//! a phone's or wearable's sensor snapshot, without a server round trip.
//!
//! ---
//!
//! ## Rules first, learning second
//!
//! A fresh install knows nothing about its user, so every decision starts as
//! a hand-written rule. Rules are matched **softly**: a missing reading scores
//! 0.5 ("unknown, not wrong") and a near miss on a numeric threshold decays
//! linearly instead of failing outright. Rule sets are compiled into a small
//! **decision tree** so only plausible rules are scored.
//!
//! As feedback arrives a **contextual bandit** (ε-greedy, then LinUCB) learns
//! which suggestion works in which context. A **cold-start schedule** hands
//! weight from rules to the learner over ten weeks, and a five-layer
//! **robustness guard** keeps one bad sensor value or outlier reward from
//! steering the learner.
//!
//! Everything the user sees passes a **throttle**: per-rule cooldowns,
//! category and hourly caps, and merge-push of low-priority suggestions.
//!
//! ## The pipeline
//!
//! ```text
//! sensors ─► SensorTray ─► snapshot ─┬─► DecisionTree ─► soft match ─► RateLimiter
//!                                     │                                   │
//!            EventBuffer ─────────────┘            Bandit ◄── guard ──────┤
//!                                                     │                   │
//!                                           cold-start blend ◄────────────┘
//!                                                     │
//!                                                MergeQueue ─► delivery
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`rule`] | [`Rule`], [`Condition`], [`Action`] | Rule model and context maps |
//! | [`soft_match`] | [`soft_match()`], [`TemporalSource`] | Graded condition scoring |
//! | [`tree`] | [`DecisionTree`] | Rule set compiled to an index arena |
//! | [`events`] | [`EventBuffer`] | Bounded ring of recent context events |
//! | [`rate_limit`] | [`RateLimiter`], [`MergeQueue`] | Cooldowns, caps and merge-push |
//! | [`bandit`] | [`Bandit`], [`EpsilonGreedy`], [`LinUcb`] | Action learners |
//! | [`cold_start`] | [`ColdStartSchedule`], [`blend()`] | Rule → learner hand-off |
//! | [`guard`] | [`RobustnessGuard`], [`PerformanceMonitor`] | Input, reward and parameter protection |
//! | [`tray`] | [`SensorTray`] | TTL-decayed sensor cache |
//! | [`motion`] | [`MotionDetector`], [`SamplingStrategy`] | Motion state and sensor duty cycle |
//! | [`places`] | [`PlaceLearner`] | Wi-Fi and Bluetooth signatures of known places |
//! | [`vocabulary`], [`device`] | [`ContextVocabulary`], [`DeviceContext`] | Context → feature vector |
//! | [`engine`] | [`RuleEngine`] | Thread-safe façade over all of the above |
//! | [`persist`] | [`BanditSnapshot`] | JSON rule sets and learner statistics (requires `serde`) |
//!
//! ## Features
//!
//! - `serde` (default): serialisation of rules, configuration and snapshots.
//! - `python-ffi`: PyO3 bindings ([`ffi`]).
//!
//! ## License
//!
//! Business Source License 1.1. Free for evaluation and non-production use.
//! Commercial production use requires a license from Flout Labs (cbyrne@floutlabs.com).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bandit;
pub mod clock;
pub mod cold_start;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod motion;
pub mod places;
pub mod rate_limit;
pub mod rule;
pub mod soft_match;
pub mod tray;
pub mod tree;
pub mod vocabulary;

#[cfg(feature = "serde")]
pub mod persist;

#[cfg(feature = "python-ffi")]
pub mod ffi;

pub use bandit::{Bandit, BanditConfig, EpsilonGreedy, LinUcb, Strategy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cold_start::{blend, ColdStartPhase, ColdStartSchedule, DecisionSource};
pub use config::EngineConfig;
pub use device::DeviceContext;
pub use engine::{DecisionOutcome, MotionUpdate, RuleEngine, UpdateOutcome};
pub use error::EngineError;
pub use events::EventBuffer;
pub use guard::{PerformanceMonitor, RobustnessGuard};
pub use motion::{AccelSample, MotionDetector, SamplingStrategy};
pub use places::PlaceLearner;
pub use rate_limit::{MergeQueue, RateLimiter};
pub use rule::{context_map, Action, Condition, ContextMap, MatchResult, Operator, Rule};
pub use soft_match::{soft_match, TemporalSource};
pub use tray::SensorTray;
pub use tree::DecisionTree;
pub use vocabulary::ContextVocabulary;

#[cfg(feature = "serde")]
pub use persist::BanditSnapshot;
