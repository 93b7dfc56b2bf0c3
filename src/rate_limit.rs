//! Notification throttling: per-rule cooldown, category and global caps, and
//! merge-push of low-priority actions.
//!
//! [`RateLimiter::check`] applies the three suppressions in order:
//!
//! 1. **Rule cooldown**: a rule cannot refire within its own `cooldown_ms`.
//! 2. **Category cap**: an action type is held once it has fired
//!    `category_max` times inside `category_window_ms`.
//! 3. **Global cap**: nothing fires once `global_max_per_hour` firings sit in
//!    the trailing hour.
//!
//! [`MergeQueue`] is separate: [`Priority::Low`] and [`Priority::Normal`]
//! deliveries are held and collapsed into one `merged_summary` action once
//! `threshold` items are pending or the oldest has waited `window_ms`.

use std::collections::VecDeque;

use hashbrown::HashMap;
use tracing::debug;

use crate::clock::{HOUR_MS, MINUTE_MS};
use crate::rule::Action;

/// Action id and type of a synthesized summary.
pub const MERGED_SUMMARY: &str = "merged_summary";

// ─── Limits ─────────────────────────────────────────────────────────────────

/// Category and global firing limits.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct RateLimits {
    /// Firings of one action type allowed per category window. Default 3.
    pub category_max: usize,
    /// Sliding category window. Default 30 min.
    pub category_window_ms: i64,
    /// Firings allowed in any trailing hour. Default 10.
    pub global_max_per_hour: usize,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            category_max: 3,
            category_window_ms: 30 * MINUTE_MS,
            global_max_per_hour: 10,
        }
    }
}

/// Why a firing was held back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Suppression {
    /// The rule's own cooldown has not elapsed.
    Cooldown {
        /// Time until the rule may fire again.
        remaining_ms: i64,
    },
    /// The action type hit its category cap.
    Category {
        /// The capped action type.
        kind: String,
    },
    /// The trailing-hour global cap is reached.
    Global,
}

/// Firing history and the suppression checks over it.
#[derive(Clone, Debug, Default)]
pub struct RateLimiter {
    limits: RateLimits,
    last_fired: HashMap<String, i64>,
    by_category: HashMap<String, VecDeque<i64>>,
    global: VecDeque<i64>,
}

impl RateLimiter {
    /// Empty history with the given limits.
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Active limits.
    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Check whether `rule_id` (cooldown `cooldown_ms`, action type `kind`)
    /// may fire at `now_ms`. Prunes expired history as a side effect.
    pub fn check(
        &mut self,
        rule_id: &str,
        cooldown_ms: i64,
        kind: &str,
        now_ms: i64,
    ) -> Result<(), Suppression> {
        if cooldown_ms > 0 {
            if let Some(&last) = self.last_fired.get(rule_id) {
                let elapsed = now_ms - last;
                if elapsed < cooldown_ms {
                    return Err(Suppression::Cooldown {
                        remaining_ms: cooldown_ms - elapsed,
                    });
                }
            }
        }

        if let Some(fired) = self.by_category.get_mut(kind) {
            prune(fired, now_ms - self.limits.category_window_ms);
            if fired.len() >= self.limits.category_max {
                return Err(Suppression::Category {
                    kind: kind.to_string(),
                });
            }
        }

        prune(&mut self.global, now_ms - HOUR_MS);
        if self.global.len() >= self.limits.global_max_per_hour {
            return Err(Suppression::Global);
        }
        Ok(())
    }

    /// Record a firing at `now_ms`.
    pub fn record(&mut self, rule_id: &str, kind: &str, now_ms: i64) {
        self.last_fired.insert(rule_id.to_string(), now_ms);
        self.by_category
            .entry(kind.to_string())
            .or_default()
            .push_back(now_ms);
        self.global.push_back(now_ms);
    }

    /// Firings inside the trailing hour at `now_ms`.
    pub fn global_count(&mut self, now_ms: i64) -> usize {
        prune(&mut self.global, now_ms - HOUR_MS);
        self.global.len()
    }

    /// Forget a rule's cooldown, e.g. when the rule is removed.
    pub fn forget_rule(&mut self, rule_id: &str) {
        self.last_fired.remove(rule_id);
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.last_fired.clear();
        self.by_category.clear();
        self.global.clear();
    }
}

/// Drop timestamps strictly before `cutoff` from the front. A firing exactly
/// one window old still counts.
fn prune(fired: &mut VecDeque<i64>, cutoff: i64) {
    while fired.front().is_some_and(|&t| t < cutoff) {
        fired.pop_front();
    }
}

// ─── Merge-push ─────────────────────────────────────────────────────────────

/// Delivery tier. Low and Normal are merge-eligible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Priority {
    /// Background information.
    Low,
    /// Ordinary suggestion.
    Normal,
    /// Time-sensitive suggestion.
    High,
    /// Must reach the user now.
    Urgent,
}

impl Priority {
    /// Tier from a rule priority weight: `<1` Low, `<2` Normal, `<3` High, else Urgent.
    pub fn from_weight(weight: f64) -> Self {
        if weight < 1.0 {
            Priority::Low
        } else if weight < 2.0 {
            Priority::Normal
        } else if weight < 3.0 {
            Priority::High
        } else {
            Priority::Urgent
        }
    }

    /// `true` for the tiers held by the merge queue.
    pub fn is_mergeable(self) -> bool {
        matches!(self, Priority::Low | Priority::Normal)
    }
}

/// Merge queue tuning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct MergeConfig {
    /// Longest an item may wait before the queue flushes. Default 5 min.
    pub window_ms: i64,
    /// Pending count that triggers a flush. Default 3.
    pub threshold: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            window_ms: 5 * MINUTE_MS,
            threshold: 3,
        }
    }
}

/// A held low-priority delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingAction {
    /// Rule that produced the action.
    pub rule_id: String,
    /// The action itself.
    pub action: Action,
    /// Its tier.
    pub priority: Priority,
    /// When it was queued.
    pub queued_at_ms: i64,
}

/// What leaves the throttle for the host to show.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// The action to deliver; a `merged_summary` when several were collapsed.
    pub action: Action,
    /// Highest tier among the delivered items.
    pub priority: Priority,
    /// Rules behind this delivery, oldest first.
    pub rule_ids: Vec<String>,
}

impl Delivery {
    /// Number of original actions carried.
    pub fn count(&self) -> usize {
        self.rule_ids.len()
    }

    /// `true` for a synthesized summary.
    pub fn is_merged(&self) -> bool {
        self.action.id == MERGED_SUMMARY
    }
}

/// Pending queue for merge-eligible deliveries.
#[derive(Clone, Debug, Default)]
pub struct MergeQueue {
    config: MergeConfig,
    pending: Vec<PendingAction>,
}

impl MergeQueue {
    /// Empty queue.
    pub fn new(config: MergeConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
        }
    }

    /// Offer an action. High and Urgent pass straight through; Low and
    /// Normal are held until the queue flushes.
    pub fn offer(
        &mut self,
        rule_id: &str,
        action: Action,
        priority: Priority,
        now_ms: i64,
    ) -> Option<Delivery> {
        if !priority.is_mergeable() {
            return Some(Delivery {
                action,
                priority,
                rule_ids: vec![rule_id.to_string()],
            });
        }
        self.pending.push(PendingAction {
            rule_id: rule_id.to_string(),
            action,
            priority,
            queued_at_ms: now_ms,
        });
        if self.pending.len() >= self.config.threshold || self.oldest_expired(now_ms) {
            self.flush()
        } else {
            None
        }
    }

    /// Flush if the oldest pending item has waited the full window.
    pub fn flush_due(&mut self, now_ms: i64) -> Option<Delivery> {
        if self.oldest_expired(now_ms) {
            self.flush()
        } else {
            None
        }
    }

    /// Flush unconditionally. A single item is delivered unchanged; two or
    /// more collapse into one `merged_summary`.
    pub fn flush(&mut self) -> Option<Delivery> {
        let items = std::mem::take(&mut self.pending);
        match items.len() {
            0 => None,
            1 => items.into_iter().next().map(|p| Delivery {
                action: p.action,
                priority: p.priority,
                rule_ids: vec![p.rule_id],
            }),
            n => {
                let priority = items
                    .iter()
                    .map(|p| p.priority)
                    .max()
                    .unwrap_or(Priority::Low);
                let ids: Vec<&str> = items.iter().map(|p| p.action.id.as_str()).collect();
                let payload = serde_json::json!({ "count": n, "ids": ids }).to_string();
                debug!(count = n, "merged pending actions into summary");
                Some(Delivery {
                    action: Action::new(MERGED_SUMMARY, MERGED_SUMMARY).with_payload(payload),
                    priority,
                    rule_ids: items.into_iter().map(|p| p.rule_id).collect(),
                })
            }
        }
    }

    /// Items waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// `true` when nothing waits.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn oldest_expired(&self, now_ms: i64) -> bool {
        self.pending
            .iter()
            .map(|p| p.queued_at_ms)
            .min()
            .is_some_and(|t| now_ms - t >= self.config.window_ms)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
