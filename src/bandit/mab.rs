//! ε-greedy multi-armed bandit: the bootstrap learner.
//!
//! - With probability ε a candidate is chosen uniformly at random.
//! - Otherwise the candidate with the highest average reward wins. Untried
//!   arms count as [`OPTIMISTIC_AVERAGE`], so every action gets sampled.
//!
//! The average reward of each arm is the protected parameter: one update
//! moves it at most one [`ParameterClamp`] step.

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::Rng;

use crate::bandit::{evidence, Selection};
use crate::guard::ParameterClamp;

/// Average assumed for an arm that has never been pulled.
pub const OPTIMISTIC_AVERAGE: f64 = 1.0;


// ─── Arm statistics ─────────────────────────────────────────────────────────

/// Pull count and cumulative reward of one action.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ArmStats {
    /// Times this arm has been rewarded.
    pub pulls: u64,
    /// Sum of applied rewards.
    pub total_reward: f64,
}

impl ArmStats {
    /// Average reward, or [`OPTIMISTIC_AVERAGE`] before the first pull.
    pub fn average(&self) -> f64 {
        if self.pulls == 0 {
            OPTIMISTIC_AVERAGE
        } else {
            self.total_reward / self.pulls as f64
        }
    }

    /// Confidence in the estimate, the arm's [`evidence`].
    pub fn confidence(&self) -> f64 {
        evidence(self.pulls)
    }

    /// Apply one reward. Returns `true` when the parameter clamp cut the step.
    ///
    /// The first pull sets the average directly; later pulls move it by at
    /// most `clamp.max_step(old_average)`. `total_reward` is stored as
    /// `protected_average × pulls`, so once the clamp engages it no longer
    /// equals the raw sum of rewards.
    pub fn update(&mut self, reward: f64, clamp: &ParameterClamp) -> bool {
        if self.pulls == 0 {
            self.pulls = 1;
            self.total_reward = reward;
            return false;
        }
        let old = self.average();
        let pulls = self.pulls + 1;
        let raw = (self.total_reward + reward) / pulls as f64;
        let (avg, clamped) = clamp.protect_counted(old, raw);
        self.pulls = pulls;
        self.total_reward = avg * pulls as f64;
        clamped
    }
}

// ─── Learner ────────────────────────────────────────────────────────────────

/// ε-greedy learner over string-keyed arms.
#[derive(Clone, Debug)]
pub struct EpsilonGreedy {
    arms: HashMap<String, ArmStats>,
    epsilon: f64,
    rng: StdRng,
}

impl EpsilonGreedy {
    /// New learner with exploration rate `epsilon` (clamped to [0, 1]).
    pub fn new(epsilon: f64, rng: StdRng) -> Self {
        Self {
            arms: HashMap::new(),
            epsilon: epsilon.clamp(0.0, 1.0),
            rng,
        }
    }

    /// Exploration rate.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Choose among `candidates`. `None` when the slice is empty.
    ///
    /// Exploitation ties keep the earliest candidate.
    pub fn select(&mut self, candidates: &[&str]) -> Option<Selection> {
        if candidates.is_empty() {
            return None;
        }
        let explore = self.epsilon > 0.0 && self.rng.random_bool(self.epsilon);
        let index = if explore {
            self.rng.random_range(0..candidates.len())
        } else {
            let mut best = 0;
            let mut best_avg = f64::NEG_INFINITY;
            for (i, id) in candidates.iter().enumerate() {
                let avg = self.arm(id).average();
                if avg > best_avg {
                    best = i;
                    best_avg = avg;
                }
            }
            best
        };
        let stats = self.arm(candidates[index]);
        Some(Selection {
            index,
            action_id: candidates[index].to_string(),
            score: stats.average(),
            confidence: stats.confidence(),
            explored: explore,
        })
    }

    /// Apply `reward` to `action_id`. Returns the number of clamped parameters.
    pub fn update(&mut self, action_id: &str, reward: f64, clamp: &ParameterClamp) -> usize {
        let clamped = self
            .arms
            .entry_ref(action_id)
            .or_default()
            .update(reward, clamp);
        usize::from(clamped)
    }

    /// Stats for `action_id` (default if never seen).
    pub fn arm(&self, action_id: &str) -> ArmStats {
        self.arms.get(action_id).cloned().unwrap_or_default()
    }

    /// All arms.
    pub fn arms(&self) -> &HashMap<String, ArmStats> {
        &self.arms
    }

    /// Replace all arms.
    pub fn set_arms(&mut self, arms: HashMap<String, ArmStats>) {
        self.arms = arms;
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.arms.clear();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn greedy(epsilon: f64) -> EpsilonGreedy {
        EpsilonGreedy::new(epsilon, StdRng::seed_from_u64(1))
    }

    #[test]
    fn test_untried_arm_is_optimistic() {
        let stats = ArmStats::default();
        assert_eq!(stats.average(), 1.0);
        assert_eq!(stats.confidence(), 0.0);
    }

    #[test]
    fn test_confidence_curve() {
        let s = ArmStats { pulls: 10, total_reward: 5.0 };
        assert!((s.confidence() - 0.5).abs() < 1e-12);
        let s = ArmStats { pulls: 90, total_reward: 0.0 };
        assert!((s.confidence() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_untried_arm_beats_mediocre_arm() {
        let mut b = greedy(0.0);
        let clamp = ParameterClamp::default();
        b.update("tried", 0.4, &clamp);
        let sel = b.select(&["tried", "fresh"]).unwrap();
        assert_eq!(sel.action_id, "fresh");
        assert!(!sel.explored);
    }

    #[test]
    fn test_greedy_picks_best_average() {
        let mut b = greedy(0.0);
        let clamp = ParameterClamp::new(1.0);
        for _ in 0..5 {
            b.update("a", 0.2, &clamp);
            b.update("b", 0.9, &clamp);
        }
        let sel = b.select(&["a", "b"]).unwrap();
        assert_eq!(sel.index, 1);
        assert!((sel.score - 0.9).abs() < 1e-9);
        assert!((sel.confidence - 5.0 / 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_exploration_samples_every_candidate() {
        let mut b = greedy(1.0);
        let mut seen = [false; 3];
        for _ in 0..200 {
            let sel = b.select(&["a", "b", "c"]).unwrap();
            assert!(sel.explored);
            seen[sel.index] = true;
        }
        assert_eq!(seen, [true, true, true]);
    }

    #[test]
    fn test_update_counts_and_protects_average() {
        let mut b = greedy(0.1);
        let clamp = ParameterClamp::default();
        assert_eq!(b.update("a", 1.0, &clamp), 0);
        // raw average would drop to -1.0; clamp allows at most 0.05
        assert_eq!(b.update("a", -3.0, &clamp), 1);
        let s = b.arm("a");
        assert_eq!(s.pulls, 2);
        assert!((s.average() - 0.95).abs() < 1e-9, "avg={}", s.average());
    }

    #[test]
    fn test_clamped_total_departs_from_raw_sum() {
        let clamp = ParameterClamp::default();
        let mut s = ArmStats::default();
        let rewards = [1.0, 1.0, -3.0, -3.0];
        for r in rewards {
            s.update(r, &clamp);
        }
        let raw: f64 = rewards.iter().sum();
        assert_eq!(s.pulls, 4);
        assert!((s.total_reward - raw).abs() > 1.0, "total {} tracked raw sum {raw}", s.total_reward);
        // Two clamped steps of 0.05: avg 1.0 → 0.95 → 0.90.
        assert!((s.average() - 0.9).abs() < 1e-9);
        assert!((s.total_reward - 3.6).abs() < 1e-9);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(greedy(0.5).select(&[]).is_none());
    }
}
