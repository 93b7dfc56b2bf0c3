//! Contextual bandit: two interchangeable selection strategies behind one
//! interface.
//!
//! | Strategy | Type | Uses features | Learned confidence |
//! |---|---|---|---|
//! | ε-greedy | [`EpsilonGreedy`] | no | `n / (n + 10)` |
//! | LinUCB | [`LinUcb`] | yes | `n / (n + 10) · 1 / (1 + sqrt(xᵀA⁻¹x))` |
//!
//! Both scale by [`evidence`], so an arm that has never been rewarded
//! reports confidence 0 and cannot outvote the rules.
//!
//! [`Bandit`] is a tagged enum over the two, so the cold-start blender never
//! needs to know which produced a [`Selection`].

pub mod linucb;
pub mod mab;

pub use linucb::{InverseMode, LinArm, LinUcb};
pub use mab::{ArmStats, EpsilonGreedy};

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::guard::ParameterClamp;
use crate::vocabulary::FEATURE_DIM;

/// Updates at which [`evidence`] reaches 0.5.
pub const EVIDENCE_HALF_PULLS: f64 = 10.0;

/// Evidence weight of an arm after `pulls` updates: `n / (n + 10)`.
///
/// ```text
///   n =  0 → 0.00
///   n = 10 → 0.50
///   n = 90 → 0.90
/// ```
pub fn evidence(pulls: u64) -> f64 {
    let n = pulls as f64;
    n / (n + EVIDENCE_HALF_PULLS)
}

/// Feature vector type the engine's bandit consumes.
pub type Features = [f64; FEATURE_DIM];

/// Which learner to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Strategy {
    /// ε-greedy multi-armed bandit.
    #[default]
    EpsilonGreedy,
    /// LinUCB over [`Features`].
    LinUcb,
}

impl Strategy {
    /// Stable name used in snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::EpsilonGreedy => "epsilon_greedy",
            Strategy::LinUcb => "lin_ucb",
        }
    }
}

/// Bandit tuning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct BanditConfig {
    /// Learner. Default ε-greedy.
    pub strategy: Strategy,
    /// ε for [`Strategy::EpsilonGreedy`]. Default 0.1.
    pub epsilon: f64,
    /// Exploration weight α for [`Strategy::LinUcb`]. Default 1.0.
    pub alpha: f64,
    /// Evidence decay γ for [`Strategy::LinUcb`]. Default 0.99.
    pub gamma: f64,
    /// How LinUCB inverts `A`. Default diagonal.
    pub inverse: InverseMode,
    /// RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::EpsilonGreedy,
            epsilon: 0.1,
            alpha: 1.0,
            gamma: 0.99,
            inverse: InverseMode::Diagonal,
            seed: None,
        }
    }
}

/// One choice among candidates.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// Index into the candidate slice.
    pub index: usize,
    /// Chosen action id.
    pub action_id: String,
    /// Strategy-specific score (average reward or UCB).
    pub score: f64,
    /// Learned confidence in [0, 1].
    pub confidence: f64,
    /// `true` when chosen by random exploration.
    pub explored: bool,
}

/// Arm parameters of either strategy, used for checkpoints and snapshots.
#[derive(Clone, Debug, PartialEq)]
pub enum ArmTable {
    /// ε-greedy arms.
    Mab(HashMap<String, ArmStats>),
    /// LinUCB arms.
    Lin(HashMap<String, LinArm<FEATURE_DIM>>),
}

impl ArmTable {
    /// Number of arms.
    pub fn len(&self) -> usize {
        match self {
            ArmTable::Mab(m) => m.len(),
            ArmTable::Lin(m) => m.len(),
        }
    }

    /// `true` when no arm has been updated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The engine's learner.
#[derive(Clone, Debug)]
pub enum Bandit {
    /// Context-free bootstrap learner.
    EpsilonGreedy(EpsilonGreedy),
    /// Contextual learner.
    LinUcb(LinUcb<FEATURE_DIM>),
}

impl Bandit {
    /// Build the learner named in `config`.
    pub fn new(config: &BanditConfig) -> Self {
        match config.strategy {
            Strategy::EpsilonGreedy => {
                let rng = match config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_os_rng(),
                };
                Bandit::EpsilonGreedy(EpsilonGreedy::new(config.epsilon, rng))
            }
            Strategy::LinUcb => {
                Bandit::LinUcb(LinUcb::new(config.alpha, config.gamma, config.inverse))
            }
        }
    }

    /// Which strategy this is.
    pub fn strategy(&self) -> Strategy {
        match self {
            Bandit::EpsilonGreedy(_) => Strategy::EpsilonGreedy,
            Bandit::LinUcb(_) => Strategy::LinUcb,
        }
    }

    /// Choose among `candidates`. ε-greedy ignores `features`.
    pub fn select(&mut self, candidates: &[&str], features: &Features) -> Option<Selection> {
        match self {
            Bandit::EpsilonGreedy(b) => b.select(candidates),
            Bandit::LinUcb(b) => b.select(candidates, features),
        }
    }

    /// Apply a sanitized reward. Returns how many parameters the clamp cut.
    ///
    /// LinUCB needs the features the action was chosen under; without them
    /// the update is skipped and `None` is returned.
    pub fn update(
        &mut self,
        action_id: &str,
        reward: f64,
        features: Option<&Features>,
        clamp: &ParameterClamp,
    ) -> Option<usize> {
        match self {
            Bandit::EpsilonGreedy(b) => Some(b.update(action_id, reward, clamp)),
            Bandit::LinUcb(b) => features.map(|x| b.update(action_id, x, reward, clamp)),
        }
    }

    /// Copy of every arm's parameters.
    pub fn arms(&self) -> ArmTable {
        match self {
            Bandit::EpsilonGreedy(b) => ArmTable::Mab(b.arms().clone()),
            Bandit::LinUcb(b) => ArmTable::Lin(b.arms().clone()),
        }
    }

    /// Replace arm parameters. Returns `false` (and changes nothing) when
    /// the table belongs to the other strategy.
    pub fn restore_arms(&mut self, table: ArmTable) -> bool {
        match (self, table) {
            (Bandit::EpsilonGreedy(b), ArmTable::Mab(arms)) => {
                b.set_arms(arms);
                true
            }
            (Bandit::LinUcb(b), ArmTable::Lin(arms)) => {
                b.set_arms(arms);
                true
            }
            _ => false,
        }
    }

    /// Number of arms with state.
    pub fn arm_count(&self) -> usize {
        match self {
            Bandit::EpsilonGreedy(b) => b.arms().len(),
            Bandit::LinUcb(b) => b.arms().len(),
        }
    }

    /// Forget all learned state.
    pub fn reset(&mut self) {
        match self {
            Bandit::EpsilonGreedy(b) => b.reset(),
            Bandit::LinUcb(b) => b.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(strategy: Strategy) -> Bandit {
        Bandit::new(&BanditConfig {
            strategy,
            seed: Some(9),
            ..BanditConfig::default()
        })
    }

    #[test]
    fn test_strategy_dispatch() {
        assert_eq!(seeded(Strategy::EpsilonGreedy).strategy(), Strategy::EpsilonGreedy);
        assert_eq!(seeded(Strategy::LinUcb).strategy(), Strategy::LinUcb);
    }

    #[test]
    fn test_linucb_update_needs_features() {
        let mut b = seeded(Strategy::LinUcb);
        let clamp = ParameterClamp::default();
        assert_eq!(b.update("a", 1.0, None, &clamp), None);
        assert_eq!(b.arm_count(), 0);
        assert!(b.update("a", 1.0, Some(&[0.5; FEATURE_DIM]), &clamp).is_some());
        assert_eq!(b.arm_count(), 1);
    }

    #[test]
    fn test_mab_update_ignores_features() {
        let mut b = seeded(Strategy::EpsilonGreedy);
        assert_eq!(b.update("a", 0.5, None, &ParameterClamp::default()), Some(0));
        assert_eq!(b.arm_count(), 1);
    }

    #[test]
    fn test_restore_rejects_other_strategy() {
        let mut mab = seeded(Strategy::EpsilonGreedy);
        let lin = seeded(Strategy::LinUcb);
        assert!(!mab.restore_arms(lin.arms()));
        let snapshot = mab.arms();
        mab.update("x", 1.0, None, &ParameterClamp::default());
        assert!(mab.restore_arms(snapshot));
        assert_eq!(mab.arm_count(), 0);
    }

    #[test]
    fn test_select_returns_candidate() {
        let x = [0.0; FEATURE_DIM];
        for strategy in [Strategy::EpsilonGreedy, Strategy::LinUcb] {
            let mut b = seeded(strategy);
            let sel = b.select(&["a", "b"], &x).unwrap();
            assert!(sel.index < 2);
            assert_eq!(sel.action_id, ["a", "b"][sel.index]);
        }
    }
}
