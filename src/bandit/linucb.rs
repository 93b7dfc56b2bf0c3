//! LinUCB contextual bandit over fixed-dimension feature vectors.
//!
//! Per arm the learner keeps a `D×D` matrix `A` (identity at birth) and a
//! `D`-vector `b`:
//!
//! ```text
//! θ      = A⁻¹ b
//! score  = θᵀx + α · sqrt(xᵀ A⁻¹ x)
//! update : A ← γA + xxᵀ,  b ← γb + r·x
//! ```
//!
//! `γ < 1` lets stale evidence fade. Every entry of `A` and `b` goes through
//! the [`ParameterClamp`], and the diagonal of `A` never drops below
//! [`RIDGE`], which keeps `A` well-conditioned as evidence decays.
//!
//! # Inverse
//!
//! [`InverseMode::Diagonal`] (default) approximates `A⁻¹` by
//! `diag(1/A₀₀ … 1/A_DD)`. This is a known simplification: cheap and
//! allocation-free, but it ignores feature correlations.
//! [`InverseMode::Full`] recomputes the exact inverse by Gauss–Jordan
//! elimination after each update and falls back to the diagonal form if `A`
//! is numerically singular.

use hashbrown::HashMap;

use crate::bandit::{evidence, Selection};
use crate::guard::ParameterClamp;
use crate::vocabulary::dot;

/// Minimum value of every diagonal entry of `A`.
pub const RIDGE: f64 = 1.0;

const PIVOT_EPS: f64 = 1e-12;

/// How `A⁻¹` is obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum InverseMode {
    /// `diag(1/Aᵢᵢ)`.
    #[default]
    Diagonal,
    /// Exact Gauss–Jordan inverse.
    Full,
}

fn eye<const D: usize>() -> [[f64; D]; D] {
    let mut m = [[0.0; D]; D];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

fn diag_inverse<const D: usize>(a: &[[f64; D]; D]) -> [[f64; D]; D] {
    let mut inv = [[0.0; D]; D];
    for i in 0..D {
        inv[i][i] = 1.0 / a[i][i].max(PIVOT_EPS);
    }
    inv
}

/// Gauss–Jordan inverse with partial pivoting. `None` if singular.
fn full_inverse<const D: usize>(a: &[[f64; D]; D]) -> Option<[[f64; D]; D]> {
    let mut m = *a;
    let mut inv = eye::<D>();
    for col in 0..D {
        let pivot = (col..D).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        if m[pivot][col].abs() < PIVOT_EPS {
            return None;
        }
        m.swap(col, pivot);
        inv.swap(col, pivot);
        let p = m[col][col];
        for k in 0..D {
            m[col][k] /= p;
            inv[col][k] /= p;
        }
        for row in 0..D {
            if row == col {
                continue;
            }
            let f = m[row][col];
            if f == 0.0 {
                continue;
            }
            for k in 0..D {
                m[row][k] -= f * m[col][k];
                inv[row][k] -= f * inv[col][k];
            }
        }
    }
    Some(inv)
}

fn mat_vec<const D: usize>(m: &[[f64; D]; D], x: &[f64; D]) -> [f64; D] {
    let mut out = [0.0; D];
    for (o, row) in out.iter_mut().zip(m.iter()) {
        *o = dot(row, x);
    }
    out
}

// ─── Arm ────────────────────────────────────────────────────────────────────

/// Sufficient statistics of one LinUCB arm.
#[derive(Clone, Debug, PartialEq)]
pub struct LinArm<const D: usize> {
    /// Design matrix.
    pub a: [[f64; D]; D],
    /// Reward-weighted feature sum.
    pub b: [f64; D],
    /// Rewards applied.
    pub pulls: u64,
    a_inv: [[f64; D]; D],
}

impl<const D: usize> Default for LinArm<D> {
    fn default() -> Self {
        Self {
            a: eye::<D>(),
            b: [0.0; D],
            pulls: 0,
            a_inv: eye::<D>(),
        }
    }
}

impl<const D: usize> LinArm<D> {
    /// Rebuild an arm from stored `A` and `b`.
    pub fn from_parts(a: [[f64; D]; D], b: [f64; D], pulls: u64, mode: InverseMode) -> Self {
        let mut arm = Self {
            a,
            b,
            pulls,
            a_inv: eye::<D>(),
        };
        arm.refresh_inverse(mode);
        arm
    }

    /// Current `A⁻¹` (exact or diagonal per the mode last used).
    pub fn a_inv(&self) -> &[[f64; D]; D] {
        &self.a_inv
    }

    fn refresh_inverse(&mut self, mode: InverseMode) {
        self.a_inv = match mode {
            InverseMode::Diagonal => diag_inverse(&self.a),
            InverseMode::Full => full_inverse(&self.a).unwrap_or_else(|| {
                tracing::warn!("LinUCB design matrix singular, using diagonal inverse");
                diag_inverse(&self.a)
            }),
        };
    }

    /// `θ = A⁻¹ b`.
    pub fn theta(&self) -> [f64; D] {
        mat_vec(&self.a_inv, &self.b)
    }

    /// Exploration width `sqrt(xᵀ A⁻¹ x)`.
    pub fn width(&self, x: &[f64; D]) -> f64 {
        dot(x, &mat_vec(&self.a_inv, x)).max(0.0).sqrt()
    }

    /// `θᵀx + α · width(x)`.
    pub fn score(&self, x: &[f64; D], alpha: f64) -> f64 {
        dot(&self.theta(), x) + alpha * self.width(x)
    }

    /// Learned confidence `evidence(pulls) / (1 + width(x))`. Zero until
    /// the arm has been rewarded at least once.
    pub fn confidence(&self, x: &[f64; D]) -> f64 {
        evidence(self.pulls) / (1.0 + self.width(x))
    }

    /// Decayed rank-one update with per-entry protection. Returns how many
    /// entries the clamp cut.
    pub fn update(
        &mut self,
        x: &[f64; D],
        reward: f64,
        gamma: f64,
        clamp: &ParameterClamp,
        mode: InverseMode,
    ) -> usize {
        let mut clamped = 0;
        for i in 0..D {
            for j in 0..D {
                let old = self.a[i][j];
                let (mut v, cut) = clamp.protect_counted(old, gamma * old + x[i] * x[j]);
                if i == j {
                    v = v.max(RIDGE);
                }
                self.a[i][j] = v;
                clamped += usize::from(cut);
            }
            let old = self.b[i];
            let (v, cut) = clamp.protect_counted(old, gamma * old + reward * x[i]);
            self.b[i] = v;
            clamped += usize::from(cut);
        }
        self.pulls += 1;
        self.refresh_inverse(mode);
        clamped
    }
}

// ─── Learner ────────────────────────────────────────────────────────────────

/// LinUCB learner over string-keyed arms.
#[derive(Clone, Debug)]
pub struct LinUcb<const D: usize> {
    arms: HashMap<String, LinArm<D>>,
    alpha: f64,
    gamma: f64,
    mode: InverseMode,
}

impl<const D: usize> LinUcb<D> {
    /// New learner. `gamma` is clamped into (0, 1].
    pub fn new(alpha: f64, gamma: f64, mode: InverseMode) -> Self {
        Self {
            arms: HashMap::new(),
            alpha: alpha.max(0.0),
            gamma: gamma.clamp(f64::EPSILON, 1.0),
            mode,
        }
    }

    /// Exploration weight α.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Decay γ.
    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Inverse mode.
    pub fn mode(&self) -> InverseMode {
        self.mode
    }

    /// Score of `action_id` at `x` (fresh arms score `α·‖x‖`).
    pub fn score(&self, action_id: &str, x: &[f64; D]) -> f64 {
        match self.arms.get(action_id) {
            Some(arm) => arm.score(x, self.alpha),
            None => LinArm::<D>::default().score(x, self.alpha),
        }
    }

    /// Argmax score over `candidates`; ties keep the earliest.
    pub fn select(&self, candidates: &[&str], x: &[f64; D]) -> Option<Selection> {
        let fresh = LinArm::<D>::default();
        let mut best: Option<(usize, f64, f64)> = None;
        for (i, id) in candidates.iter().enumerate() {
            let arm = self.arms.get(*id).unwrap_or(&fresh);
            let score = arm.score(x, self.alpha);
            if best.map_or(true, |(_, s, _)| score > s) {
                best = Some((i, score, arm.confidence(x)));
            }
        }
        best.map(|(index, score, confidence)| Selection {
            index,
            action_id: candidates[index].to_string(),
            score,
            confidence,
            explored: false,
        })
    }

    /// Apply `reward` observed for `action_id` at `x`. Returns clamped-entry count.
    pub fn update(&mut self, action_id: &str, x: &[f64; D], reward: f64, clamp: &ParameterClamp) -> usize {
        let (gamma, mode) = (self.gamma, self.mode);
        self.arms
            .entry_ref(action_id)
            .or_default()
            .update(x, reward, gamma, clamp, mode)
    }

    /// Arm state, if the action has been updated.
    pub fn arm(&self, action_id: &str) -> Option<&LinArm<D>> {
        self.arms.get(action_id)
    }

    /// All arms.
    pub fn arms(&self) -> &HashMap<String, LinArm<D>> {
        &self.arms
    }

    /// Replace all arms.
    pub fn set_arms(&mut self, arms: HashMap<String, LinArm<D>>) {
        self.arms = arms;
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        self.arms.clear();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
