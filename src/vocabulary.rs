//! Feature vocabulary: turn a context snapshot into a fixed-length float
//! vector for the linear bandit.
//!
//! # Implementing for a new device profile
//!
//! ```rust
//! use context_core::guard::SanitizedInputs;
//! use context_core::rule::ContextMap;
//! use context_core::vocabulary::ContextVocabulary;
//!
//! #[derive(Clone, Debug)]
//! struct LightOnly {
//!     lux: f64,
//! }
//!
//! impl ContextVocabulary<2> for LightOnly {
//!     fn from_inputs(inputs: &SanitizedInputs, _ctx: &ContextMap) -> Self {
//!         Self { lux: inputs.get("ambientLight").unwrap_or(0.0) }
//!     }
//!     fn to_feature_vec(&self) -> [f64; 2] {
//!         [1.0, (self.lux / 1000.0).clamp(0.0, 1.0)]
//!     }
//! }
//! ```
//!
//! The engine itself uses [`DeviceContext`](crate::device::DeviceContext)
//! with [`FEATURE_DIM`] dimensions.

use crate::guard::SanitizedInputs;
use crate::rule::ContextMap;

/// Dimension of the engine's feature vector (see [`DeviceContext`](crate::device::DeviceContext)).
pub const FEATURE_DIM: usize = 10;

/// A typed view of the context that encodes to `N` floats.
///
/// Numeric inputs arrive already range-checked through
/// [`InputSanitizer`](crate::guard::InputSanitizer); categorical fields are
/// read from the raw context.
pub trait ContextVocabulary<const N: usize>: Clone + core::fmt::Debug {
    /// Dimensionality of the encoding.
    const FEATURE_DIM: usize = N;

    /// Build from sanitized numeric inputs plus the raw snapshot.
    fn from_inputs(inputs: &SanitizedInputs, ctx: &ContextMap) -> Self;

    /// Encode as a feature vector. Dimension order must be stable across calls.
    fn to_feature_vec(&self) -> [f64; N];
}

/// Dot product.
pub fn dot<const N: usize>(a: &[f64; N], b: &[f64; N]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
