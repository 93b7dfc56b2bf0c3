//! Errors for the engine's cold paths: persistence, configuration and
//! snapshot restore.
//!
//! The hot path (`evaluate`, `decide`, `update_reward`, `put`, `push_event`)
//! never returns these; it degrades instead.

use thiserror::Error;

/// Failure on a non-hot-path engine surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The document is not valid JSON, or a required top-level field is malformed.
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A document that must be a JSON array was something else.
    #[error("expected a json array of {0}")]
    NotAnArray(&'static str),

    /// Snapshot was written by a newer format version.
    #[error("unsupported snapshot version {found} (max supported {supported})")]
    UnsupportedVersion {
        /// Version found in the document.
        found: u16,
        /// Highest version this build understands.
        supported: u16,
    },

    /// Snapshot was produced for a different bandit strategy than the live one.
    #[error("bandit snapshot is for strategy '{found}', engine runs '{expected}'")]
    StrategyMismatch {
        /// Strategy the engine is configured with.
        expected: &'static str,
        /// Strategy recorded in the snapshot.
        found: String,
    },

    /// Feature dimension of a LinUCB snapshot differs from this build.
    #[error("feature dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Dimension compiled into this build.
        expected: usize,
        /// Dimension recorded in the snapshot.
        found: usize,
    },
}
