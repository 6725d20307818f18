//! Error types for the MMO-PARTITION implementation.
//!
//! Configuration errors are raised before any search begins. Invariant
//! violations carry the region boxes and points involved and end the run.

use thiserror::Error;

/// Why a minimization run entered its terminal state.
///
/// Only successful terminations appear here; failures are reported as [`MmoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StopReason {
    /// Cumulative objective evaluations reached `max_feval`.
    MaxFevalExceeded,
    /// Iteration count reached `max_iter`.
    MaxIterExceeded,
    /// The progress callback asked the run to stop.
    ForcedStop,
}

impl StopReason {
    /// Short tag used in trace lines and log output.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::MaxFevalExceeded => "maxfeval",
            Self::MaxIterExceeded => "maxiter",
            Self::ForcedStop => "forced",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxFevalExceeded => write!(f, "Maximum function evaluations reached"),
            Self::MaxIterExceeded => write!(f, "Maximum iterations reached"),
            Self::ForcedStop => write!(f, "Optimization forced to stop"),
        }
    }
}

/// Errors that can occur while building or running a multimodal minimization.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MmoError {
    #[error("Invalid bounds: lower bound > upper bound (or non-finite) in dimension {dim}")]
    InvalidBounds { dim: usize },

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Local search result {x:?} lies outside the domain bounding box")]
    OutsideDomain { x: Vec<f64> },

    #[error("Partition invariant violated: {0}")]
    Invariant(String),

    #[error("Optimization forced to stop")]
    ForcedStop,
}

/// Result type alias for MMO-PARTITION operations.
pub type Result<T> = std::result::Result<T, MmoError>;
