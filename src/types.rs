//! Core type definitions for the MMO-PARTITION implementation.
//!
//! Objective and callback signatures, minimizer options, and the result and
//! per-iteration report structures consumed by reporting collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MmoError, Result, StopReason};

// ──────────────────────────────────────────────────────────────────────────────
// Type Aliases
// ──────────────────────────────────────────────────────────────────────────────

/// Bounds for each dimension: `Vec<(lower, upper)>`.
pub type Bounds = Vec<(f64, f64)>;

/// Objective function signature.
///
/// - `x`: point in the ambient search space (dimension D)
/// - Returns: objective value to minimize
///
/// Assumed deterministic and side-effect free. Each call consumes one unit of
/// the evaluation budget.
pub type ObjectiveFn = dyn Fn(&[f64]) -> f64 + Send + Sync;

/// Callback invoked after every completed iteration.
///
/// Returns `true` to force the run to stop, `false` to continue.
pub type CallbackFn = dyn Fn(&IterationReport) -> bool + Send + Sync;

// ──────────────────────────────────────────────────────────────────────────────
// Scoring
// ──────────────────────────────────────────────────────────────────────────────

/// Constants of the region score
/// `volume * decay^penalty * occupied_factor^[owns point] * duplicate_factor^duplicates`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreParams {
    /// Per-penalty decay, in `(0, 1)`. Default: 0.4.
    pub decay: f64,
    /// Factor applied when a region owns a point, in `(0, 1]`. Default: 0.5.
    pub occupied_factor: f64,
    /// Factor applied per duplicate mark, in `(0, 1]`. Default: 0.5.
    pub duplicate_factor: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            decay: 0.4,
            occupied_factor: 0.5,
            duplicate_factor: 0.5,
        }
    }
}

impl ScoreParams {
    /// Check that every constant lies in its admissible range.
    pub fn validate(&self) -> Result<()> {
        if !(self.decay > 0.0 && self.decay < 1.0) {
            return Err(MmoError::InvalidArgs(format!(
                "score decay must lie in (0, 1), got {}",
                self.decay
            )));
        }
        for (name, v) in [
            ("occupied_factor", self.occupied_factor),
            ("duplicate_factor", self.duplicate_factor),
        ] {
            if !(v > 0.0 && v <= 1.0) {
                return Err(MmoError::InvalidArgs(format!(
                    "score {} must lie in (0, 1], got {}",
                    name, v
                )));
            }
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Options
// ──────────────────────────────────────────────────────────────────────────────

/// What to do when a local search returns a point outside the domain box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutsidePolicy {
    /// Project the point onto the bounding box and reconcile it there.
    #[default]
    Clamp,
    /// Drop the point and split the searched region uninformatively.
    Discard,
    /// End the run with [`MmoError::OutsideDomain`].
    Fatal,
}

/// Configuration options for the multimodal minimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizerOptions {
    /// Maximum number of objective evaluations. 0 means no limit.
    pub max_feval: usize,

    /// Maximum number of iterations (local solves). 0 means no limit.
    pub max_iter: usize,

    /// Euclidean distance below which two points are the same optimum.
    /// Default: 1e-8.
    pub tol: f64,

    /// Diagnostic verbosity, 0 to 3. Never changes algorithm behavior.
    pub verbose: u8,

    /// Region score constants.
    pub score: ScoreParams,

    /// Handling of local-search results outside the bounding box.
    pub outside: OutsidePolicy,

    /// Audit the full partition after every step (quadratic in region count).
    pub check_invariants: bool,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self {
            max_feval: 0,
            max_iter: 0,
            tol: 1e-8,
            verbose: 0,
            score: ScoreParams::default(),
            outside: OutsidePolicy::default(),
            check_invariants: false,
        }
    }
}

impl MinimizerOptions {
    /// Validate options before a run begins.
    pub fn validate(&self) -> Result<()> {
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(MmoError::InvalidArgs(format!(
                "duplicate tolerance must be positive and finite, got {}",
                self.tol
            )));
        }
        self.score.validate()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────────────────────────────────────

/// An accepted optimum candidate and its objective value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub x: Vec<f64>,
    pub fun: f64,
}

/// Observable state after one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    /// Zero-based index of the iteration just completed.
    pub iteration: usize,
    /// Cumulative number of local searches.
    pub n_local_solves: usize,
    /// Cumulative number of objective evaluations.
    pub nfev: usize,
    /// Number of regions in the partition.
    pub n_regions: usize,
    /// Accepted solutions in discovery order.
    pub solutions: Vec<Solution>,
}

impl fmt::Display for IterationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## MultiModalMinimizer")?;
        writeln!(f, "iteration: {}", self.iteration)?;
        writeln!(f, "n_local_solves: {}", self.n_local_solves)?;
        writeln!(f, "n_fct_calls: {}", self.nfev)?;
        writeln!(f, "n_regions: {}", self.n_regions)?;
        write!(f, "n_solutions: {}", self.solutions.len())
    }
}

/// Result of a multimodal minimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimizeResult {
    /// Accepted solutions in discovery order, free of duplicates.
    pub solutions: Vec<Solution>,

    /// Total number of objective evaluations.
    pub nfev: usize,

    /// Total number of iterations.
    pub nit: usize,

    /// Total number of local searches.
    pub n_local_solves: usize,

    /// Why the run stopped.
    pub stop_reason: StopReason,

    /// Human-readable message describing the termination reason.
    pub message: String,
}

impl MinimizeResult {
    pub fn new(
        solutions: Vec<Solution>,
        nfev: usize,
        nit: usize,
        n_local_solves: usize,
        stop_reason: StopReason,
    ) -> Self {
        let message = format!("{}", stop_reason);
        Self {
            solutions,
            nfev,
            nit,
            n_local_solves,
            stop_reason,
            message,
        }
    }

    /// The accepted solution with the lowest objective value.
    pub fn best(&self) -> Option<&Solution> {
        self.solutions
            .iter()
            .min_by(|a, b| a.fun.total_cmp(&b.fun))
    }
}

impl fmt::Display for MinimizeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MinimizeResult {{")?;
        writeln!(f, "  message: {}", self.message)?;
        writeln!(f, "  nfev: {}", self.nfev)?;
        writeln!(f, "  nit: {}", self.nit)?;
        writeln!(f, "  n_local_solves: {}", self.n_local_solves)?;
        writeln!(f, "  solutions: {}", self.solutions.len())?;
        for s in &self.solutions {
            write!(f, "    f={:.15e} x=[", s.fun)?;
            for (i, xi) in s.x.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:.15e}", xi)?;
            }
            writeln!(f, "]")?;
        }
        write!(f, "}}")
    }
}
