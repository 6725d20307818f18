//! # MMO-PARTITION: Multimodal Minimization by Adaptive Box Partitioning
//!
//! Finds many local minima of a black-box objective over a bounding box by
//! repeatedly starting a stochastic local search from the most promising
//! sub-box and refining an axis-aligned partition of the box around every
//! optimum found.
//!
//! ## Overview
//!
//! The search box is covered by disjoint hyper-rectangular [`Region`]s, each
//! owning at most one accepted optimum. Every iteration:
//!
//! 1. picks the region with the highest score (large, unpenalized, empty);
//! 2. runs the [`LocalSearch`] (CMA-ES by default) started from that region;
//! 3. finds the region holding the result, which may differ from the one
//!    searched;
//! 4. bisects the affected regions so every optimum keeps its own region,
//!    penalizing splits that revealed nothing new.
//!
//! Results closer than `tol` to a known optimum are duplicates: they are not
//! recorded and they lower the score of the regions they landed in.
//!
//! ## Example
//!
//! ```no_run
//! use mmo_partition::MinimizerBuilder;
//!
//! let peaks = [[0.2, 0.2], [0.5, 0.8], [0.9, 0.1]];
//! let f = move |x: &[f64]| {
//!     peaks
//!         .iter()
//!         .map(|p| ((x[0] - p[0]).powi(2) + (x[1] - p[1]).powi(2)).sqrt())
//!         .fold(f64::INFINITY, f64::min)
//! };
//! let result = MinimizerBuilder::new(f, vec![(0.0, 1.0), (0.0, 1.0)])
//!     .max_iter(100)
//!     .tol(1e-6)
//!     .minimize()
//!     .unwrap();
//! println!("{}", result);
//! ```
//!
//! ## Features
//!
//! - `trace`: record every selection, split and assignment as a typed event
//!   stream, available from [`MultiModalMinimizer::trace`].

pub mod domain;
pub mod error;
pub mod local_search;
pub mod minimizer;
pub mod region;
pub mod trace;
pub mod types;

use std::sync::Arc;

// Re-export main types
pub use domain::{Domain, RegionId};
pub use error::{MmoError, Result, StopReason};
pub use local_search::{Cma, CmaOptions, CmaTermination, LocalSearch, LocalSolution};
pub use minimizer::MultiModalMinimizer;
pub use region::{Region, Split, SplitKind};
pub use trace::{TraceEvent, TraceWriter};
pub use types::{
    Bounds, CallbackFn, IterationReport, MinimizeResult, MinimizerOptions, ObjectiveFn,
    OutsidePolicy, ScoreParams, Solution,
};

/// Fluent front end for configuring and running a [`MultiModalMinimizer`].
///
/// ```no_run
/// use mmo_partition::{MinimizerBuilder, OutsidePolicy};
///
/// let minimizer = MinimizerBuilder::new(|x: &[f64]| x[0].sin(), vec![(0.0, 20.0)])
///     .max_feval(5_000)
///     .outside(OutsidePolicy::Discard)
///     .seed(7)
///     .build()
///     .unwrap();
/// for report in minimizer {
///     println!("{}", report.unwrap());
/// }
/// ```
pub struct MinimizerBuilder {
    func: Arc<ObjectiveFn>,
    bounds: Bounds,
    options: MinimizerOptions,
    cma: CmaOptions,
    callback: Option<Arc<CallbackFn>>,
}

impl MinimizerBuilder {
    pub fn new(func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static, bounds: Bounds) -> Self {
        Self {
            func: Arc::new(func),
            bounds,
            options: MinimizerOptions::default(),
            cma: CmaOptions::default(),
            callback: None,
        }
    }

    /// Replace all minimizer options at once.
    pub fn options(mut self, options: MinimizerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn max_feval(mut self, max_feval: usize) -> Self {
        self.options.max_feval = max_feval;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.options.max_iter = max_iter;
        self
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.options.tol = tol;
        self
    }

    pub fn verbose(mut self, level: u8) -> Self {
        self.options.verbose = level;
        self
    }

    pub fn score(mut self, score: ScoreParams) -> Self {
        self.options.score = score;
        self
    }

    /// Penalty decay applied per uninformative split.
    pub fn decay(mut self, decay: f64) -> Self {
        self.options.score.decay = decay;
        self
    }

    pub fn outside(mut self, policy: OutsidePolicy) -> Self {
        self.options.outside = policy;
        self
    }

    pub fn check_invariants(mut self, enabled: bool) -> Self {
        self.options.check_invariants = enabled;
        self
    }

    /// Replace all CMA-ES options at once.
    pub fn cma_options(mut self, cma: CmaOptions) -> Self {
        self.cma = cma;
        self
    }

    pub fn sigma0(mut self, sigma0: f64) -> Self {
        self.cma.sigma0 = sigma0;
        self
    }

    pub fn population_size(mut self, population_size: usize) -> Self {
        self.cma.population_size = population_size;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.cma.seed = seed;
        self
    }

    /// Evaluate CMA-ES generations with rayon.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.cma.parallel = parallel;
        self
    }

    pub fn with_callback(
        mut self,
        callback: impl Fn(&IterationReport) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Build a minimizer driving the CMA-ES local search.
    pub fn build(self) -> Result<MultiModalMinimizer<Cma>> {
        let cma = Cma::new(self.cma.clone())?;
        self.local_search(cma)
    }

    /// Build a minimizer driving a custom local search.
    ///
    /// CMA-ES settings given to this builder are ignored.
    pub fn local_search<L: LocalSearch>(self, local_search: L) -> Result<MultiModalMinimizer<L>> {
        let domain = Domain::from_bounds(&self.bounds)?;
        let mut minimizer =
            MultiModalMinimizer::from_shared(self.func, domain, local_search, self.options)?;
        minimizer.set_callback(self.callback);
        Ok(minimizer)
    }

    /// Build and run to completion.
    pub fn minimize(self) -> Result<MinimizeResult> {
        self.build()?.minimize()
    }
}
