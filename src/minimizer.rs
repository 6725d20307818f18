//! The multimodal minimization state machine.
//!
//! Each iteration refines the partition once:
//!
//! 1. select the top-scoring region `rs`;
//! 2. run the local search from `rs`, obtaining `(x*, f*)`;
//! 3. locate the region `rr` holding `x*` (the search may leave `rs`);
//! 4. reconcile `x*` against `rr` and replace the affected regions:
//!
//! | Case                              | `rs`                    | `rr`                                |
//! |-----------------------------------|-------------------------|-------------------------------------|
//! | `rr == rs`, new optimum           | `bisect(x*)`            |                                     |
//! | `rr == rs`, duplicate             | `bisect(None)`, marked  |                                     |
//! | `rr != rs`, `rr` empty            | `bisect(None)`          | owns `x*` (unpenalized assignment)  |
//! | `rr != rs`, `rr` owns another `p0`| `bisect(None)`          | `bisect(x*)` separating `p0`, `x*`  |
//! | `rr != rs`, duplicate             | `bisect(None)`          | `bisect(None)`, marked              |
//!
//! 5. accept `(x*, f*)` unless it was a duplicate.
//!
//! A result is a duplicate when it lies within `tol` of the point owned by
//! `rr` or of any accepted solution. Duplicate splits add a mark to both
//! children which lowers their score on top of the ordinary penalty.
//!
//! The run is terminal once the evaluation budget or the iteration limit is
//! reached, the callback forces a stop, or an error aborts it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::domain::{Domain, RegionId};
use crate::error::{MmoError, Result, StopReason};
use crate::local_search::{Cma, LocalSearch};
use crate::region::{Region, Split};
use crate::trace::TraceWriter;
#[allow(unused_imports)]
use crate::trace::TraceEvent;
use crate::trace_event;
use crate::types::{
    CallbackFn, IterationReport, MinimizeResult, MinimizerOptions, ObjectiveFn, OutsidePolicy,
    Solution,
};

/// Euclidean distance between two points of equal dimension.
fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(ai, bi)| (ai - bi) * (ai - bi))
        .sum::<f64>()
        .sqrt()
}

/// Multimodal minimizer driving a [`LocalSearch`] over an adaptively
/// partitioned [`Domain`].
pub struct MultiModalMinimizer<L: LocalSearch = Cma> {
    func: Arc<ObjectiveFn>,
    domain: Domain,
    local_search: L,
    options: MinimizerOptions,
    callback: Option<Arc<CallbackFn>>,

    /// Cumulative objective evaluations.
    nfev: usize,
    /// Cumulative local searches.
    n_local_solves: usize,
    /// Completed iterations.
    nit: usize,
    /// Accepted solutions in discovery order.
    solutions: Vec<Solution>,

    stop_reason: Option<StopReason>,
    /// The error that aborted the run, if any.
    failure: Option<MmoError>,
    trace: TraceWriter,
}

impl<L: LocalSearch> MultiModalMinimizer<L> {
    /// Create a minimizer over `domain`.
    ///
    /// # Errors
    /// `InvalidArgs` if the options are out of range.
    pub fn new(
        func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
        domain: Domain,
        local_search: L,
        options: MinimizerOptions,
    ) -> Result<Self> {
        Self::from_shared(Arc::new(func), domain, local_search, options)
    }

    /// Create a minimizer from an already shared objective.
    pub fn from_shared(
        func: Arc<ObjectiveFn>,
        domain: Domain,
        local_search: L,
        options: MinimizerOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            func,
            domain,
            local_search,
            options,
            callback: None,
            nfev: 0,
            n_local_solves: 0,
            nit: 0,
            solutions: Vec::new(),
            stop_reason: None,
            failure: None,
            trace: TraceWriter::new(),
        })
    }

    /// Set a callback invoked after every iteration; returning `true` stops the run.
    pub fn with_callback(
        mut self,
        callback: impl Fn(&IterationReport) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub(crate) fn set_callback(&mut self, callback: Option<Arc<CallbackFn>>) {
        self.callback = callback;
    }

    // ──────────────────────────────────────────────────────────────────────
    // Accessors
    // ──────────────────────────────────────────────────────────────────────

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn options(&self) -> &MinimizerOptions {
        &self.options
    }

    pub fn local_search(&self) -> &L {
        &self.local_search
    }

    pub fn solutions(&self) -> &[Solution] {
        &self.solutions
    }

    pub fn nfev(&self) -> usize {
        self.nfev
    }

    pub fn nit(&self) -> usize {
        self.nit
    }

    pub fn n_local_solves(&self) -> usize {
        self.n_local_solves
    }

    /// Why the run stopped, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// True once the run stopped or aborted; `advance` then does nothing.
    pub fn is_terminal(&self) -> bool {
        self.stop_reason.is_some() || self.failure.is_some()
    }

    /// Recorded partition events (populated with the `trace` feature).
    pub fn trace(&self) -> &TraceWriter {
        &self.trace
    }

    /// Observable state after the most recent iteration.
    pub fn report(&self) -> IterationReport {
        IterationReport {
            iteration: self.nit.saturating_sub(1),
            n_local_solves: self.n_local_solves,
            nfev: self.nfev,
            n_regions: self.domain.len(),
            solutions: self.solutions.clone(),
        }
    }

    fn verbose(&self, level: u8) -> bool {
        self.options.verbose >= level
    }

    fn limit_reached(&self) -> Option<StopReason> {
        if self.options.max_feval > 0 && self.nfev >= self.options.max_feval {
            Some(StopReason::MaxFevalExceeded)
        } else if self.options.max_iter > 0 && self.nit >= self.options.max_iter {
            Some(StopReason::MaxIterExceeded)
        } else {
            None
        }
    }

    fn stop(&mut self, reason: StopReason) {
        trace_event!(
            self.trace,
            TraceEvent::Stop {
                iteration: self.nit,
                reason,
                nfev: self.nfev,
            }
        );
        if self.verbose(1) {
            log::info!(
                "stop after {} iterations, {} evaluations: {}",
                self.nit,
                self.nfev,
                reason
            );
        }
        self.stop_reason = Some(reason);
    }

    // ──────────────────────────────────────────────────────────────────────
    // Driving the run
    // ──────────────────────────────────────────────────────────────────────

    /// Perform one iteration.
    ///
    /// Returns the report of the completed iteration, or `None` once the run
    /// is terminal. An error aborts the run: it is returned once and every
    /// later call returns `Ok(None)`.
    pub fn advance(&mut self) -> Result<Option<IterationReport>> {
        if self.is_terminal() {
            return Ok(None);
        }
        if let Some(reason) = self.limit_reached() {
            self.stop(reason);
            return Ok(None);
        }

        if let Err(e) = self.step() {
            self.failure = Some(e.clone());
            log::error!("run aborted at iteration {}: {}", self.nit, e);
            if let MmoError::Invariant(_) = e {
                log::error!("partition state:\n{}", self.domain);
            }
            return Err(e);
        }
        self.nit += 1;

        if self.options.check_invariants {
            if let Err(e) = self.domain.check_invariants() {
                self.failure = Some(e.clone());
                log::error!("partition audit failed after iteration {}: {}", self.nit - 1, e);
                return Err(e);
            }
        }

        let report = self.report();
        if self.verbose(1) {
            log::info!(
                "iteration {}: local solves {}, evaluations {}, solutions {}, regions {}",
                report.iteration,
                report.n_local_solves,
                report.nfev,
                report.solutions.len(),
                report.n_regions
            );
        }
        if self.verbose(3) {
            for (id, region) in self.domain.regions() {
                log::trace!("region {}:\n{}", id, region);
            }
        }

        if let Some(cb) = &self.callback {
            if cb(&report) {
                self.stop(StopReason::ForcedStop);
            }
        }
        Ok(Some(report))
    }

    /// Run until a terminal state and return the accepted solutions.
    ///
    /// # Errors
    /// `InvalidArgs` if neither `max_feval`, `max_iter` nor a callback can end
    /// the run; otherwise the error that aborted it, also on later calls.
    pub fn minimize(&mut self) -> Result<MinimizeResult> {
        if self.options.max_feval == 0 && self.options.max_iter == 0 && self.callback.is_none() {
            return Err(MmoError::InvalidArgs(
                "minimize needs max_feval, max_iter or a stopping callback".into(),
            ));
        }
        while self.advance()?.is_some() {}
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        let reason = self
            .stop_reason
            .ok_or_else(|| MmoError::Invariant("run ended without a stop reason".into()))?;
        Ok(MinimizeResult::new(
            self.solutions.clone(),
            self.nfev,
            self.nit,
            self.n_local_solves,
            reason,
        ))
    }

    // ──────────────────────────────────────────────────────────────────────
    // One refinement step
    // ──────────────────────────────────────────────────────────────────────

    fn step(&mut self) -> Result<()> {
        let t = self.nit;
        let rs = self.domain.get_top_region(&self.options.score)?;
        let searched = self.region(rs)?.clone();
        let score = searched.score(&self.options.score);
        trace_event!(
            self.trace,
            TraceEvent::Select {
                iteration: t,
                region: rs,
                score,
            }
        );
        if self.verbose(2) {
            log::debug!(
                "iteration {}: searching region {} (score {:.6e}, penalty {}, duplicates {})",
                t,
                rs,
                score,
                searched.penalty(),
                searched.duplicates()
            );
        }

        let cap = if self.options.max_feval > 0 {
            self.options.max_feval - self.nfev
        } else {
            usize::MAX
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let func = Arc::clone(&self.func);
        let counting = move |x: &[f64]| {
            counter.fetch_add(1, Ordering::Relaxed);
            func(x)
        };
        let sol = self.local_search.search(&counting, &searched, cap)?;
        let counted = calls.load(Ordering::Relaxed);
        self.n_local_solves += 1;
        self.nfev += counted;
        if sol.nfev != counted {
            log::warn!(
                "local search reported {} evaluations but made {} objective calls",
                sol.nfev,
                counted
            );
        }
        if sol.x.len() != self.domain.dim() {
            return Err(MmoError::DimensionMismatch {
                expected: self.domain.dim(),
                found: sol.x.len(),
            });
        }
        if !sol.fun.is_finite() {
            log::warn!("local search returned non-finite value {} at {:?}", sol.fun, sol.x);
        }
        trace_event!(
            self.trace,
            TraceEvent::Search {
                iteration: t,
                x: sol.x.clone(),
                fun: sol.fun,
                nfev: counted,
            }
        );

        let (x, fun) = if self.domain.contains(&sol.x) {
            (sol.x, sol.fun)
        } else {
            match self.options.outside {
                OutsidePolicy::Clamp => {
                    let x = self.domain.clamp(&sol.x);
                    let fun = (self.func)(x.as_slice());
                    self.nfev += 1;
                    if self.verbose(2) {
                        log::debug!("clamped out-of-domain result {:?} to {:?}", sol.x, x);
                    }
                    (x, fun)
                }
                OutsidePolicy::Discard => {
                    if self.verbose(2) {
                        log::debug!("discarding out-of-domain result {:?}", sol.x);
                    }
                    let split = searched.bisect(None)?;
                    self.apply_split(rs, split, false)?;
                    return Ok(());
                }
                OutsidePolicy::Fatal => return Err(MmoError::OutsideDomain { x: sol.x }),
            }
        };

        let rr = self.domain.get_region_with_point(&x)?;
        let duplicate = self.is_duplicate(&x, rr)?;

        if rr == rs {
            if duplicate {
                self.note_duplicate(rs, &x);
                let split = searched.bisect(None)?;
                self.apply_split(rs, split, true)?;
            } else {
                let split = searched.bisect(Some(x.as_slice()))?;
                self.apply_split(rs, split, false)?;
            }
        } else {
            let split_s = searched.bisect(None)?;
            let target = self.region(rr)?.clone();
            if duplicate {
                self.note_duplicate(rr, &x);
                let split_r = target.bisect(None)?;
                self.apply_double_split(rs, split_s, rr, split_r, true)?;
            } else if target.is_empty() {
                let assigned = target.with_point(&x)?;
                let (s_lower, s_upper) = (split_s.lower.clone(), split_s.upper.clone());
                let ids = self
                    .domain
                    .replace(vec![s_lower, s_upper, assigned], &[rs, rr])?;
                self.note_split(rs, &split_s, [ids[0], ids[1]]);
                trace_event!(
                    self.trace,
                    TraceEvent::Assign {
                        region: ids[2],
                        x: x.clone(),
                    }
                );
                if self.verbose(2) {
                    log::debug!("assigned {:?} to empty region {} (now {})", x, rr, ids[2]);
                }
            } else {
                let split_r = target.bisect(Some(x.as_slice()))?;
                self.apply_double_split(rs, split_s, rr, split_r, false)?;
            }
        }

        if !duplicate {
            self.solutions.push(Solution { x, fun });
        }
        Ok(())
    }

    fn region(&self, id: RegionId) -> Result<&Region> {
        self.domain
            .get(id)
            .ok_or_else(|| MmoError::Invariant(format!("region {} vanished from the domain", id)))
    }

    /// Duplicate test against the owner of `rr`, then every accepted solution.
    fn is_duplicate(&self, x: &[f64], rr: RegionId) -> Result<bool> {
        let tol = self.options.tol;
        if let Some(p0) = self.region(rr)?.point() {
            if distance(p0, x) < tol {
                return Ok(true);
            }
        }
        Ok(self.solutions.iter().any(|s| distance(&s.x, x) < tol))
    }

    fn note_duplicate(&mut self, region: RegionId, x: &[f64]) {
        trace_event!(
            self.trace,
            TraceEvent::Duplicate {
                region,
                x: x.to_vec(),
            }
        );
        if self.verbose(2) {
            log::debug!("{:?} re-converged onto a known optimum in region {}", x, region);
        }
    }

    fn note_split(&mut self, region: RegionId, split: &Split, children: [RegionId; 2]) {
        trace_event!(
            self.trace,
            TraceEvent::Split {
                region,
                kind: split.kind,
                axis: split.axis,
                at: split.at,
                children,
            }
        );
        if self.verbose(2) {
            log::debug!(
                "split region {} ({}) on axis {} at {:.6e} into {} and {}",
                region,
                split.kind.tag(),
                split.axis,
                split.at,
                children[0],
                children[1]
            );
        }
    }

    fn apply_split(&mut self, id: RegionId, mut split: Split, duplicate: bool) -> Result<()> {
        if duplicate {
            split.lower.mark_duplicate();
            split.upper.mark_duplicate();
        }
        let ids = self
            .domain
            .replace(vec![split.lower.clone(), split.upper.clone()], &[id])?;
        self.note_split(id, &split, [ids[0], ids[1]]);
        Ok(())
    }

    fn apply_double_split(
        &mut self,
        rs: RegionId,
        split_s: Split,
        rr: RegionId,
        mut split_r: Split,
        duplicate: bool,
    ) -> Result<()> {
        if duplicate {
            split_r.lower.mark_duplicate();
            split_r.upper.mark_duplicate();
        }
        let incoming = vec![
            split_s.lower.clone(),
            split_s.upper.clone(),
            split_r.lower.clone(),
            split_r.upper.clone(),
        ];
        let ids = self.domain.replace(incoming, &[rs, rr])?;
        self.note_split(rs, &split_s, [ids[0], ids[1]]);
        self.note_split(rr, &split_r, [ids[2], ids[3]]);
        Ok(())
    }
}

impl<L: LocalSearch> Iterator for MultiModalMinimizer<L> {
    type Item = Result<IterationReport>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(report)) => Some(Ok(report)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
