//! Local search capability and its CMA-ES implementation.
//!
//! The minimizer only needs: given a region and an evaluation cap, return a
//! point, its objective value and the number of evaluations consumed. That
//! contract is the [`LocalSearch`] trait. The returned point is not required
//! to lie inside the region.
//!
//! [`Cma`] runs a (mu/mu_w, lambda) covariance matrix adaptation evolution
//! strategy in region-normalized coordinates
//!
//! ```text
//! x = midpoint + extents ∘ y
//! ```
//!
//! starting from `y = 0` with step size `sigma0`, so the initial spread follows
//! the region's shape. Sampling and updates follow Hansen's standard formulae.
//! A single seeded ChaCha stream drives every search, so a run is fully
//! reproducible for a given seed.

use std::collections::VecDeque;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MmoError, Result};
use crate::region::Region;
use crate::types::ObjectiveFn;

/// Floor for covariance eigenvalues before taking square roots.
const MIN_EIGENVALUE: f64 = 1e-20;

// ──────────────────────────────────────────────────────────────────────────────
// Capability
// ──────────────────────────────────────────────────────────────────────────────

/// Outcome of one local search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSolution {
    /// Best point found, in ambient coordinates.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub fun: f64,
    /// Objective evaluations consumed.
    pub nfev: usize,
    /// Generations (or iterations) performed.
    pub ngen: usize,
}

/// A stochastic local optimizer started from a region.
pub trait LocalSearch {
    /// Search from `region`, calling `objective` at most `max_feval` times.
    ///
    /// `max_feval` is at least 1; `usize::MAX` means no cap.
    fn search(
        &mut self,
        objective: &ObjectiveFn,
        region: &Region,
        max_feval: usize,
    ) -> Result<LocalSolution>;
}

impl<F> LocalSearch for F
where
    F: FnMut(&ObjectiveFn, &Region, usize) -> Result<LocalSolution>,
{
    fn search(
        &mut self,
        objective: &ObjectiveFn,
        region: &Region,
        max_feval: usize,
    ) -> Result<LocalSolution> {
        self(objective, region, max_feval)
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// CMA-ES options
// ──────────────────────────────────────────────────────────────────────────────

/// Configuration of the CMA-ES local search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmaOptions {
    /// Initial step size as a fraction of the region extents. Default: 0.25.
    pub sigma0: f64,

    /// Samples per generation. 0 means automatic: `4 + floor(3 ln n)`.
    pub population_size: usize,

    /// Maximum number of generations per search. Default: 1000.
    pub max_gen: usize,

    /// Stop when every coordinate's standard deviation (normalized
    /// coordinates) and the evolution path fall below this. Default: 1e-12.
    pub tol_x: f64,

    /// Stop when the best values of recent generations, and the values within
    /// the current generation, span less than this. Default: 1e-24.
    ///
    /// Must stay far below the square of the minimizer's duplicate tolerance:
    /// on a quadratic basin a value range of `t` leaves the point about
    /// `sqrt(t)` from the minimum.
    pub tol_fun: f64,

    /// Stop when the covariance condition number exceeds this. Default: 1e14.
    pub max_condition: f64,

    /// Seed of the sampling stream. Default: 0.
    pub seed: u64,

    /// Evaluate each generation in parallel with rayon.
    /// Samples are drawn before evaluation and results kept in sample order,
    /// so parallel and serial runs return identical results.
    pub parallel: bool,

    /// Minimum population size for the parallel path. Below this the serial
    /// path is used even if `parallel` is `true`. Default: 4.
    pub min_parallel_evals: usize,
}

impl Default for CmaOptions {
    fn default() -> Self {
        Self {
            sigma0: 0.25,
            population_size: 0,
            max_gen: 1000,
            tol_x: 1e-12,
            tol_fun: 1e-24,
            max_condition: 1e14,
            seed: 0,
            parallel: false,
            min_parallel_evals: 4,
        }
    }
}

impl CmaOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.sigma0.is_finite() && self.sigma0 > 0.0) {
            return Err(MmoError::InvalidArgs(format!(
                "sigma0 must be positive and finite, got {}",
                self.sigma0
            )));
        }
        if self.population_size == 1 {
            return Err(MmoError::InvalidArgs("population_size must be >= 2".into()));
        }
        if self.max_gen == 0 {
            return Err(MmoError::InvalidArgs("max_gen must be >= 1".into()));
        }
        Ok(())
    }
}

/// Why a CMA-ES search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmaTermination {
    /// `max_gen` generations elapsed.
    MaxGen,
    /// The evaluation cap was reached.
    Budget,
    /// Step size and evolution path collapsed below `tol_x`.
    TolX,
    /// Objective values stagnated within `tol_fun`.
    TolFun,
    /// Covariance matrix became too ill-conditioned.
    ConditionCov,
    /// Step size, mean or covariance became non-finite.
    Numerical,
}

// ──────────────────────────────────────────────────────────────────────────────
// CMA-ES search
// ──────────────────────────────────────────────────────────────────────────────

/// CMA-ES local search over region-normalized coordinates.
pub struct Cma {
    options: CmaOptions,
    rng: ChaCha8Rng,
    last_termination: Option<CmaTermination>,
}

impl Cma {
    /// # Errors
    /// `InvalidArgs` if the options are out of range.
    pub fn new(options: CmaOptions) -> Result<Self> {
        options.validate()?;
        let rng = ChaCha8Rng::seed_from_u64(options.seed);
        Ok(Self {
            options,
            rng,
            last_termination: None,
        })
    }

    pub fn options(&self) -> &CmaOptions {
        &self.options
    }

    /// Termination reason of the most recent search.
    pub fn last_termination(&self) -> Option<CmaTermination> {
        self.last_termination
    }

    fn evaluate(&self, objective: &ObjectiveFn, xs: &[Vec<f64>]) -> Vec<f64> {
        let f = |x: &Vec<f64>| {
            let v = objective(x.as_slice());
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };
        if self.options.parallel && xs.len() >= self.options.min_parallel_evals.max(1) {
            xs.par_iter().map(f).collect()
        } else {
            xs.iter().map(f).collect()
        }
    }
}

impl Default for Cma {
    fn default() -> Self {
        let options = CmaOptions::default();
        let rng = ChaCha8Rng::seed_from_u64(options.seed);
        Self {
            options,
            rng,
            last_termination: None,
        }
    }
}

/// Strategy parameters derived from the dimension and population size.
struct Strategy {
    lambda: usize,
    weights: DVector<f64>,
    mu_eff: f64,
    c_sigma: f64,
    d_sigma: f64,
    c_c: f64,
    c_1: f64,
    c_mu: f64,
    expected_norm: f64,
}

impl Strategy {
    fn new(dim: usize, population_size: usize) -> Self {
        let n = dim as f64;
        let lambda = if population_size == 0 {
            4 + (3.0 * n.ln()).floor() as usize
        } else {
            population_size
        };
        let mu = lambda / 2;

        let raw: Vec<f64> = (0..mu)
            .map(|i| (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let w_sum: f64 = raw.iter().sum();
        let weights = DVector::from_iterator(mu, raw.iter().map(|w| w / w_sum));
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let c_sigma = (mu_eff + 2.0) / (n + mu_eff + 5.0);
        let d_sigma = 1.0 + 2.0 * (((mu_eff - 1.0) / (n + 1.0)).sqrt() - 1.0).max(0.0) + c_sigma;
        let c_c = (4.0 + mu_eff / n) / (n + 4.0 + 2.0 * mu_eff / n);
        let c_1 = 2.0 / ((n + 1.3).powi(2) + mu_eff);
        let c_mu = (2.0 * (mu_eff - 2.0 + 1.0 / mu_eff) / ((n + 2.0).powi(2) + mu_eff)).min(1.0 - c_1);
        let expected_norm = n.sqrt() * (1.0 - 1.0 / (4.0 * n) + 1.0 / (21.0 * n * n));

        Self {
            lambda,
            weights,
            mu_eff,
            c_sigma,
            d_sigma,
            c_c,
            c_1,
            c_mu,
            expected_norm,
        }
    }

    fn mu(&self) -> usize {
        self.weights.len()
    }
}

impl LocalSearch for Cma {
    fn search(
        &mut self,
        objective: &ObjectiveFn,
        region: &Region,
        max_feval: usize,
    ) -> Result<LocalSolution> {
        if max_feval == 0 {
            return Err(MmoError::InvalidArgs("local search needs a budget of at least 1".into()));
        }
        let dim = region.dim();
        let s = Strategy::new(dim, self.options.population_size);
        let mid = region.midpoint();
        let ext = region.extents();
        let to_actual = |y: &DVector<f64>| -> Vec<f64> {
            (0..dim).map(|i| mid[i] + ext[i] * y[i]).collect()
        };

        let mut mean = DVector::<f64>::zeros(dim);
        let mut sigma = self.options.sigma0;
        let mut cov = DMatrix::<f64>::identity(dim, dim);
        let mut p_c = DVector::<f64>::zeros(dim);
        let mut p_sigma = DVector::<f64>::zeros(dim);

        let history_len = 10 + (30.0 * dim as f64 / s.lambda as f64).ceil() as usize;
        let mut history: VecDeque<f64> = VecDeque::with_capacity(history_len);

        let mut best_x = mid.clone();
        let mut best_f = f64::INFINITY;
        let mut nfev = 0usize;
        let mut ngen = 0usize;

        let termination = loop {
            // Eigendecompose covariance: C = B * D^2 * B^T
            let eigen = SymmetricEigen::new(cov.clone());
            let d = eigen.eigenvalues.map(|v| v.max(MIN_EIGENVALUE).sqrt());
            let bd = &eigen.eigenvectors * DMatrix::from_diagonal(&d);

            let n_samples = s.lambda.min(max_feval - nfev);
            let ys: Vec<DVector<f64>> = (0..n_samples)
                .map(|_| {
                    let z = DVector::from_iterator(
                        dim,
                        (0..dim).map(|_| -> f64 { StandardNormal.sample(&mut self.rng) }),
                    );
                    &mean + sigma * &bd * z
                })
                .collect();
            let xs: Vec<Vec<f64>> = ys.iter().map(&to_actual).collect();
            let fs = self.evaluate(objective, &xs);
            nfev += n_samples;

            for (x, &f) in xs.iter().zip(fs.iter()) {
                if f < best_f {
                    best_f = f;
                    best_x.clone_from(x);
                }
            }

            if n_samples < s.lambda {
                break CmaTermination::Budget;
            }

            let mut order: Vec<usize> = (0..s.lambda).collect();
            order.sort_by(|&a, &b| fs[a].total_cmp(&fs[b]));

            // Weighted recombination of the best mu samples
            let old_mean = mean.clone();
            let mut new_mean = DVector::<f64>::zeros(dim);
            for (w_idx, &k) in order.iter().take(s.mu()).enumerate() {
                new_mean += s.weights[w_idx] * &ys[k];
            }
            let mean_diff = (&new_mean - &old_mean) / sigma;

            // C^{-1/2} = B * D^{-1} * B^T
            let inv_d = d.map(|v| 1.0 / v);
            let c_inv_sqrt =
                &eigen.eigenvectors * DMatrix::from_diagonal(&inv_d) * eigen.eigenvectors.transpose();

            p_sigma = (1.0 - s.c_sigma) * &p_sigma
                + (s.c_sigma * (2.0 - s.c_sigma) * s.mu_eff).sqrt() * &c_inv_sqrt * &mean_diff;

            let gen_factor = 1.0 - (1.0 - s.c_sigma).powi(2 * (ngen as i32 + 1));
            let p_sigma_norm = p_sigma.norm();
            let h_sigma = if p_sigma_norm / gen_factor.sqrt()
                < (1.4 + 2.0 / (dim as f64 + 1.0)) * s.expected_norm
            {
                1.0
            } else {
                0.0
            };

            p_c = (1.0 - s.c_c) * &p_c + h_sigma * (s.c_c * (2.0 - s.c_c) * s.mu_eff).sqrt() * &mean_diff;

            let mut rank_mu = DMatrix::<f64>::zeros(dim, dim);
            for (w_idx, &k) in order.iter().take(s.mu()).enumerate() {
                let y_k = (&ys[k] - &old_mean) / sigma;
                rank_mu += s.weights[w_idx] * &y_k * y_k.transpose();
            }

            let delta_h = (1.0 - h_sigma) * s.c_c * (2.0 - s.c_c);
            cov = (1.0 - s.c_1 - s.c_mu + s.c_1 * delta_h) * &cov
                + s.c_1 * &p_c * p_c.transpose()
                + s.c_mu * rank_mu;
            cov = (&cov + cov.transpose()) * 0.5;

            sigma *= ((s.c_sigma / s.d_sigma) * (p_sigma_norm / s.expected_norm - 1.0)).exp();
            mean = new_mean;
            ngen += 1;

            // Termination criteria
            if !sigma.is_finite()
                || mean.iter().any(|v| !v.is_finite())
                || cov.iter().any(|v| !v.is_finite())
            {
                break CmaTermination::Numerical;
            }
            if ngen >= self.options.max_gen {
                break CmaTermination::MaxGen;
            }
            if nfev >= max_feval {
                break CmaTermination::Budget;
            }

            if history.len() == history_len {
                history.pop_front();
            }
            history.push_back(fs[order[0]]);
            let gen_range = fs[order[s.lambda - 1]] - fs[order[0]];
            if history.len() == history_len {
                let (lo, hi) = history
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                if hi - lo < self.options.tol_fun && gen_range < self.options.tol_fun {
                    break CmaTermination::TolFun;
                }
            }

            let max_std = cov.diagonal().iter().fold(0.0_f64, |m, &v| m.max(v.max(0.0).sqrt()));
            let max_pc = p_c.iter().fold(0.0_f64, |m, &v| m.max(v.abs()));
            if sigma * max_std < self.options.tol_x && sigma * max_pc < self.options.tol_x {
                break CmaTermination::TolX;
            }

            let eig_max = eigen.eigenvalues.max();
            let eig_min = eigen.eigenvalues.min().max(MIN_EIGENVALUE);
            if eig_max / eig_min > self.options.max_condition {
                break CmaTermination::ConditionCov;
            }
        };

        log::debug!(
            "cma: {:?} after {} generations, {} evaluations, f={:.6e}",
            termination,
            ngen,
            nfev,
            best_f
        );
        self.last_termination = Some(termination);

        Ok(LocalSolution {
            x: best_x,
            fun: best_f,
            nfev,
            ngen,
        })
    }
}
