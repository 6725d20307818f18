//! Axis-aligned regions of the search domain and their bisection.
//!
//! A [`Region`] is a box `[ll, ur)` owning at most one discovered point. It is
//! never resized: refinement always replaces a region by the two children of
//! [`Region::bisect`], whose boxes partition the parent's box exactly.
//!
//! # Bisection cases
//!
//! | Parent owns `p0` | New point `p` | Axis / position                     | Child penalty |
//! |------------------|---------------|-------------------------------------|---------------|
//! | no               | no            | longest axis, midpoint              | `+1`          |
//! | yes              | no            | longest axis, midpoint              | `+1`          |
//! | no               | yes           | longest axis, midpoint              | unchanged     |
//! | yes              | yes           | axis separating `p0`, `p` most evenly | unchanged   |

use std::fmt;

use crate::error::{MmoError, Result};
use crate::types::ScoreParams;

/// Which of the four bisection cases produced a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitKind {
    /// No owned point, no new point: exploratory, penalized.
    Empty,
    /// Owned point carried into one child, no new point: penalized.
    Owned,
    /// Empty parent, new point placed in one child: informative.
    NewPoint,
    /// Owned point and new point separated into different children.
    Both,
}

impl SplitKind {
    /// True for the uninformative cases that increment the children's penalty.
    pub fn is_penalized(&self) -> bool {
        matches!(self, Self::Empty | Self::Owned)
    }

    /// Short tag used in trace lines and log output.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Owned => "owned",
            Self::NewPoint => "new",
            Self::Both => "both",
        }
    }
}

/// The two children of a bisection, split along `axis` at coordinate `at`.
///
/// `lower` covers `[ll, at)` on the split axis and `upper` covers `[at, ur)`.
#[derive(Debug, Clone)]
pub struct Split {
    pub lower: Region,
    pub upper: Region,
    pub axis: usize,
    pub at: f64,
    pub kind: SplitKind,
}

impl Split {
    /// Children as a vector, lower first.
    pub fn into_children(self) -> Vec<Region> {
        vec![self.lower, self.upper]
    }
}

/// An axis-aligned box with at most one owned candidate point.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    ll: Vec<f64>,
    ur: Vec<f64>,
    penalty: u32,
    duplicates: u32,
    point: Option<Vec<f64>>,
}

impl Region {
    /// Create an empty, unpenalized region spanning `[ll, ur)`.
    ///
    /// # Errors
    /// - `DimensionMismatch` if `ll` and `ur` differ in length
    /// - `InvalidArgs` if the dimension is zero
    /// - `InvalidBounds` if a bound is non-finite or `ll[i] > ur[i]`
    pub fn new(ll: Vec<f64>, ur: Vec<f64>) -> Result<Self> {
        if ll.len() != ur.len() {
            return Err(MmoError::DimensionMismatch {
                expected: ll.len(),
                found: ur.len(),
            });
        }
        if ll.is_empty() {
            return Err(MmoError::InvalidArgs("dimension must be >= 1".into()));
        }
        for (i, (&lo, &hi)) in ll.iter().zip(ur.iter()).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(MmoError::InvalidBounds { dim: i });
            }
        }
        Ok(Self {
            ll,
            ur,
            penalty: 0,
            duplicates: 0,
            point: None,
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.ll.len()
    }

    #[inline]
    pub fn ll(&self) -> &[f64] {
        &self.ll
    }

    #[inline]
    pub fn ur(&self) -> &[f64] {
        &self.ur
    }

    #[inline]
    pub fn penalty(&self) -> u32 {
        self.penalty
    }

    /// Number of times this region (or an ancestor) re-converged onto a known optimum.
    #[inline]
    pub fn duplicates(&self) -> u32 {
        self.duplicates
    }

    #[inline]
    pub fn point(&self) -> Option<&[f64]> {
        self.point.as_deref()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.point.is_none()
    }

    pub fn midpoint(&self) -> Vec<f64> {
        self.ll
            .iter()
            .zip(self.ur.iter())
            .map(|(&lo, &hi)| 0.5 * (lo + hi))
            .collect()
    }

    /// Per-axis side lengths.
    pub fn extents(&self) -> Vec<f64> {
        self.ll
            .iter()
            .zip(self.ur.iter())
            .map(|(&lo, &hi)| hi - lo)
            .collect()
    }

    pub fn volume(&self) -> f64 {
        self.ll
            .iter()
            .zip(self.ur.iter())
            .map(|(&lo, &hi)| hi - lo)
            .product()
    }

    /// Refinement priority: larger, less penalized, empty regions score higher.
    pub fn score(&self, params: &ScoreParams) -> f64 {
        let mut s = self.volume() * params.decay.powi(self.penalty as i32);
        if self.point.is_some() {
            s *= params.occupied_factor;
        }
        s * params.duplicate_factor.powi(self.duplicates as i32)
    }

    /// Half-open membership test: `ll[i] <= x[i] < ur[i]` on every axis.
    pub fn contains(&self, x: &[f64]) -> bool {
        debug_assert_eq!(x.len(), self.dim());
        x.iter()
            .zip(self.ll.iter().zip(self.ur.iter()))
            .all(|(&xi, (&lo, &hi))| lo <= xi && xi < hi)
    }

    /// Membership test inside an enclosing box whose upper faces are closed.
    ///
    /// Identical to [`contains`](Self::contains) except that on axes where this
    /// region reaches `outer_ur`, the point `x[i] == ur[i]` also belongs here.
    /// This gives every point of a closed domain box exactly one owner.
    pub fn contains_within(&self, x: &[f64], outer_ur: &[f64]) -> bool {
        debug_assert_eq!(x.len(), self.dim());
        debug_assert_eq!(outer_ur.len(), self.dim());
        (0..self.dim()).all(|i| {
            let xi = x[i];
            self.ll[i] <= xi && (xi < self.ur[i] || (xi == self.ur[i] && self.ur[i] == outer_ur[i]))
        })
    }

    /// Closed-box test `ll <= x <= ur`, used to validate points handed to bisect.
    fn encloses(&self, x: &[f64]) -> bool {
        x.len() == self.dim()
            && x.iter()
                .zip(self.ll.iter().zip(self.ur.iter()))
                .all(|(&xi, (&lo, &hi))| lo <= xi && xi <= hi)
    }

    /// Index of the longest side; the first one wins ties.
    pub fn longest_axis(&self) -> usize {
        let mut axis = 0;
        let mut lmax = f64::NEG_INFINITY;
        for (k, (&lo, &hi)) in self.ll.iter().zip(self.ur.iter()).enumerate() {
            if hi - lo > lmax {
                lmax = hi - lo;
                axis = k;
            }
        }
        axis
    }

    /// Copy of this empty region owning `x`, for direct unpenalized assignment.
    ///
    /// # Errors
    /// `Invariant` if the region already owns a point or `x` lies outside its box.
    pub fn with_point(&self, x: &[f64]) -> Result<Region> {
        if let Some(p0) = &self.point {
            return Err(MmoError::Invariant(format!(
                "cannot assign {:?} to region [{:?}, {:?}] already owning {:?}",
                x, self.ll, self.ur, p0
            )));
        }
        if !self.encloses(x) {
            return Err(MmoError::Invariant(format!(
                "cannot assign {:?} to region [{:?}, {:?}] not containing it",
                x, self.ll, self.ur
            )));
        }
        let mut r = self.clone();
        r.point = Some(x.to_vec());
        Ok(r)
    }

    /// Record one more re-convergence onto an already accepted optimum.
    pub(crate) fn mark_duplicate(&mut self) {
        self.duplicates += 1;
    }

    /// Split into two children whose boxes partition this region's box.
    ///
    /// The case is selected by whether this region owns a point and whether a
    /// new point `p` is supplied (see the module table). Owned and new points
    /// are handed to the child whose half-open box holds them.
    ///
    /// # Errors
    /// `Invariant` if `p` lies outside this region, coincides with the owned
    /// point, or cannot be separated from it.
    pub fn bisect(&self, p: Option<&[f64]>) -> Result<Split> {
        if let Some(p) = p {
            if !self.encloses(p) {
                return Err(MmoError::Invariant(format!(
                    "bisect point {:?} outside region [{:?}, {:?}]",
                    p, self.ll, self.ur
                )));
            }
        }

        match (self.point.as_deref(), p) {
            (None, None) => {
                let axis = self.longest_axis();
                let at = 0.5 * (self.ll[axis] + self.ur[axis]);
                Ok(self.split_at(axis, at, SplitKind::Empty, self.penalty + 1, None, None))
            }
            (Some(p0), None) => {
                let axis = self.longest_axis();
                let at = 0.5 * (self.ll[axis] + self.ur[axis]);
                Ok(self.split_at(axis, at, SplitKind::Owned, self.penalty + 1, Some(p0), None))
            }
            (None, Some(p)) => {
                let axis = self.longest_axis();
                let at = 0.5 * (self.ll[axis] + self.ur[axis]);
                Ok(self.split_at(axis, at, SplitKind::NewPoint, self.penalty, Some(p), None))
            }
            (Some(p0), Some(p)) => {
                let (axis, at) = self.separating_cut(p0, p)?;
                if (p0[axis] < at) == (p[axis] < at) {
                    return Err(MmoError::Invariant(format!(
                        "both-split of region [{:?}, {:?}] at axis {} = {} failed to separate {:?} and {:?}",
                        self.ll, self.ur, axis, at, p0, p
                    )));
                }
                Ok(self.split_at(axis, at, SplitKind::Both, self.penalty, Some(p0), Some(p)))
            }
        }
    }

    /// Axis and cut position that separate `p0` from `p` most evenly.
    ///
    /// Candidate cuts sit at the midpoint of the two coordinates; the axis whose
    /// cut lands closest to the middle of the region wins (first axis on ties).
    /// The cut always satisfies `min < at <= max` on the chosen axis.
    fn separating_cut(&self, p0: &[f64], p: &[f64]) -> Result<(usize, f64)> {
        let mut best: Option<(usize, f64, f64)> = None;
        for k in 0..self.dim() {
            let (lo, hi) = if p0[k] <= p[k] { (p0[k], p[k]) } else { (p[k], p0[k]) };
            if lo == hi {
                continue;
            }
            let width = self.ur[k] - self.ll[k];
            let mut at = 0.5 * (lo + hi);
            if at <= lo {
                // Adjacent floats: the rounded midpoint collapsed onto the lower point
                at = hi;
            }
            let t = (at - self.ll[k]) / width;
            let dist = (t - 0.5).abs();
            match best {
                Some((_, _, d)) if d <= dist => {}
                _ => best = Some((k, at, dist)),
            }
        }
        best.map(|(k, at, _)| (k, at)).ok_or_else(|| {
            MmoError::Invariant(format!(
                "both-split of region [{:?}, {:?}] with coincident points {:?}",
                self.ll, self.ur, p0
            ))
        })
    }

    fn split_at(
        &self,
        axis: usize,
        at: f64,
        kind: SplitKind,
        penalty: u32,
        a: Option<&[f64]>,
        b: Option<&[f64]>,
    ) -> Split {
        let mut lower = Region {
            ll: self.ll.clone(),
            ur: self.ur.clone(),
            penalty,
            duplicates: self.duplicates,
            point: None,
        };
        let mut upper = lower.clone();
        lower.ur[axis] = at;
        upper.ll[axis] = at;

        for x in [a, b].into_iter().flatten() {
            let child = if x[axis] < at { &mut lower } else { &mut upper };
            child.point = Some(x.to_vec());
        }

        Split {
            lower,
            upper,
            axis,
            at,
            kind,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# region")?;
        writeln!(f, "dim: {}", self.dim())?;
        writeln!(f, "ll: {:?}", self.ll)?;
        writeln!(f, "ur: {:?}", self.ur)?;
        writeln!(f, "p: {:?}", self.point)?;
        writeln!(f, "penalty: {}", self.penalty)?;
        write!(f, "duplicates: {}", self.duplicates)
    }
}
