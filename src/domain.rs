//! The search domain as the leaf set of a binary space partition.
//!
//! Regions live in an ordered arena keyed by [`RegionId`]. Ids are allocated
//! from a monotonically increasing counter and never reused, so iteration order
//! is creation order and ties in [`Domain::get_top_region`] resolve to the
//! oldest region.
//!
//! The only mutation is [`Domain::replace`], which removes a set of leaves and
//! inserts their replacements in one step. Callers hand it children produced by
//! [`Region::bisect`] (or a region copy carrying a newly assigned point), which
//! keeps the two partition invariants:
//!
//! 1. the region boxes tile the bounding box without gaps or overlaps;
//! 2. every owned point lies in exactly one region, the one that owns it.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{MmoError, Result};
use crate::region::Region;
use crate::types::{Bounds, ScoreParams};

/// Relative tolerance for volume conservation checks.
const VOLUME_RELTOL: f64 = 1e-9;

/// Stable handle to a region of a [`Domain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(usize);

impl RegionId {
    /// Creation index of the region.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bounding box plus the regions that currently tile it.
#[derive(Debug, Clone)]
pub struct Domain {
    ll: Vec<f64>,
    ur: Vec<f64>,
    regions: BTreeMap<RegionId, Region>,
    next_id: usize,
}

impl Domain {
    /// Create a domain holding a single region equal to the bounding box.
    ///
    /// # Errors
    /// `DimensionMismatch`, `InvalidArgs` or `InvalidBounds` for malformed bounds.
    pub fn new(ll: Vec<f64>, ur: Vec<f64>) -> Result<Self> {
        let root = Region::new(ll.clone(), ur.clone())?;
        let mut domain = Self {
            ll,
            ur,
            regions: BTreeMap::new(),
            next_id: 0,
        };
        let id = domain.alloc_id();
        domain.regions.insert(id, root);
        Ok(domain)
    }

    /// Create a domain from `(lower, upper)` pairs.
    pub fn from_bounds(bounds: &Bounds) -> Result<Self> {
        let ll = bounds.iter().map(|&(lo, _)| lo).collect();
        let ur = bounds.iter().map(|&(_, hi)| hi).collect();
        Self::new(ll, ur)
    }

    fn alloc_id(&mut self) -> RegionId {
        let id = RegionId(self.next_id);
        self.next_id += 1;
        id
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

    /// Volume of the bounding box.
    pub fn volume(&self) -> f64 {
        self.ll
            .iter()
            .zip(self.ur.iter())
            .map(|(&lo, &hi)| hi - lo)
            .product()
    }

    /// Number of regions in the partition.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(&id)
    }

    #[cfg(test)]
    fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(&id)
    }

    /// Regions in creation order.
    pub fn regions(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        self.regions.iter().map(|(&id, r)| (id, r))
    }

    /// Closed bounding-box membership test.
    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.dim()
            && x.iter()
                .zip(self.ll.iter().zip(self.ur.iter()))
                .all(|(&xi, (&lo, &hi))| lo <= xi && xi <= hi)
    }

    /// Project `x` onto the bounding box.
    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.ll.iter().zip(self.ur.iter()))
            .map(|(&xi, (&lo, &hi))| xi.max(lo).min(hi))
            .collect()
    }

    /// Region with maximum score; the oldest region wins ties.
    ///
    /// # Errors
    /// `Invariant` if the domain has no regions.
    pub fn get_top_region(&self, params: &ScoreParams) -> Result<RegionId> {
        let mut best: Option<(RegionId, f64)> = None;
        for (&id, region) in &self.regions {
            let score = region.score(params);
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some((id, score)),
            }
        }
        best.map(|(id, _)| id)
            .ok_or_else(|| MmoError::Invariant("domain has no regions".into()))
    }

    /// The unique region whose box holds `x`.
    ///
    /// Region boxes are half-open except on the upper faces of the bounding
    /// box, so every point of the closed bounding box has exactly one owner.
    ///
    /// # Errors
    /// - `OutsideDomain` if `x` is outside the bounding box
    /// - `Invariant` if no region or more than one region holds `x`
    pub fn get_region_with_point(&self, x: &[f64]) -> Result<RegionId> {
        if x.len() != self.dim() {
            return Err(MmoError::DimensionMismatch {
                expected: self.dim(),
                found: x.len(),
            });
        }
        if !self.contains(x) {
            return Err(MmoError::OutsideDomain { x: x.to_vec() });
        }
        let mut found = self
            .regions
            .iter()
            .filter(|(_, r)| r.contains_within(x, &self.ur))
            .map(|(&id, _)| id);
        match (found.next(), found.next()) {
            (Some(id), None) => Ok(id),
            (None, _) => Err(MmoError::Invariant(format!(
                "point {:?} inside the domain is held by no region",
                x
            ))),
            (Some(a), Some(b)) => Err(MmoError::Invariant(format!(
                "point {:?} held by several regions: {} {:?} and {} {:?}",
                x,
                a,
                self.regions[&a].ll(),
                b,
                self.regions[&b].ll()
            ))),
        }
    }

    /// Atomically remove `regions_out` and insert `regions_in`.
    ///
    /// Returns the ids assigned to `regions_in`, in order. Nothing changes when
    /// an error is returned.
    ///
    /// # Errors
    /// `Invariant` if an outgoing id is unknown or repeated, an incoming region
    /// has the wrong dimension, or the incoming volume differs from the
    /// outgoing volume.
    pub fn replace(
        &mut self,
        regions_in: Vec<Region>,
        regions_out: &[RegionId],
    ) -> Result<Vec<RegionId>> {
        let mut out_volume = 0.0;
        for (i, id) in regions_out.iter().enumerate() {
            let region = self.regions.get(id).ok_or_else(|| {
                MmoError::Invariant(format!("replace: region {} is not in the domain", id))
            })?;
            if regions_out[..i].contains(id) {
                return Err(MmoError::Invariant(format!(
                    "replace: region {} listed twice",
                    id
                )));
            }
            out_volume += region.volume();
        }

        let mut in_volume = 0.0;
        for region in &regions_in {
            if region.dim() != self.dim() {
                return Err(MmoError::Invariant(format!(
                    "replace: incoming region of dimension {} in a {}-dimensional domain",
                    region.dim(),
                    self.dim()
                )));
            }
            in_volume += region.volume();
        }
        if (in_volume - out_volume).abs() > VOLUME_RELTOL * out_volume.max(f64::MIN_POSITIVE) {
            return Err(MmoError::Invariant(format!(
                "replace: incoming volume {:e} differs from outgoing volume {:e}",
                in_volume, out_volume
            )));
        }

        for id in regions_out {
            self.regions.remove(id);
        }
        let mut ids = Vec::with_capacity(regions_in.len());
        for region in regions_in {
            let id = self.alloc_id();
            self.regions.insert(id, region);
            ids.push(id);
        }
        Ok(ids)
    }

    /// All currently owned points, in region creation order.
    pub fn solutions(&self) -> Vec<&[f64]> {
        self.regions.values().filter_map(|r| r.point()).collect()
    }

    /// Full audit of both partition invariants.
    ///
    /// Checks volume conservation, pairwise interior disjointness, and that
    /// every owned point is held by its owner and by no other region.
    /// Quadratic in the number of regions.
    pub fn check_invariants(&self) -> Result<()> {
        let total: f64 = self.regions.values().map(|r| r.volume()).sum();
        let expected = self.volume();
        if (total - expected).abs() > VOLUME_RELTOL * expected.max(f64::MIN_POSITIVE) {
            return Err(MmoError::Invariant(format!(
                "region volumes sum to {:e}, bounding box volume is {:e}",
                total, expected
            )));
        }

        let regions: Vec<(RegionId, &Region)> = self.regions().collect();
        for (i, &(a, ra)) in regions.iter().enumerate() {
            for &(b, rb) in &regions[i + 1..] {
                if interiors_overlap(ra, rb) {
                    return Err(MmoError::Invariant(format!(
                        "regions {} [{:?}, {:?}] and {} [{:?}, {:?}] overlap",
                        a,
                        ra.ll(),
                        ra.ur(),
                        b,
                        rb.ll(),
                        rb.ur()
                    )));
                }
            }
        }

        for &(id, region) in &regions {
            if let Some(p) = region.point() {
                let owners: Vec<RegionId> = regions
                    .iter()
                    .filter(|(_, r)| r.contains_within(p, &self.ur))
                    .map(|&(other, _)| other)
                    .collect();
                if owners != [id] {
                    return Err(MmoError::Invariant(format!(
                        "point {:?} owned by {} [{:?}, {:?}] is held by regions {:?}",
                        p,
                        id,
                        region.ll(),
                        region.ur(),
                        owners
                    )));
                }
            }
        }
        Ok(())
    }
}

/// True when two boxes share a set of positive measure.
fn interiors_overlap(a: &Region, b: &Region) -> bool {
    (0..a.dim()).all(|k| a.ll()[k].max(b.ll()[k]) < a.ur()[k].min(b.ur()[k]))
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# domain")?;
        writeln!(f, "dim: {}", self.dim())?;
        writeln!(f, "ll: {:?}", self.ll)?;
        writeln!(f, "ur: {:?}", self.ur)?;
        writeln!(f, "regions: {}", self.regions.len())?;
        write!(f, "points: {}", self.solutions().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Domain {
        Domain::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap()
    }

    fn only_id(d: &Domain) -> RegionId {
        d.regions().next().map(|(id, _)| id).unwrap()
    }

    // ────────────────────────────────────────────────────────────────
    // Construction
    // ────────────────────────────────────────────────────────────────

    #[test]
    fn test_new_single_region() {
        let d = unit_square();
        assert_eq!(d.dim(), 2);
        assert_eq!(d.len(), 1);
        assert_eq!(d.volume(), 1.0);
        let (_, r) = d.regions().next().unwrap();
        assert_eq!(r.ll(), d.ll());
        assert_eq!(r.ur(), d.ur());
        assert!(d.solutions().is_empty());
        d.check_invariants().unwrap();
    }

    #[test]
    fn test_new_rejects_malformed_bounds() {
        assert!(matches!(
            Domain::new(vec![0.0, 0.0], vec![1.0]),
            Err(MmoError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            Domain::from_bounds(&vec![(0.0, 1.0), (3.0, 2.0)]),
            Err(MmoError::InvalidBounds { dim: 1 })
        ));
        assert!(Domain::from_bounds(&vec![]).is_err());
    }

    // ────────────────────────────────────────────────────────────────
    // Selection
    // ────────────────────────────────────────────────────────────────

    #[test]
    fn test_top_region_prefers_large_empty_unpenalized() {
        let mut d = unit_square();
        let root = only_id(&d);
        let split = d.get(root).unwrap().bisect(Some(&[0.2, 0.5])).unwrap();
        let ids = d.replace(split.into_children(), &[root]).unwrap();
        // Both children have volume 0.5; the empty upper child wins
        let params = ScoreParams::default();
        assert_eq!(d.get_top_region(&params).unwrap(), ids[1]);
    }

    #[test]
    fn test_top_region_ties_go_to_oldest() {
        let mut d = unit_square();
        let root = only_id(&d);
        let split = d.get(root).unwrap().bisect(None).unwrap();
        let ids = d.replace(split.into_children(), &[root]).unwrap();
        let params = ScoreParams::default();
        assert_eq!(d.get_top_region(&params).unwrap(), ids[0]);
    }

    #[test]
    fn test_top_region_score_is_maximal() {
        let mut d = unit_square();
        let params = ScoreParams::default();
        let pts = [[0.1, 0.1], [0.8, 0.3], [0.4, 0.9], [0.6, 0.6]];
        for p in pts {
            let id = d.get_region_with_point(&p).unwrap();
            let split = d.get(id).unwrap().bisect(Some(p.as_slice())).unwrap();
            d.replace(split.into_children(), &[id]).unwrap();
            let top = d.get_top_region(&params).unwrap();
            let top_score = d.get(top).unwrap().score(&params);
            for (_, r) in d.regions() {
                assert!(top_score >= r.score(&params));
            }
        }
        d.check_invariants().unwrap();
    }

    // ────────────────────────────────────────────────────────────────
    // Lookup
    // ────────────────────────────────────────────────────────────────

    #[test]
    fn test_lookup_on_shared_face_and_outer_face() {
        let mut d = unit_square();
        let root = only_id(&d);
        let split = d.get(root).unwrap().bisect(None).unwrap();
        let ids = d.replace(split.into_children(), &[root]).unwrap();
        assert_eq!(d.get_region_with_point(&[0.25, 0.5]).unwrap(), ids[0]);
        assert_eq!(d.get_region_with_point(&[0.5, 0.5]).unwrap(), ids[1]);
        assert_eq!(d.get_region_with_point(&[1.0, 1.0]).unwrap(), ids[1]);
        assert_eq!(d.get_region_with_point(&[0.0, 1.0]).unwrap(), ids[0]);
    }

    #[test]
    fn test_lookup_outside_domain() {
        let d = unit_square();
        assert!(matches!(
            d.get_region_with_point(&[1.5, 0.5]),
            Err(MmoError::OutsideDomain { .. })
        ));
        assert!(matches!(
            d.get_region_with_point(&[0.5]),
            Err(MmoError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_clamp() {
        let d = unit_square();
        assert_eq!(d.clamp(&[-0.5, 2.0]), vec![0.0, 1.0]);
        assert_eq!(d.clamp(&[0.3, 0.7]), vec![0.3, 0.7]);
        assert!(d.contains(&d.clamp(&[7.0, -7.0])));
    }

    // ────────────────────────────────────────────────────────────────
    // Replace
    // ────────────────────────────────────────────────────────────────

    #[test]
    fn test_replace_assigns_fresh_ids() {
        let mut d = unit_square();
        let root = only_id(&d);
        let split = d.get(root).unwrap().bisect(None).unwrap();
        let ids = d.replace(split.into_children(), &[root]).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|&id| id > root));
        assert!(d.get(root).is_none());
        assert_eq!(d.len(), 2);
        d.check_invariants().unwrap();
    }

    #[test]
    fn test_replace_is_atomic_on_unknown_id() {
        let mut d = unit_square();
        let root = only_id(&d);
        let split = d.get(root).unwrap().bisect(None).unwrap();
        let err = d.replace(split.clone().into_children(), &[root, RegionId(99)]);
        assert!(matches!(err, Err(MmoError::Invariant(_))));
        assert_eq!(d.len(), 1);
        assert!(d.get(root).is_some());

        let err = d.replace(split.into_children(), &[root, root]);
        assert!(matches!(err, Err(MmoError::Invariant(_))));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_replace_rejects_volume_change() {
        let mut d = unit_square();
        let root = only_id(&d);
        let split = d.get(root).unwrap().bisect(None).unwrap();
        let err = d.replace(vec![split.lower], &[root]);
        assert!(matches!(err, Err(MmoError::Invariant(_))));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_assignment_by_replace() {
        let mut d = unit_square();
        let root = only_id(&d);
        let with_point = d.get(root).unwrap().with_point(&[0.3, 0.4]).unwrap();
        d.replace(vec![with_point], &[root]).unwrap();
        assert_eq!(d.solutions(), vec![&[0.3, 0.4][..]]);
        d.check_invariants().unwrap();
    }

    // ────────────────────────────────────────────────────────────────
    // Invariant audit
    // ────────────────────────────────────────────────────────────────

    #[test]
    fn test_check_invariants_detects_overlap() {
        let mut d = unit_square();
        let root = only_id(&d);
        let half = Region::new(vec![0.0, 0.0], vec![0.5, 1.0]).unwrap();
        // Same total volume, but both copies cover the left half
        d.replace(vec![half.clone(), half], &[root]).unwrap();
        assert!(matches!(d.check_invariants(), Err(MmoError::Invariant(_))));
    }

    #[test]
    fn test_check_invariants_volume_is_relative_on_small_domains() {
        let mut d = Domain::new(vec![0.0, 0.0], vec![1e-3, 1e-3]).unwrap();
        d.check_invariants().unwrap();
        let root = only_id(&d);
        // Relative volume loss of 1e-6, absolute loss of 1e-12
        let mut shrunk = Region::new(vec![0.0, 0.0], vec![1e-3 * (1.0 - 1e-6), 1e-3]).unwrap();
        std::mem::swap(&mut shrunk, d.get_mut(root).unwrap());
        assert!(matches!(d.check_invariants(), Err(MmoError::Invariant(_))));
    }

    #[test]
    fn test_check_invariants_detects_misplaced_point() {
        let mut d = unit_square();
        let root = only_id(&d);
        let split = d.get(root).unwrap().bisect(None).unwrap();
        let ids = d.replace(split.into_children(), &[root]).unwrap();
        let lower = d.get(ids[0]).unwrap().clone();
        // Force a point belonging to the upper half into the lower region
        let mut bogus = lower.with_point(&[0.5, 0.5]).unwrap();
        std::mem::swap(&mut bogus, d.get_mut(ids[0]).unwrap());
        assert!(matches!(d.check_invariants(), Err(MmoError::Invariant(_))));
    }

    #[test]
    fn test_display() {
        let d = unit_square();
        let s = format!("{}", d);
        assert!(s.starts_with("# domain"));
        assert!(s.contains("regions: 1"));
    }
}
