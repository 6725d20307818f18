//! Local searches that converge beyond the bounding box.
//!
//! `(x - 2)^2` on `[0, 1]` has its minimum outside the box, so every CMA-ES run
//! ends out of bounds.

use mmo_partition::{MinimizerBuilder, MmoError, OutsidePolicy, Solution};

fn beyond(x: &[f64]) -> f64 {
    (x[0] - 2.0).powi(2)
}

#[test]
fn test_clamp_projects_onto_the_box() {
    let result = MinimizerBuilder::new(beyond, vec![(0.0, 1.0)])
        .max_iter(6)
        .outside(OutsidePolicy::Clamp)
        .check_invariants(true)
        .minimize()
        .unwrap();
    // Every later run re-converges onto the clamped point and is a duplicate
    assert_eq!(
        result.solutions,
        vec![Solution {
            x: vec![1.0],
            fun: 1.0
        }]
    );
}

#[test]
fn test_clamped_point_on_upper_face_has_an_owner() {
    let mut m = MinimizerBuilder::new(beyond, vec![(0.0, 1.0)])
        .max_iter(4)
        .build()
        .unwrap();
    m.minimize().unwrap();
    let owner = m.domain().get_region_with_point(&[1.0]).unwrap();
    let region = m.domain().get(owner).unwrap();
    assert_eq!(region.point(), Some(&[1.0][..]));
    assert_eq!(region.ur(), &[1.0]);
    // Duplicates landed here and marked the region
    assert!(region.duplicates() >= 1);
}

#[test]
fn test_discard_records_nothing() {
    let mut m = MinimizerBuilder::new(beyond, vec![(0.0, 1.0)])
        .max_iter(5)
        .outside(OutsidePolicy::Discard)
        .check_invariants(true)
        .build()
        .unwrap();
    let result = m.minimize().unwrap();
    assert!(result.solutions.is_empty());
    assert_eq!(m.domain().len(), 6);
    assert!(m.domain().regions().all(|(_, r)| r.penalty() >= 1));
}

#[test]
fn test_fatal_aborts_run() {
    let mut m = MinimizerBuilder::new(beyond, vec![(0.0, 1.0)])
        .max_iter(5)
        .outside(OutsidePolicy::Fatal)
        .build()
        .unwrap();
    match m.minimize() {
        Err(MmoError::OutsideDomain { x }) => assert!(x[0] > 1.0),
        other => panic!("expected OutsideDomain, got {:?}", other),
    }
    assert!(m.is_terminal());
    assert!(m.next().is_none());
    assert_eq!(m.domain().len(), 1);
}
