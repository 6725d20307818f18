//! End-to-end scenarios with the CMA-ES local search.
//!
//! - three well-separated optima of a distance-to-nearest-optimum objective in 2-D
//! - a single quadratic optimum in 1-D, which must be reported exactly once
//! - determinism: identical seeds give byte-identical serialized results,
//!   with or without parallel generation evaluation

use mmo_partition::{MinimizeResult, MinimizerBuilder, Region, RegionId, StopReason};

// ─────────────────────────────────────────────────────────────────────────────
// Objective functions
// ─────────────────────────────────────────────────────────────────────────────

const PEAKS: [[f64; 2]; 3] = [[0.2, 0.2], [0.5, 0.8], [0.9, 0.1]];

fn dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Distance to the nearest of the three peaks; every peak is a global minimum.
fn three_peaks(x: &[f64]) -> f64 {
    PEAKS
        .iter()
        .map(|p| dist(x, p))
        .fold(f64::INFINITY, f64::min)
}

fn shifted_quadratic(x: &[f64]) -> f64 {
    (x[0] - 1.3).powi(2)
}

fn run_three_peaks(seed: u64, parallel: bool) -> MinimizeResult {
    MinimizerBuilder::new(three_peaks, vec![(0.0, 1.0), (0.0, 1.0)])
        .max_iter(60)
        .max_feval(400_000)
        .tol(1e-6)
        .seed(seed)
        .parallel(parallel)
        .check_invariants(true)
        .minimize()
        .expect("three peaks run")
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_three_peaks_all_found() {
    let result = run_three_peaks(0, false);
    assert_eq!(result.stop_reason, StopReason::MaxIterExceeded);
    assert_eq!(result.nit, 60);
    assert_eq!(result.n_local_solves, 60);

    for peak in &PEAKS {
        let hit = result.solutions.iter().any(|s| dist(&s.x, peak) < 1e-4);
        assert!(hit, "peak {:?} not found in {:?}", peak, result.solutions);
    }
    // Re-convergences onto a known peak are discarded
    for (i, a) in result.solutions.iter().enumerate() {
        for b in &result.solutions[i + 1..] {
            assert!(dist(&a.x, &b.x) >= 1e-6);
        }
    }
    let best = result.best().unwrap();
    assert!(best.fun < 1e-4);
}

#[test]
fn test_single_optimum_reported_once() {
    let run = |seed: u64| {
        let mut minimizer = MinimizerBuilder::new(shifted_quadratic, vec![(0.0, 2.0)])
            .max_iter(200)
            .seed(seed)
            .build()
            .unwrap();
        let result = minimizer.minimize().unwrap();
        let regions: Vec<(RegionId, Region)> = minimizer
            .domain()
            .regions()
            .map(|(id, r)| (id, r.clone()))
            .collect();
        (result, regions)
    };

    for seed in 0..3 {
        let (result, regions) = run(seed);
        assert_eq!(result.nit, 200);
        assert_eq!(
            result.solutions.len(),
            1,
            "seed {}: optimum reported as {:?}",
            seed,
            result.solutions
        );
        let only = &result.solutions[0];
        assert!((only.x[0] - 1.3).abs() < 1e-8, "x = {:?}", only.x);
        assert!(only.fun < 1e-16);

        let (again, regions_again) = run(seed);
        assert_eq!(result, again);
        assert_eq!(regions, regions_again);
    }
}

#[test]
fn test_iteration_reports_are_monotone() {
    let minimizer = MinimizerBuilder::new(three_peaks, vec![(0.0, 1.0), (0.0, 1.0)])
        .max_iter(15)
        .tol(1e-6)
        .build()
        .unwrap();
    let mut last_nfev = 0;
    let mut last_solutions = 0;
    let mut count = 0;
    for report in minimizer {
        let report = report.unwrap();
        assert!(report.nfev > last_nfev);
        assert!(report.solutions.len() >= last_solutions);
        assert!(report.n_regions >= 2);
        last_nfev = report.nfev;
        last_solutions = report.solutions.len();
        count += 1;
    }
    assert_eq!(count, 15);
}

// ─────────────────────────────────────────────────────────────────────────────
// Determinism
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_same_seed_same_result() {
    let a = serde_json::to_string(&run_three_peaks(11, false)).unwrap();
    let b = serde_json::to_string(&run_three_peaks(11, false)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_parallel_matches_serial() {
    let serial = serde_json::to_string(&run_three_peaks(5, false)).unwrap();
    let parallel = serde_json::to_string(&run_three_peaks(5, true)).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn test_result_roundtrips_through_json() {
    let result = run_three_peaks(2, false);
    let json = serde_json::to_string_pretty(&result).unwrap();
    let back: MinimizeResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back.nfev, result.nfev);
    assert_eq!(back.nit, result.nit);
    assert_eq!(back.stop_reason, result.stop_reason);
    assert_eq!(back.solutions.len(), result.solutions.len());
    for (a, b) in back.solutions.iter().zip(result.solutions.iter()) {
        assert!(dist(&a.x, &b.x) < 1e-12);
        assert!((a.fun - b.fun).abs() < 1e-12);
    }
    assert!(json.contains("\"stop_reason\""));
}
