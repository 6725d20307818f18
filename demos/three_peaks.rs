//! Multimodal search on a distance-to-nearest-optimum landscape.
//!
//! Draws `n` random optima in the unit box, minimizes the distance to the
//! nearest one, and reports how many were recovered.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example three_peaks --release -- [n_optima] [dim] [seed]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use mmo_partition::MinimizerBuilder;

fn dist(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let n_optima: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(3);
    let dim: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(2);
    let seed: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(0);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let optima: Vec<Vec<f64>> = (0..n_optima)
        .map(|_| (0..dim).map(|_| rng.gen_range(0.05..0.95)).collect())
        .collect();

    let targets = optima.clone();
    let objective = move |x: &[f64]| {
        targets
            .iter()
            .map(|o| dist(x, o))
            .fold(f64::INFINITY, f64::min)
    };

    let bounds = vec![(0.0, 1.0); dim];
    let result = match MinimizerBuilder::new(objective, bounds)
        .max_iter(40 * n_optima)
        .max_feval(2_000_000)
        .tol(1e-6)
        .verbose(1)
        .seed(seed)
        .minimize()
    {
        Ok(r) => r,
        Err(e) => {
            eprintln!("run failed: {e}");
            std::process::exit(1);
        }
    };

    println!("{result}");

    let found = optima
        .iter()
        .filter(|o| result.solutions.iter().any(|s| dist(&s.x, o) < 1e-4))
        .count();
    println!("found {found} of {n_optima} optima");
    for o in &optima {
        let nearest = result
            .solutions
            .iter()
            .map(|s| dist(&s.x, o))
            .fold(f64::INFINITY, f64::min);
        println!("  {:?}: nearest solution at distance {:.3e}", o, nearest);
    }
}
