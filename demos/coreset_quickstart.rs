use hilbert_coresets::{CoresetConfig, GreedyCoreset, PolicyKind};
use rand::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut rng = StdRng::seed_from_u64(42);
    let dim = 20;

    // 5,000 synthetic gradient vectors standing in for a real dataset.
    let rows: Vec<Vec<f64>> = (0..5_000)
        .map(|_| (0..dim).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect())
        .collect();

    // GIGA with cap-tree candidate selection.
    let mut alg = GreedyCoreset::new(
        rows,
        CoresetConfig::new(PolicyKind::Giga).with_cap_tree(),
    )?;

    for m in [10, 50, 200] {
        alg.run(m);
        let size = alg.weights().iter().filter(|w| **w > 0.0).count();
        println!(
            "M = {m:>3}: coreset size {size:>3}, error {:.6e}, sqrt bound {:.6e}",
            alg.error(),
            alg.sqrt_bound()
        );
    }
    Ok(())
}
