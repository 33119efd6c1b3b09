//! Shared helpers for loom benchmarks: seeded input generators.

use loom_nn::Rng;
use loom_tensor::Tensor;

/// Normal samples scaled by `scale`, shape `(rows, cols)`.
pub fn random_tensor(rows: usize, cols: usize, scale: f64, rng: &mut Rng) -> Tensor {
    let data = (0..rows * cols).map(|_| scale * rng.normal()).collect();
    Tensor::new(data, rows, cols)
}

/// `steps` random `(batch, features)` tensors.
pub fn random_sequence(
    steps: usize,
    batch: usize,
    features: usize,
    rng: &mut Rng,
) -> Vec<Tensor> {
    (0..steps)
        .map(|_| random_tensor(batch, features, 0.5, rng))
        .collect()
}

/// `steps` id columns of shape `(batch, 1)` drawn uniformly from `vocab`.
pub fn random_ids(steps: usize, batch: usize, vocab: usize, rng: &mut Rng) -> Vec<Tensor> {
    (0..steps)
        .map(|_| {
            let ids: Vec<usize> = (0..batch).map(|_| rng.below(vocab)).collect();
            Tensor::from_ids(&ids)
        })
        .collect()
}
