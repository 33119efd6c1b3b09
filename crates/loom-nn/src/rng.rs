/// Seeded random source shared by weight init, dropout masks and batch
/// shuffling.
///
/// No layer reaches for global randomness: a model built from the same
/// config seed draws the same weights and the same dropout masks.
///
/// ```
/// # use loom_nn::Rng;
/// let mut rng = Rng::new(7);
/// let weight = 0.01 * rng.normal();
/// let keep = !rng.bernoulli(0.5);
/// let dropout_seed = rng.fork();
/// # let _ = (weight, keep, dropout_seed);
/// ```
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
    spare_normal: Option<f64>,
}

// 64-bit LCG constants (Knuth, MMIX).
const LCG_MUL: u64 = 6364136223846793005;
const LCG_ADD: u64 = 1442695040888963407;

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed,
            spare_normal: None,
        }
    }

    fn advance(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(LCG_MUL).wrapping_add(LCG_ADD);
        self.state
    }

    /// Seed for a child generator, e.g. the mask source of a dropout layer.
    pub fn fork(&mut self) -> u64 {
        self.advance()
    }

    /// Uniform draw from `[0, 1)`, built from the top 53 bits.
    pub fn uniform(&mut self) -> f64 {
        const SCALE: f64 = 1.0 / (1u64 << 53) as f64;
        (self.advance() >> 11) as f64 * SCALE
    }

    /// Uniform index in `0..n`.
    pub fn below(&mut self, n: usize) -> usize {
        assert!(n > 0, "Rng::below: empty range");
        // The low bits of an LCG are weak; take the index from the high half.
        ((self.advance() >> 32) % n as u64) as usize
    }

    /// Standard normal sample. Box-Muller yields two per pair of uniforms,
    /// the second is kept for the next call.
    pub fn normal(&mut self) -> f64 {
        if let Some(z) = self.spare_normal.take() {
            return z;
        }
        let radius = (-2.0 * (1.0 - self.uniform()).ln()).sqrt();
        let angle = std::f64::consts::TAU * self.uniform();
        self.spare_normal = Some(radius * angle.sin());
        radius * angle.cos()
    }

    /// `true` with probability `p`; dropout drops a unit on `true`.
    pub fn bernoulli(&mut self, p: f64) -> bool {
        self.uniform() < p
    }

    /// Fisher-Yates shuffle, used to reorder batches each epoch.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            items.swap(i, self.below(i + 1));
        }
    }
}
