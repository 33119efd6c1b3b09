use loom_tensor::Tensor;

/// Mean squared error: `(1/n) * sum((pred - target)^2)`.
pub fn mse_loss(pred: &Tensor, target: &Tensor) -> f64 {
    pred.sub(target).square().mean()
}

/// Gradient of MSE w.r.t. predictions: `(2/n) * (pred - target)`.
pub fn mse_loss_grad(pred: &Tensor, target: &Tensor) -> Tensor {
    pred.sub(target).scale(2.0 / pred.numel() as f64)
}

/// Row-wise `log(sum(exp(x)))`, stabilised by the row max.
fn log_sum_exp(row: &[f64]) -> f64 {
    let max_val = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    max_val + row.iter().map(|&v| (v - max_val).exp()).sum::<f64>().ln()
}

/// Softmax followed by mean cross-entropy against integer labels.
///
/// Rows whose label equals `ignore_label` contribute neither loss nor
/// gradient; the mean is taken over the remaining rows.
pub struct SoftmaxWithLoss {
    pub ignore_label: Option<usize>,
    cache: Option<LossCache>,
}

struct LossCache {
    probs: Tensor,
    labels: Vec<usize>,
    count: usize,
}

impl SoftmaxWithLoss {
    pub fn new() -> Self {
        Self {
            ignore_label: None,
            cache: None,
        }
    }

    pub fn with_ignore_label(label: usize) -> Self {
        Self {
            ignore_label: Some(label),
            cache: None,
        }
    }

    /// `scores`: `(batch, classes)`; `labels`: one class id per row.
    pub fn forward(&mut self, scores: &Tensor, labels: &[usize]) -> f64 {
        assert_eq!(
            scores.rows(),
            labels.len(),
            "SoftmaxWithLoss: {} score rows but {} labels",
            scores.rows(),
            labels.len()
        );
        let classes = scores.cols();
        let mut total = 0.0;
        let mut count = 0;
        for (r, &label) in labels.iter().enumerate() {
            if Some(label) == self.ignore_label {
                continue;
            }
            assert!(label < classes, "label {label} out of range for {classes} classes");
            let row = scores.row(r);
            total += log_sum_exp(row) - row[label];
            count += 1;
        }

        self.cache = Some(LossCache {
            probs: scores.softmax_rows(),
            labels: labels.to_vec(),
            count,
        });

        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    /// Gradient w.r.t. the scores, scaled by the upstream gradient `dout`.
    pub fn backward(&mut self, dout: f64) -> Tensor {
        let cache = self
            .cache
            .as_ref()
            .expect("SoftmaxWithLoss: must call forward before backward");
        let mut grad = cache.probs.clone();
        let cols = grad.cols();
        let scale = if cache.count == 0 {
            0.0
        } else {
            dout / cache.count as f64
        };

        let data = grad.data_mut();
        for (r, &label) in cache.labels.iter().enumerate() {
            let row = &mut data[r * cols..(r + 1) * cols];
            if Some(label) == self.ignore_label {
                row.iter_mut().for_each(|v| *v = 0.0);
                continue;
            }
            row[label] -= 1.0;
            row.iter_mut().for_each(|v| *v *= scale);
        }
        grad
    }
}

impl Default for SoftmaxWithLoss {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean cross-entropy of `scores` against `labels`, without caching.
pub fn cross_entropy_loss(scores: &Tensor, labels: &[usize]) -> f64 {
    SoftmaxWithLoss::new().forward(scores, labels)
}
