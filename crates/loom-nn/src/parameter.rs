use loom_tensor::Tensor;

use crate::Rng;

/// A trainable parameter: a tensor with a gradient buffer of the same shape.
///
/// The gradient is always allocated. Layers add into it with
/// [`accumulate_grad`](Parameter::accumulate_grad); owners reset it with
/// [`zero_grad`](Parameter::zero_grad) before a fresh backward pass.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub data: Tensor,
    pub grad: Tensor,
}

impl Parameter {
    pub fn new(data: Tensor) -> Self {
        let grad = Tensor::zeros_like(&data);
        Self { data, grad }
    }

    /// Normal samples with standard deviation `scale`.
    pub fn randn(rows: usize, cols: usize, scale: f64, rng: &mut Rng) -> Self {
        let data = (0..rows * cols).map(|_| rng.normal() * scale).collect();
        Self::new(Tensor::new(data, rows, cols))
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(Tensor::zeros(rows, cols))
    }

    /// Add `grad` into the gradient buffer.
    pub fn accumulate_grad(&mut self, grad: &Tensor) {
        assert_eq!(
            self.grad.shape(),
            grad.shape(),
            "gradient shape {:?} does not match parameter shape {:?}",
            grad.shape(),
            self.data.shape()
        );
        self.grad.add_assign(grad);
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }

    pub fn numel(&self) -> usize {
        self.data.numel()
    }

    /// Replace the value, keeping the shape. The gradient is reset.
    pub fn assign(&mut self, data: Tensor) {
        assert_eq!(
            data.shape(),
            self.data.shape(),
            "cannot assign {:?} to a parameter of shape {:?}",
            data.shape(),
            self.data.shape()
        );
        self.data = data;
        self.zero_grad();
    }
}
