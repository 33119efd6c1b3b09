use crate::Parameter;

/// Updates parameters in place from their gradient buffers.
///
/// Per-parameter state is paired positionally, so callers must pass the
/// same parameters in the same order on every step.
pub trait Optimizer {
    fn step(&mut self, params: &mut [&mut Parameter]);

    /// Update the learning rate.
    fn set_lr(&mut self, lr: f64);
}

impl<O: Optimizer + ?Sized> Optimizer for Box<O> {
    fn step(&mut self, params: &mut [&mut Parameter]) {
        (**self).step(params);
    }

    fn set_lr(&mut self, lr: f64) {
        (**self).set_lr(lr);
    }
}

/// Lazily size one state buffer per parameter.
fn init_state(state: &mut Vec<Vec<f64>>, params: &[&mut Parameter]) {
    if state.is_empty() {
        state.extend(params.iter().map(|p| vec![0.0; p.numel()]));
    }
    assert_eq!(
        state.len(),
        params.len(),
        "optimizer was initialised for {} parameters, got {}",
        state.len(),
        params.len()
    );
}

/// Plain stochastic gradient descent.
pub struct Sgd {
    pub lr: f64,
}

impl Sgd {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl Optimizer for Sgd {
    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn step(&mut self, params: &mut [&mut Parameter]) {
        for p in params.iter_mut() {
            let Parameter { data, grad } = &mut **p;
            for (w, &g) in data.data_mut().iter_mut().zip(grad.data()) {
                *w -= self.lr * g;
            }
        }
    }
}

/// SGD with momentum: `v = m*v - lr*g; w += v`.
pub struct Momentum {
    pub lr: f64,
    pub momentum: f64,
    velocity: Vec<Vec<f64>>,
}

impl Momentum {
    pub fn new(lr: f64, momentum: f64) -> Self {
        Self {
            lr,
            momentum,
            velocity: Vec::new(),
        }
    }
}

impl Optimizer for Momentum {
    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn step(&mut self, params: &mut [&mut Parameter]) {
        init_state(&mut self.velocity, params);
        for (p, vel) in params.iter_mut().zip(self.velocity.iter_mut()) {
            let Parameter { data, grad } = &mut **p;
            for ((w, &g), v) in data.data_mut().iter_mut().zip(grad.data()).zip(vel.iter_mut()) {
                *v = self.momentum * *v - self.lr * g;
                *w += *v;
            }
        }
    }
}

/// AdaGrad: per-element learning rates from accumulated squared gradients.
pub struct AdaGrad {
    pub lr: f64,
    pub epsilon: f64,
    h: Vec<Vec<f64>>,
}

impl AdaGrad {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            epsilon: 1e-7,
            h: Vec::new(),
        }
    }
}

impl Optimizer for AdaGrad {
    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn step(&mut self, params: &mut [&mut Parameter]) {
        init_state(&mut self.h, params);
        for (p, hist) in params.iter_mut().zip(self.h.iter_mut()) {
            let Parameter { data, grad } = &mut **p;
            for ((w, &g), h) in data.data_mut().iter_mut().zip(grad.data()).zip(hist.iter_mut()) {
                *h += g * g;
                *w -= self.lr * g / (h.sqrt() + self.epsilon);
            }
        }
    }
}

/// Adam optimizer.
pub struct Adam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    m: Vec<Vec<f64>>,
    v: Vec<Vec<f64>>,
    t: usize,
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Self::with_betas(lr, 0.9, 0.999)
    }

    pub fn with_betas(lr: f64, beta1: f64, beta2: f64) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon: 1e-8,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }
}

impl Optimizer for Adam {
    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn step(&mut self, params: &mut [&mut Parameter]) {
        self.t += 1;
        init_state(&mut self.m, params);
        init_state(&mut self.v, params);

        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        for (i, p) in params.iter_mut().enumerate() {
            let Parameter { data, grad } = &mut **p;
            let data = data.data_mut();
            let grad = grad.data();
            for j in 0..data.len() {
                let g = grad[j];
                self.m[i][j] = self.beta1 * self.m[i][j] + (1.0 - self.beta1) * g;
                self.v[i][j] = self.beta2 * self.v[i][j] + (1.0 - self.beta2) * g * g;
                let m_hat = self.m[i][j] / bc1;
                let v_hat = self.v[i][j] / bc2;
                data[j] -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
            }
        }
    }
}

/// Scale all gradients so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm(params: &mut [&mut Parameter], max_norm: f64) -> f64 {
    let total: f64 = params
        .iter()
        .map(|p| p.grad.data().iter().map(|g| g * g).sum::<f64>())
        .sum::<f64>()
        .sqrt();
    let rate = max_norm / (total + 1e-6);
    if rate < 1.0 {
        for p in params.iter_mut() {
            p.grad.data_mut().iter_mut().for_each(|g| *g *= rate);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_tensor::Tensor;

    /// Minimise `sum(w^2)` from `w = [3, -2]`.
    fn quadratic_descent(opt: &mut dyn Optimizer, steps: usize) -> f64 {
        let mut p = Parameter::new(Tensor::row_vector(&[3.0, -2.0]));
        for _ in 0..steps {
            p.zero_grad();
            let g = p.data.scale(2.0);
            p.accumulate_grad(&g);
            opt.step(&mut [&mut p]);
        }
        p.data.square().sum()
    }

    #[test]
    fn sgd_converges() {
        assert!(quadratic_descent(&mut Sgd::new(0.1), 100) < 1e-6);
    }

    #[test]
    fn momentum_converges() {
        assert!(quadratic_descent(&mut Momentum::new(0.05, 0.9), 300) < 1e-4);
    }

    #[test]
    fn adagrad_converges() {
        assert!(quadratic_descent(&mut AdaGrad::new(0.5), 300) < 1e-3);
    }

    #[test]
    fn adam_converges() {
        assert!(quadratic_descent(&mut Adam::new(0.1), 500) < 1e-2);
    }

    #[test]
    fn sgd_single_step() {
        let mut p = Parameter::new(Tensor::row_vector(&[1.0, 2.0]));
        p.accumulate_grad(&Tensor::row_vector(&[0.5, -1.0]));
        Sgd::new(0.1).step(&mut [&mut p]);
        assert!(p.data.approx_eq(&Tensor::row_vector(&[0.95, 2.1]), 1e-12));
    }

    #[test]
    fn clipping_bounds_norm() {
        let mut a = Parameter::zeros(1, 2);
        let mut b = Parameter::zeros(1, 1);
        a.accumulate_grad(&Tensor::row_vector(&[3.0, 0.0]));
        b.accumulate_grad(&Tensor::scalar(4.0));
        let norm = clip_grad_norm(&mut [&mut a, &mut b], 1.0);
        assert!((norm - 5.0).abs() < 1e-12);
        let clipped = (a.grad.square().sum() + b.grad.square().sum()).sqrt();
        assert!(clipped <= 1.0 + 1e-9);
        assert!((a.grad.get(0, 0) / b.grad.get(0, 0) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn clipping_leaves_small_grads() {
        let mut a = Parameter::zeros(1, 1);
        a.accumulate_grad(&Tensor::scalar(0.5));
        clip_grad_norm(&mut [&mut a], 1.0);
        assert_eq!(a.grad.get(0, 0), 0.5);
    }
}
