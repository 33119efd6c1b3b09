use loom_tensor::Tensor;

use crate::{Module, Parameter, Rng, WeightInit};

/// Fully-connected layer: `y = x·W + b`.
pub struct Affine {
    pub weight: Parameter, // [in_features, out_features]
    pub bias: Parameter,   // [1, out_features]
    cached_input: Option<Tensor>,
}

impl Affine {
    pub fn new(in_features: usize, out_features: usize, init: WeightInit, rng: &mut Rng) -> Self {
        Self::from_parameters(
            Parameter::randn(in_features, out_features, init.scale(in_features), rng),
            Parameter::zeros(1, out_features),
        )
    }

    pub fn from_parameters(weight: Parameter, bias: Parameter) -> Self {
        assert_eq!(
            bias.shape(),
            (1, weight.shape().1),
            "Affine: bias shape {:?} does not fit weight {:?}",
            bias.shape(),
            weight.shape()
        );
        Self {
            weight,
            bias,
            cached_input: None,
        }
    }

    pub fn in_features(&self) -> usize {
        self.weight.shape().0
    }

    pub fn out_features(&self) -> usize {
        self.weight.shape().1
    }
}

impl Module for Affine {
    fn forward(&mut self, input: &Tensor) -> Tensor {
        assert_eq!(
            input.cols(),
            self.in_features(),
            "Affine: input has {} features, expected {}",
            input.cols(),
            self.in_features()
        );
        self.cached_input = Some(input.clone());
        input.matmul(&self.weight.data).add(&self.bias.data)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Tensor {
        let input = self
            .cached_input
            .as_ref()
            .expect("Affine: must call forward before backward");

        // [in, batch] @ [batch, out] = [in, out]
        let grad_w = input.transpose().matmul(grad_output);
        self.weight.accumulate_grad(&grad_w);
        self.bias.accumulate_grad(&grad_output.sum_axis(0));

        grad_output.matmul(&self.weight.data.transpose())
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight, &self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight, &mut self.bias]
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        vec![
            (String::from("weight"), &self.weight),
            (String::from("bias"), &self.bias),
        ]
    }
}

/// ReLU activation layer.
#[derive(Default)]
pub struct ReLU {
    cached_input: Option<Tensor>,
}

impl ReLU {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for ReLU {
    fn forward(&mut self, input: &Tensor) -> Tensor {
        self.cached_input = Some(input.clone());
        input.relu()
    }

    fn backward(&mut self, grad_output: &Tensor) -> Tensor {
        let input = self
            .cached_input
            .as_ref()
            .expect("ReLU: must call forward before backward");
        let mask = input.map(|v| if v > 0.0 { 1.0 } else { 0.0 });
        grad_output.mul(&mask)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }
}

/// Logistic sigmoid layer.
#[derive(Default)]
pub struct Sigmoid {
    cached_output: Option<Tensor>,
}

impl Sigmoid {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for Sigmoid {
    fn forward(&mut self, input: &Tensor) -> Tensor {
        let output = input.sigmoid();
        self.cached_output = Some(output.clone());
        output
    }

    fn backward(&mut self, grad_output: &Tensor) -> Tensor {
        let y = self
            .cached_output
            .as_ref()
            .expect("Sigmoid: must call forward before backward");
        grad_output.mul(&y.map(|s| s * (1.0 - s)))
    }

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }
}

/// Tanh activation layer.
#[derive(Default)]
pub struct Tanh {
    cached_output: Option<Tensor>,
}

impl Tanh {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for Tanh {
    fn forward(&mut self, input: &Tensor) -> Tensor {
        let output = input.tanh();
        self.cached_output = Some(output.clone());
        output
    }

    fn backward(&mut self, grad_output: &Tensor) -> Tensor {
        let output = self
            .cached_output
            .as_ref()
            .expect("Tanh: must call forward before backward");
        // d/dx tanh(x) = 1 - tanh(x)^2
        grad_output.mul(&output.map(|t| 1.0 - t * t))
    }

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }
}

/// Softmax over each row.
#[derive(Default)]
pub struct Softmax {
    cached_output: Option<Tensor>,
}

impl Softmax {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Module for Softmax {
    fn forward(&mut self, input: &Tensor) -> Tensor {
        let output = input.softmax_rows();
        self.cached_output = Some(output.clone());
        output
    }

    fn backward(&mut self, grad_output: &Tensor) -> Tensor {
        let y = self
            .cached_output
            .as_ref()
            .expect("Softmax: must call forward before backward");
        // dx = y * (dy - sum(dy * y))
        let dot = grad_output.mul(y).sum_axis(1);
        y.mul(&grad_output.sub(&dot))
    }

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }
}

/// Embedding lookup table.
///
/// Input: `(batch, 1)` column of token ids. Output: `(batch, embed_dim)`.
pub struct Embedding {
    pub weight: Parameter, // [vocab_size, embed_dim]
    cached_ids: Option<Vec<usize>>,
}

impl Embedding {
    pub fn new(vocab_size: usize, embed_dim: usize, scale: f64, rng: &mut Rng) -> Self {
        Self::from_parameter(Parameter::randn(vocab_size, embed_dim, scale, rng))
    }

    pub fn from_parameter(weight: Parameter) -> Self {
        Self {
            weight,
            cached_ids: None,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.shape().0
    }

    pub fn embed_dim(&self) -> usize {
        self.weight.shape().1
    }
}

impl Module for Embedding {
    fn forward(&mut self, input: &Tensor) -> Tensor {
        assert_eq!(input.cols(), 1, "Embedding input must be a (batch, 1) column of ids");
        let ids = input.to_ids();
        let vocab = self.vocab_size();
        let dim = self.embed_dim();

        let mut out = Vec::with_capacity(ids.len() * dim);
        for &id in &ids {
            assert!(id < vocab, "Embedding: id {id} out of range for vocabulary {vocab}");
            out.extend_from_slice(self.weight.data.row(id));
        }
        self.cached_ids = Some(ids);
        Tensor::new(out, input.rows(), dim)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Tensor {
        let ids = self
            .cached_ids
            .as_ref()
            .expect("Embedding: must call forward before backward");

        // Scatter-add each row back to its id.
        let dim = self.embed_dim();
        let mut grad_w = Tensor::zeros(self.vocab_size(), dim);
        let data = grad_w.data_mut();
        for (r, &id) in ids.iter().enumerate() {
            for (g, &d) in data[id * dim..(id + 1) * dim].iter_mut().zip(grad_output.row(r)) {
                *g += d;
            }
        }
        self.weight.accumulate_grad(&grad_w);

        // No meaningful gradient for integer indices
        Tensor::zeros(ids.len(), 1)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.weight]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.weight]
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        vec![(String::from("weight"), &self.weight)]
    }
}

/// Inverted dropout: during training each element is zeroed with
/// probability `p` and survivors are scaled by `1/(1-p)`. Identity in eval.
pub struct Dropout {
    pub p: f64,
    pub training: bool,
    rng: Rng,
    cached_mask: Option<Tensor>,
}

impl Dropout {
    pub fn new(p: f64, seed: u64) -> Self {
        assert!((0.0..1.0).contains(&p), "dropout probability must be in [0, 1)");
        Self {
            p,
            training: true,
            rng: Rng::new(seed),
            cached_mask: None,
        }
    }
}

impl Module for Dropout {
    fn forward(&mut self, input: &Tensor) -> Tensor {
        if !self.training || self.p == 0.0 {
            self.cached_mask = None;
            return input.clone();
        }

        let scale = 1.0 / (1.0 - self.p);
        let (rows, cols) = input.shape();
        let mask_data = (0..input.numel())
            .map(|_| if self.rng.bernoulli(self.p) { 0.0 } else { scale })
            .collect();
        let mask = Tensor::new(mask_data, rows, cols);
        let output = input.mul(&mask);
        self.cached_mask = Some(mask);
        output
    }

    fn backward(&mut self, grad_output: &Tensor) -> Tensor {
        match &self.cached_mask {
            Some(mask) => grad_output.mul(mask),
            None => grad_output.clone(),
        }
    }

    fn parameters(&self) -> Vec<&Parameter> {
        Vec::new()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Vec::new()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

/// Chains modules in order.
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    pub fn new(layers: Vec<Box<dyn Module>>) -> Self {
        Self { layers }
    }

    /// Affine layers of the given widths with `activation` between them.
    ///
    /// `sizes = [2, 8, 1]` builds `Affine(2, 8) -> act -> Affine(8, 1)`.
    pub fn mlp(
        sizes: &[usize],
        init: WeightInit,
        activation: fn() -> Box<dyn Module>,
        rng: &mut Rng,
    ) -> Self {
        assert!(sizes.len() >= 2, "mlp needs at least input and output widths");
        let mut layers: Vec<Box<dyn Module>> = Vec::new();
        for (i, pair) in sizes.windows(2).enumerate() {
            if i > 0 {
                layers.push(activation());
            }
            layers.push(Box::new(Affine::new(pair[0], pair[1], init, rng)));
        }
        Self::new(layers)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Module for Sequential {
    fn forward(&mut self, input: &Tensor) -> Tensor {
        let mut x = input.clone();
        for layer in &mut self.layers {
            x = layer.forward(&x);
        }
        x
    }

    fn backward(&mut self, grad_output: &Tensor) -> Tensor {
        let mut grad = grad_output.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad);
        }
        grad
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layers
            .iter_mut()
            .flat_map(|l| l.parameters_mut())
            .collect()
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                layer
                    .named_parameters()
                    .into_iter()
                    .map(move |(name, param)| (format!("{i}.{name}"), param))
            })
            .collect()
    }

    fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }
}
