//! Continuous bag-of-words: predict a word from the mean embedding of the
//! words around it. The learned input table is the word-vector table.

use loom_tensor::Tensor;
use tracing::info;

use crate::module::scoped;
use crate::seq2seq::EMBEDDING_SCALE;
use crate::time::TimeEmbedding;
use crate::{CbowConfig, Embedding, Parameter, Rng, SoftmaxWithLoss, TimeModule};

pub struct Cbow {
    embed: TimeEmbedding,
    /// `[hidden, vocab]`, no bias.
    pub w_out: Parameter,
    loss: SoftmaxWithLoss,
    cache: Option<CbowCache>,
}

struct CbowCache {
    h: Tensor,
    window: usize,
}

impl Cbow {
    pub fn new(config: &CbowConfig) -> Self {
        let mut rng = Rng::new(config.seed);
        let (v, h) = (config.vocab_size, config.hidden_size);
        let model = Self {
            embed: TimeEmbedding::new(Embedding::new(v, h, EMBEDDING_SCALE, &mut rng)),
            w_out: Parameter::randn(h, v, EMBEDDING_SCALE, &mut rng),
            loss: SoftmaxWithLoss::new(),
            cache: None,
        };
        info!("built CBOW: vocab={v} hidden={h} params={}", 2 * v * h);
        model
    }

    /// Scores over the vocabulary for the word at the centre of each window.
    ///
    /// `contexts` holds one `(batch, 1)` id column per window position; all
    /// positions share the input embedding.
    pub fn predict(&mut self, contexts: &[Tensor]) -> Tensor {
        assert!(!contexts.is_empty(), "Cbow: need at least one context position");
        let window = contexts.len();
        let embedded = self.embed.forward(contexts);
        let mut h = embedded[0].clone();
        for e in &embedded[1..] {
            h.add_assign(e);
        }
        let h = h.scale(1.0 / window as f64);
        let scores = h.matmul(&self.w_out.data);
        self.cache = Some(CbowCache { h, window });
        scores
    }

    /// Mean cross-entropy against `target`, a `(batch, 1)` id column.
    pub fn forward(&mut self, contexts: &[Tensor], target: &Tensor) -> f64 {
        let scores = self.predict(contexts);
        self.loss.forward(&scores, &target.to_ids())
    }

    /// Overwrites both parameter gradients with those of the last forward.
    pub fn backward(&mut self) {
        let cache = self
            .cache
            .as_ref()
            .expect("Cbow: must call forward before backward");
        let dscores = self.loss.backward(1.0);

        self.w_out.zero_grad();
        self.w_out.accumulate_grad(&cache.h.transpose().matmul(&dscores));
        let dh = dscores
            .matmul(&self.w_out.data.transpose())
            .scale(1.0 / cache.window as f64);
        self.embed.backward(&vec![dh; cache.window]);
    }

    /// The input embedding table, one row per word.
    pub fn word_vectors(&self) -> &Tensor {
        &self.embed.layer.weight.data
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.embed.parameters();
        params.push(&self.w_out);
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.embed.parameters_mut();
        params.push(&mut self.w_out);
        params
    }

    pub fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        scoped("embed", self.embed.named_parameters())
            .chain(std::iter::once((String::from("out.weight"), &self.w_out)))
            .collect()
    }
}
