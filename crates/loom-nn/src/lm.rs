use loom_tensor::Tensor;
use tracing::info;

use crate::module::scoped;
use crate::recurrent::LstmCell;
use crate::seq2seq::EMBEDDING_SCALE;
use crate::time::{TimeAffine, TimeDropout, TimeEmbedding, TimeLstm, TimeSoftmaxWithLoss};
use crate::{Affine, Dropout, Embedding, LmConfig, Parameter, Rng, TimeModule};

/// LSTM language model: embedding, stateful LSTM, dropout, affine scores.
///
/// The LSTM keeps its state between calls so consecutive mini-batches of a
/// corpus form one long sequence (truncated BPTT). Call
/// [`reset_state`](Self::reset_state) at epoch boundaries.
pub struct LstmLm {
    embed: TimeEmbedding,
    lstm: TimeLstm,
    dropout: TimeDropout,
    affine: TimeAffine,
    loss: TimeSoftmaxWithLoss,
}

impl LstmLm {
    pub fn new(config: &LmConfig) -> Self {
        let mut rng = Rng::new(config.seed);
        let (v, d, h) = (config.vocab_size, config.wordvec_size, config.hidden_size);
        let model = Self {
            embed: TimeEmbedding::new(Embedding::new(v, d, EMBEDDING_SCALE, &mut rng)),
            lstm: TimeLstm::new(LstmCell::new(d, h, config.weight_init, &mut rng), true),
            dropout: TimeDropout::new(Dropout::new(config.dropout, rng.fork())),
            affine: TimeAffine::new(Affine::new(h, v, config.weight_init, &mut rng)),
            loss: TimeSoftmaxWithLoss::new(),
        };
        info!(
            "built LSTM LM: vocab={v} hidden={h} dropout={} params={}",
            config.dropout,
            model.parameters().iter().map(|p| p.numel()).sum::<usize>()
        );
        model
    }

    /// Scores for every step of `xs`, without computing the loss.
    pub fn predict(&mut self, xs: &[Tensor]) -> Vec<Tensor> {
        let out = self.embed.forward(xs);
        let out = self.lstm.forward(&out);
        let out = self.dropout.forward(&out);
        self.affine.forward(&out)
    }

    pub fn forward(&mut self, xs: &[Tensor], ts: &[Tensor]) -> f64 {
        let scores = self.predict(xs);
        self.loss.forward(&scores, ts)
    }

    pub fn backward(&mut self) {
        let dout = self.loss.backward(1.0);
        let dout = self.affine.backward(&dout);
        let dout = self.dropout.backward(&dout);
        let dout = self.lstm.backward(&dout);
        self.embed.backward(&dout);
    }

    pub fn reset_state(&mut self) {
        self.lstm.reset_state();
    }

    /// Dropout is active only in training mode.
    pub fn set_training(&mut self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.embed.parameters();
        params.extend(self.lstm.parameters());
        params.extend(self.affine.parameters());
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.embed.parameters_mut();
        params.extend(self.lstm.parameters_mut());
        params.extend(self.affine.parameters_mut());
        params
    }

    pub fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        scoped("embed", self.embed.named_parameters())
            .chain(scoped("lstm", self.lstm.named_parameters()))
            .chain(scoped("affine", self.affine.named_parameters()))
            .collect()
    }
}
