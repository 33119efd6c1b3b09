use loom_tensor::Tensor;
use tracing::{debug, info, warn};

use crate::data::SequenceBatch;
use crate::lm::LstmLm;
use crate::optimizer::clip_grad_norm;
use crate::seq2seq::{Seq2Seq, SequenceDecoder, SequenceEncoder};
use crate::{Optimizer, Parameter, TrainerConfig};

/// A model trained on `(inputs, targets)` sequence batches.
pub trait SequenceModel {
    /// Loss for one batch; caches what `backward` needs.
    fn forward(&mut self, xs: &[Tensor], ts: &[Tensor]) -> f64;

    /// Fill every parameter's gradient for the last forward call.
    fn backward(&mut self);

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    /// Called at the start of every epoch.
    fn reset_state(&mut self) {}

    /// Dropout and similar layers act only in training mode.
    fn set_training(&mut self, _training: bool) {}
}

impl<E, D> SequenceModel for Seq2Seq<E, D>
where
    E: SequenceEncoder,
    D: SequenceDecoder<Context = E::Summary>,
{
    fn forward(&mut self, xs: &[Tensor], ts: &[Tensor]) -> f64 {
        Seq2Seq::forward(self, xs, ts)
    }

    fn backward(&mut self) {
        Seq2Seq::backward(self);
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Seq2Seq::parameters_mut(self)
    }
}

impl SequenceModel for LstmLm {
    fn forward(&mut self, xs: &[Tensor], ts: &[Tensor]) -> f64 {
        LstmLm::forward(self, xs, ts)
    }

    fn backward(&mut self) {
        LstmLm::backward(self);
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        LstmLm::parameters_mut(self)
    }

    fn reset_state(&mut self) {
        LstmLm::reset_state(self);
    }

    fn set_training(&mut self, training: bool) {
        LstmLm::set_training(self, training);
    }
}

/// `exp(loss)` for a mean cross-entropy loss.
pub fn perplexity(loss: f64) -> f64 {
    loss.exp()
}

/// Fraction of rows whose highest score is at the label's column.
pub fn accuracy(scores: &Tensor, labels: &[usize]) -> f64 {
    assert_eq!(
        scores.rows(),
        labels.len(),
        "accuracy: {} score rows but {} labels",
        scores.rows(),
        labels.len()
    );
    if labels.is_empty() {
        return 0.0;
    }
    let hits = scores
        .argmax_rows()
        .iter()
        .zip(labels)
        .filter(|(pred, label)| pred == label)
        .count();
    hits as f64 / labels.len() as f64
}

/// Training loop over prepared batches.
///
/// ```ignore
/// let losses = Trainer::new(&mut model, Adam::new(0.001))
///     .epochs(25)
///     .max_grad_norm(5.0)
///     .fit(&batches);
/// ```
pub struct Trainer<'a, M, O>
where
    M: SequenceModel,
    O: Optimizer,
{
    model: &'a mut M,
    optimizer: O,
    num_epochs: usize,
    max_grad_norm: Option<f64>,
}

impl<'a, M: SequenceModel> Trainer<'a, M, Box<dyn Optimizer>> {
    pub fn from_config(model: &'a mut M, config: &TrainerConfig) -> Self {
        let mut trainer = Self::new(model, config.build_optimizer()).epochs(config.epochs);
        trainer.max_grad_norm = config.max_grad_norm;
        trainer
    }
}

impl<'a, M, O> Trainer<'a, M, O>
where
    M: SequenceModel,
    O: Optimizer,
{
    pub fn new(model: &'a mut M, optimizer: O) -> Self {
        Self {
            model,
            optimizer,
            num_epochs: 10,
            max_grad_norm: None,
        }
    }

    pub fn epochs(mut self, n: usize) -> Self {
        self.num_epochs = n;
        self
    }

    /// Clip the global gradient norm before every update.
    pub fn max_grad_norm(mut self, norm: f64) -> Self {
        self.max_grad_norm = Some(norm);
        self
    }

    pub fn optimizer_mut(&mut self) -> &mut O {
        &mut self.optimizer
    }

    /// One update per batch. Returns the mean loss of each epoch.
    pub fn fit(&mut self, batches: &[SequenceBatch]) -> Vec<f64> {
        (0..self.num_epochs)
            .filter_map(|epoch| self.fit_epoch(epoch, batches))
            .collect()
    }

    /// One pass over `batches`. `None` when there are no batches.
    pub fn fit_epoch(&mut self, epoch: usize, batches: &[SequenceBatch]) -> Option<f64> {
        if batches.is_empty() {
            return None;
        }
        self.model.set_training(true);
        self.model.reset_state();
        let mut total = 0.0;
        let mut max_norm: f64 = 0.0;
        for (i, (xs, ts)) in batches.iter().enumerate() {
            let loss = self.model.forward(xs, ts);
            self.model.backward();

            let mut params = self.model.parameters_mut();
            if let Some(limit) = self.max_grad_norm {
                let norm = clip_grad_norm(&mut params, limit);
                max_norm = max_norm.max(norm);
            }
            self.optimizer.step(&mut params);

            debug!("epoch {epoch} batch {i}: loss={loss:.6}");
            total += loss;
        }

        let mean = total / batches.len() as f64;
        if mean.is_finite() {
            info!(
                "epoch {epoch}: loss={mean:.4} ppl={:.2} max_grad_norm={max_norm:.3}",
                perplexity(mean)
            );
        } else {
            warn!("epoch {epoch}: loss is not finite ({mean})");
        }
        Some(mean)
    }

    /// Mean loss over `batches` in eval mode, without updating parameters.
    pub fn evaluate(&mut self, batches: &[SequenceBatch]) -> f64 {
        if batches.is_empty() {
            return 0.0;
        }
        self.model.set_training(false);
        self.model.reset_state();
        let total: f64 = batches
            .iter()
            .map(|(xs, ts)| self.model.forward(xs, ts))
            .sum();
        total / batches.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{lm_batches, SequencePairs};
    use crate::{Adam, LmConfig, PlainSeq2Seq, Seq2SeqConfig, WeightInit};

    #[test]
    fn trainer_reduces_seq2seq_loss() {
        // Copy task: target is `start` followed by the source.
        let sources: Vec<Vec<usize>> = (0..8).map(|i| vec![1 + i % 3, 1 + (i / 3) % 3]).collect();
        let targets: Vec<Vec<usize>> = sources.iter().map(|s| vec![0, s[0], s[1]]).collect();
        let batches = SequencePairs::new(sources, targets).batches(4, None);

        let mut model = PlainSeq2Seq::new(&Seq2SeqConfig::new(4, 4, 8));
        let losses = Trainer::new(&mut model, Adam::new(0.05))
            .epochs(100)
            .max_grad_norm(5.0)
            .fit(&batches);

        assert_eq!(losses.len(), 100);
        assert!(
            losses[99] < losses[0] * 0.5,
            "trainer should reduce loss, first={} final={}",
            losses[0],
            losses[99]
        );
    }

    #[test]
    fn empty_batches_produce_no_epochs() {
        let mut model = PlainSeq2Seq::new(&Seq2SeqConfig::new(4, 4, 8));
        let losses = Trainer::new(&mut model, Adam::new(0.05)).epochs(3).fit(&[]);
        assert!(losses.is_empty());
    }

    #[test]
    fn evaluate_disables_dropout() {
        let corpus: Vec<usize> = (0..40).map(|i| i % 5).collect();
        let batches = lm_batches(&corpus, 2, 4);
        let mut lm = LstmLm::new(&LmConfig {
            vocab_size: 5,
            wordvec_size: 4,
            hidden_size: 6,
            weight_init: WeightInit::Xavier,
            dropout: 0.5,
            seed: 9,
        });
        let mut trainer = Trainer::new(&mut lm, Adam::new(0.01)).epochs(1);
        let first = trainer.evaluate(&batches);
        let second = trainer.evaluate(&batches);
        assert_eq!(first, second);

        // Training switches dropout back on, and evaluation stays repeatable.
        trainer.fit(&batches);
        assert_eq!(trainer.evaluate(&batches), trainer.evaluate(&batches));
    }

    #[test]
    fn accuracy_counts_argmax_hits() {
        let labels = [0, 1, 1];
        let rows = |r: [[f64; 2]; 3]| Tensor::from_rows(&[&r[0], &r[1], &r[2]]);
        assert_eq!(accuracy(&rows([[0.0, 1.0], [1.0, 0.0], [1.0, 0.0]]), &labels), 0.0);
        assert_eq!(accuracy(&rows([[0.0, 1.0], [1.0, 0.0], [0.0, 1.0]]), &labels), 1.0 / 3.0);
        assert_eq!(accuracy(&rows([[0.0, 1.0], [0.0, 1.0], [0.0, 1.0]]), &labels), 2.0 / 3.0);
        assert_eq!(accuracy(&rows([[1.0, 0.0], [0.0, 1.0], [0.0, 1.0]]), &labels), 1.0);
    }

    #[test]
    fn perplexity_of_uniform() {
        assert!((perplexity(10f64.ln()) - 10.0).abs() < 1e-9);
    }
}
