//! Encoder/decoder composites and the sequence-to-sequence model.
//!
//! Token sequences are time-major: `xs[t]` is a `(batch, 1)` column of ids.
//! Decoder training uses teacher forcing: given target `ts`, the decoder reads
//! `ts[..T-1]` and is scored against `ts[1..]`.

use loom_tensor::Tensor;
use tracing::{debug, info};

use crate::module::scoped;
use crate::recurrent::LstmCell;
use crate::time::{TimeAffine, TimeEmbedding, TimeLstm, TimeSoftmaxWithLoss};
use crate::{
    Affine, Embedding, Parameter, Rng, Seq2SeqConfig, TimeAttention, TimeModule, WeightInit,
};

/// Standard deviation of the embedding tables.
pub(crate) const EMBEDDING_SCALE: f64 = 0.01;

/// Encodes a source sequence into whatever the paired decoder consumes.
pub trait SequenceEncoder {
    type Summary;

    fn encode(&mut self, xs: &[Tensor]) -> Self::Summary;

    /// Backpropagate the gradient w.r.t. the summary through the encoder.
    fn backward(&mut self, dsummary: &Self::Summary);

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn named_parameters(&self) -> Vec<(String, &Parameter)>;
}

/// Decodes target-side inputs into per-step vocabulary scores.
pub trait SequenceDecoder {
    type Context;

    fn forward(&mut self, xs: &[Tensor], context: &Self::Context) -> Vec<Tensor>;

    fn backward(&mut self, dscores: &[Tensor]);

    /// Gradient w.r.t. the context from the last backward call.
    fn context_gradient(&self) -> &Self::Context;

    /// Greedy decoding for a batch of one. Returns `length` ids, not
    /// including `start_id`.
    fn generate(&mut self, context: &Self::Context, start_id: usize, length: usize) -> Vec<usize>;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn named_parameters(&self) -> Vec<(String, &Parameter)>;
}

/// Embedding followed by an LSTM, shared by every composite below.
struct Stack {
    embed: TimeEmbedding,
    lstm: TimeLstm,
}

impl Stack {
    fn new(
        vocab: usize,
        wordvec: usize,
        hidden: usize,
        stateful: bool,
        init: WeightInit,
        rng: &mut Rng,
    ) -> Self {
        Self {
            embed: TimeEmbedding::new(Embedding::new(vocab, wordvec, EMBEDDING_SCALE, rng)),
            lstm: TimeLstm::new(LstmCell::new(wordvec, hidden, init, rng), stateful),
        }
    }

    fn forward(&mut self, xs: &[Tensor]) -> Vec<Tensor> {
        let es = self.embed.forward(xs);
        self.lstm.forward(&es)
    }

    fn backward(&mut self, dhs: &[Tensor]) {
        let des = self.lstm.backward(dhs);
        self.embed.backward(&des);
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.embed.parameters();
        params.extend(self.lstm.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.embed.parameters_mut();
        params.extend(self.lstm.parameters_mut());
        params
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        scoped("embed", self.embed.named_parameters())
            .chain(scoped("lstm", self.lstm.named_parameters()))
            .collect()
    }
}

fn token_step(id: usize) -> [Tensor; 1] {
    [Tensor::from_ids(&[id])]
}

/// Encoder whose summary is the final hidden state `(N, H)`.
pub struct Encoder {
    stack: Stack,
    last_steps: usize,
}

impl Encoder {
    pub fn new(config: &Seq2SeqConfig, rng: &mut Rng) -> Self {
        Self {
            stack: Stack::new(
                config.vocab_size,
                config.wordvec_size,
                config.hidden_size,
                false,
                config.weight_init,
                rng,
            ),
            last_steps: 0,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.stack.lstm.hidden_size()
    }
}

impl SequenceEncoder for Encoder {
    type Summary = Tensor;

    fn encode(&mut self, xs: &[Tensor]) -> Tensor {
        let hs = self.stack.forward(xs);
        self.last_steps = hs.len();
        hs.last()
            .cloned()
            .expect("Encoder: source sequence must not be empty")
    }

    /// `dh` reaches the last step only.
    fn backward(&mut self, dh: &Tensor) {
        let mut dhs = vec![Tensor::zeros_like(dh); self.last_steps];
        if let Some(last) = dhs.last_mut() {
            *last = dh.clone();
        }
        self.stack.backward(&dhs);
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.stack.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.stack.parameters_mut()
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        self.stack.named_parameters()
    }
}

/// Decoder seeded with the encoder's final hidden state.
pub struct Decoder {
    stack: Stack,
    affine: TimeAffine,
    dh: Option<Tensor>,
}

impl Decoder {
    pub fn new(config: &Seq2SeqConfig, rng: &mut Rng) -> Self {
        let (v, h) = (config.vocab_size, config.hidden_size);
        Self {
            stack: Stack::new(v, config.wordvec_size, h, true, config.weight_init, rng),
            affine: TimeAffine::new(Affine::new(h, v, config.weight_init, rng)),
            dh: None,
        }
    }

    /// Gradient w.r.t. the seeded hidden state.
    pub fn initial_state_gradient(&self) -> Option<&Tensor> {
        self.dh.as_ref()
    }
}

impl SequenceDecoder for Decoder {
    type Context = Tensor;

    fn forward(&mut self, xs: &[Tensor], h: &Tensor) -> Vec<Tensor> {
        self.stack.lstm.set_state(h.clone(), None);
        let hs = self.stack.forward(xs);
        self.affine.forward(&hs)
    }

    fn backward(&mut self, dscores: &[Tensor]) {
        let dhs = self.affine.backward(dscores);
        self.stack.backward(&dhs);
        self.dh = self.stack.lstm.dh().cloned();
    }

    fn context_gradient(&self) -> &Tensor {
        self.initial_state_gradient()
            .expect("Decoder: must call backward before reading the context gradient")
    }

    fn generate(&mut self, h: &Tensor, start_id: usize, length: usize) -> Vec<usize> {
        assert_eq!(h.rows(), 1, "Decoder: generation runs with a batch of one");
        self.stack.lstm.set_state(h.clone(), None);
        let mut sampled = Vec::with_capacity(length);
        let mut x = start_id;
        for _ in 0..length {
            let hs = self.stack.forward(&token_step(x));
            let scores = self.affine.forward(&hs);
            x = scores[0].argmax_rows()[0];
            sampled.push(x);
        }
        sampled
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.stack.parameters();
        params.extend(self.affine.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.stack.parameters_mut();
        params.extend(self.affine.parameters_mut());
        params
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        let mut named = self.stack.named_parameters();
        named.extend(scoped("affine", self.affine.named_parameters()));
        named
    }
}

/// Encoder whose summary is every hidden state, for attention.
pub struct AttentionEncoder {
    stack: Stack,
}

impl AttentionEncoder {
    pub fn new(config: &Seq2SeqConfig, rng: &mut Rng) -> Self {
        Self {
            stack: Stack::new(
                config.vocab_size,
                config.wordvec_size,
                config.hidden_size,
                false,
                config.weight_init,
                rng,
            ),
        }
    }
}

impl SequenceEncoder for AttentionEncoder {
    type Summary = Vec<Tensor>;

    fn encode(&mut self, xs: &[Tensor]) -> Vec<Tensor> {
        assert!(!xs.is_empty(), "AttentionEncoder: source sequence must not be empty");
        self.stack.forward(xs)
    }

    fn backward(&mut self, dhs: &Vec<Tensor>) {
        self.stack.backward(dhs);
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.stack.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.stack.parameters_mut()
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        self.stack.named_parameters()
    }
}

/// Decoder that attends over the full encoder output at every step and
/// scores `[context, h]` with a `2H -> V` affine layer.
pub struct AttentionDecoder {
    stack: Stack,
    attention: TimeAttention,
    affine: TimeAffine,
    denc_hs: Option<Vec<Tensor>>,
}

impl AttentionDecoder {
    pub fn new(config: &Seq2SeqConfig, rng: &mut Rng) -> Self {
        let (v, h) = (config.vocab_size, config.hidden_size);
        Self {
            stack: Stack::new(v, config.wordvec_size, h, true, config.weight_init, rng),
            attention: TimeAttention::new(),
            affine: TimeAffine::new(Affine::new(2 * h, v, config.weight_init, rng)),
            denc_hs: None,
        }
    }

    /// Attention weights of every decoder step from the last forward call.
    pub fn attention_weights(&self) -> Vec<&Tensor> {
        self.attention.weights()
    }

    fn attend(&mut self, enc_hs: &[Tensor], dec_hs: &[Tensor]) -> Vec<Tensor> {
        let cs = self.attention.forward(enc_hs, dec_hs);
        let rec: Vec<Tensor> = cs
            .iter()
            .zip(dec_hs)
            .map(|(c, h)| Tensor::hstack(&[c, h]))
            .collect();
        self.affine.forward(&rec)
    }

    fn seed(&mut self, enc_hs: &[Tensor]) {
        let last = enc_hs
            .last()
            .expect("AttentionDecoder: encoder output must not be empty");
        self.stack.lstm.set_state(last.clone(), None);
    }
}

impl SequenceDecoder for AttentionDecoder {
    type Context = Vec<Tensor>;

    fn forward(&mut self, xs: &[Tensor], enc_hs: &Vec<Tensor>) -> Vec<Tensor> {
        self.seed(enc_hs);
        let dec_hs = self.stack.forward(xs);
        self.attend(enc_hs, &dec_hs)
    }

    fn backward(&mut self, dscores: &[Tensor]) {
        let h = self.stack.lstm.hidden_size();
        let drec = self.affine.backward(dscores);
        let dcs: Vec<Tensor> = drec.iter().map(|d| d.slice_cols(0, h)).collect();

        let (mut denc_hs, ddec_from_attention) = self.attention.backward(&dcs);
        let ddec_hs: Vec<Tensor> = drec
            .iter()
            .zip(&ddec_from_attention)
            .map(|(d, da)| d.slice_cols(h, 2 * h).add(da))
            .collect();

        self.stack.backward(&ddec_hs);
        if let (Some(dh), Some(last)) = (self.stack.lstm.dh(), denc_hs.last_mut()) {
            last.add_assign(dh);
        }
        self.denc_hs = Some(denc_hs);
    }

    fn context_gradient(&self) -> &Vec<Tensor> {
        self.denc_hs
            .as_ref()
            .expect("AttentionDecoder: must call backward before reading the context gradient")
    }

    fn generate(&mut self, enc_hs: &Vec<Tensor>, start_id: usize, length: usize) -> Vec<usize> {
        assert!(
            enc_hs.iter().all(|h| h.rows() == 1),
            "AttentionDecoder: generation runs with a batch of one"
        );
        self.seed(enc_hs);
        let mut sampled = Vec::with_capacity(length);
        let mut x = start_id;
        for _ in 0..length {
            let dec_hs = self.stack.forward(&token_step(x));
            let scores = self.attend(enc_hs, &dec_hs);
            x = scores[0].argmax_rows()[0];
            sampled.push(x);
        }
        sampled
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.stack.parameters();
        params.extend(self.affine.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.stack.parameters_mut();
        params.extend(self.affine.parameters_mut());
        params
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        let mut named = self.stack.named_parameters();
        named.extend(scoped("affine", self.affine.named_parameters()));
        named
    }
}

/// Encoder, decoder and time softmax loss trained end to end.
pub struct Seq2Seq<E, D> {
    pub encoder: E,
    pub decoder: D,
    loss: TimeSoftmaxWithLoss,
}

pub type PlainSeq2Seq = Seq2Seq<Encoder, Decoder>;
pub type AttentionSeq2Seq = Seq2Seq<AttentionEncoder, AttentionDecoder>;

impl PlainSeq2Seq {
    pub fn new(config: &Seq2SeqConfig) -> Self {
        let mut rng = Rng::new(config.seed);
        let encoder = Encoder::new(config, &mut rng);
        let decoder = Decoder::new(config, &mut rng);
        let model = Self::from_parts(encoder, decoder);
        info!(
            "built seq2seq: vocab={} hidden={} params={}",
            config.vocab_size,
            config.hidden_size,
            model.num_parameters()
        );
        model
    }
}

impl AttentionSeq2Seq {
    pub fn new(config: &Seq2SeqConfig) -> Self {
        let mut rng = Rng::new(config.seed);
        let encoder = AttentionEncoder::new(config, &mut rng);
        let decoder = AttentionDecoder::new(config, &mut rng);
        let model = Self::from_parts(encoder, decoder);
        info!(
            "built attention seq2seq: vocab={} hidden={} params={}",
            config.vocab_size,
            config.hidden_size,
            model.num_parameters()
        );
        model
    }
}

impl<E, D> Seq2Seq<E, D>
where
    E: SequenceEncoder,
    D: SequenceDecoder<Context = E::Summary>,
{
    pub fn from_parts(encoder: E, decoder: D) -> Self {
        Self {
            encoder,
            decoder,
            loss: TimeSoftmaxWithLoss::new(),
        }
    }

    /// Exclude target positions labelled `label` (padding) from the loss.
    pub fn with_ignore_label(mut self, label: usize) -> Self {
        self.loss = TimeSoftmaxWithLoss::with_ignore_label(label);
        self
    }

    /// Mean cross-entropy of the decoder's predictions of `ts[1..]`.
    pub fn forward(&mut self, xs: &[Tensor], ts: &[Tensor]) -> f64 {
        assert!(
            ts.len() >= 2,
            "Seq2Seq: target sequence needs at least 2 steps, got {}",
            ts.len()
        );
        let (decoder_xs, decoder_ts) = (&ts[..ts.len() - 1], &ts[1..]);
        let summary = self.encoder.encode(xs);
        let scores = self.decoder.forward(decoder_xs, &summary);
        let loss = self.loss.forward(&scores, decoder_ts);
        debug!("seq2seq forward: src={} tgt={} loss={loss:.6}", xs.len(), ts.len());
        loss
    }

    /// Gradients of the last forward call's loss, accumulated into every
    /// parameter's buffer (previous gradients are cleared).
    pub fn backward(&mut self) {
        let dscores = self.loss.backward(1.0);
        self.decoder.backward(&dscores);
        let dsummary = self.decoder.context_gradient();
        self.encoder.backward(dsummary);
    }

    /// Encode `xs` (batch of one) and decode greedily from `start_id`.
    pub fn generate(&mut self, xs: &[Tensor], start_id: usize, length: usize) -> Vec<usize> {
        let summary = self.encoder.encode(xs);
        self.decoder.generate(&summary, start_id, length)
    }

    /// Encoder parameters followed by decoder parameters.
    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.encoder.parameters();
        params.extend(self.decoder.parameters());
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.encoder.parameters_mut();
        params.extend(self.decoder.parameters_mut());
        params
    }

    pub fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        scoped("encoder", self.encoder.named_parameters())
            .chain(scoped("decoder", self.decoder.named_parameters()))
            .collect()
    }

    /// Assign tensors positionally in [`parameters`](Self::parameters) order.
    pub fn set_parameters(&mut self, tensors: Vec<Tensor>) {
        let mut params = self.parameters_mut();
        assert_eq!(
            tensors.len(),
            params.len(),
            "set_parameters: {} tensors for {} parameters",
            tensors.len(),
            params.len()
        );
        for (p, t) in params.iter_mut().zip(tensors) {
            p.assign(t);
        }
    }

    pub fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(seq: &[usize]) -> Vec<Tensor> {
        seq.iter().map(|&id| Tensor::from_ids(&[id])).collect()
    }

    #[test]
    fn parameter_layout() {
        let model = AttentionSeq2Seq::new(&Seq2SeqConfig::new(3, 3, 3));
        let shapes: Vec<(usize, usize)> = model.parameters().iter().map(|p| p.shape()).collect();
        assert_eq!(
            shapes,
            vec![
                (3, 3),
                (3, 12),
                (3, 12),
                (1, 12),
                (3, 3),
                (3, 12),
                (3, 12),
                (1, 12),
                (6, 3),
                (1, 3),
            ]
        );
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names[0], "encoder.embed.weight");
        assert_eq!(names[1], "encoder.lstm.wx");
        assert_eq!(names[8], "decoder.affine.weight");
    }

    #[test]
    fn plain_decoder_scores_hidden_width() {
        let model = PlainSeq2Seq::new(&Seq2SeqConfig::new(5, 4, 6));
        let last = model.parameters();
        assert_eq!(last[last.len() - 2].shape(), (6, 5));
    }

    #[test]
    fn generate_excludes_start_id() {
        let mut model = PlainSeq2Seq::new(&Seq2SeqConfig::new(4, 3, 5));
        let out = model.generate(&ids(&[1, 2, 3]), 0, 6);
        assert_eq!(out.len(), 6);
        assert!(out.iter().all(|&id| id < 4));
        assert!(model.generate(&ids(&[1, 2, 3]), 0, 0).is_empty());
    }

    #[test]
    #[should_panic(expected = "at least 2 steps")]
    fn short_target_rejected() {
        let mut model = PlainSeq2Seq::new(&Seq2SeqConfig::new(4, 3, 5));
        model.forward(&ids(&[1, 2]), &ids(&[0]));
    }
}
