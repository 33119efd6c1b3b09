//! Dot-product attention over a fixed encoder sequence.
//!
//! Shapes: the encoder output `hs` is `T` tensors of `(N, H)`, a decoder
//! hidden state `h` is `(N, H)`, attention weights `a` are `(N, T)`.
//! None of these layers own parameters.

use loom_tensor::Tensor;

use crate::{Module, Softmax};

fn check_encoder_output(name: &str, hs: &[Tensor], h: &Tensor) {
    assert!(!hs.is_empty(), "{name}: encoder sequence must have at least one step");
    for (t, x) in hs.iter().enumerate() {
        assert_eq!(
            x.shape(),
            h.shape(),
            "{name}: encoder step {t} has shape {:?}, query has {:?}",
            x.shape(),
            h.shape()
        );
    }
}

/// Context vector as the attention-weighted sum of encoder states.
#[derive(Default)]
pub struct WeightSum {
    cache: Option<(Vec<Tensor>, Tensor)>,
}

impl WeightSum {
    pub fn new() -> Self {
        Self::default()
    }

    /// `context = sum_t a[:, t] * hs_t`
    pub fn forward(&mut self, hs: &[Tensor], a: &Tensor) -> Tensor {
        let first = hs.first().expect("WeightSum: encoder sequence must have at least one step");
        check_encoder_output("WeightSum", hs, first);
        let (n, _) = first.shape();
        assert_eq!(
            a.shape(),
            (n, hs.len()),
            "WeightSum: weights {:?} do not match batch {n} x steps {}",
            a.shape(),
            hs.len()
        );
        let mut context = Tensor::zeros_like(&hs[0]);
        for (t, h) in hs.iter().enumerate() {
            context.add_assign(&h.mul(&a.slice_cols(t, t + 1)));
        }
        self.cache = Some((hs.to_vec(), a.clone()));
        context
    }

    /// Returns `(dhs, da)`.
    pub fn backward(&mut self, dc: &Tensor) -> (Vec<Tensor>, Tensor) {
        let (hs, a) = self
            .cache
            .as_ref()
            .expect("WeightSum: must call forward before backward");
        let dhs = (0..hs.len())
            .map(|t| dc.mul(&a.slice_cols(t, t + 1)))
            .collect();
        let da_cols: Vec<Tensor> = hs.iter().map(|h| dc.mul(h).sum_axis(1)).collect();
        let parts: Vec<&Tensor> = da_cols.iter().collect();
        (dhs, Tensor::hstack(&parts))
    }
}

/// Alignment score `s[:, t] = sum_H(hs_t * h)`.
#[derive(Default)]
pub struct DotScore {
    cache: Option<(Vec<Tensor>, Tensor)>,
}

impl DotScore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, hs: &[Tensor], h: &Tensor) -> Tensor {
        check_encoder_output("DotScore", hs, h);
        let cols: Vec<Tensor> = hs.iter().map(|x| x.mul(h).sum_axis(1)).collect();
        let parts: Vec<&Tensor> = cols.iter().collect();
        self.cache = Some((hs.to_vec(), h.clone()));
        Tensor::hstack(&parts)
    }

    /// Returns `(dhs, dh)`.
    pub fn backward(&mut self, ds: &Tensor) -> (Vec<Tensor>, Tensor) {
        let (hs, h) = self
            .cache
            .as_ref()
            .expect("DotScore: must call forward before backward");
        let mut dh = Tensor::zeros_like(h);
        let mut dhs = Vec::with_capacity(hs.len());
        for (t, x) in hs.iter().enumerate() {
            let w = ds.slice_cols(t, t + 1);
            dhs.push(h.mul(&w));
            dh.add_assign(&x.mul(&w));
        }
        (dhs, dh)
    }
}

/// Attention weights: [`DotScore`] followed by a row softmax.
#[derive(Default)]
pub struct AttentionWeight {
    score: DotScore,
    softmax: Softmax,
}

impl AttentionWeight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(N, T)` rows that are probability distributions.
    pub fn forward(&mut self, hs: &[Tensor], h: &Tensor) -> Tensor {
        let s = self.score.forward(hs, h);
        self.softmax.forward(&s)
    }

    /// Returns `(dhs, dh)`.
    pub fn backward(&mut self, da: &Tensor) -> (Vec<Tensor>, Tensor) {
        let ds = self.softmax.backward(da);
        self.score.backward(&ds)
    }
}

/// One attention step: weights over `hs` for query `h`, then the weighted sum.
#[derive(Default)]
pub struct Attention {
    weight: AttentionWeight,
    sum: WeightSum,
    last_weights: Option<Tensor>,
}

impl Attention {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward(&mut self, hs: &[Tensor], h: &Tensor) -> Tensor {
        let a = self.weight.forward(hs, h);
        let context = self.sum.forward(hs, &a);
        self.last_weights = Some(a);
        context
    }

    /// Returns `(dhs, dh)`; `dhs` sums the score and weighted-sum paths.
    pub fn backward(&mut self, dc: &Tensor) -> (Vec<Tensor>, Tensor) {
        let (dhs_sum, da) = self.sum.backward(dc);
        let (dhs_score, dh) = self.weight.backward(&da);
        let dhs = dhs_sum
            .iter()
            .zip(&dhs_score)
            .map(|(a, b)| a.add(b))
            .collect();
        (dhs, dh)
    }

    /// Weights from the last forward call.
    pub fn weights(&self) -> Option<&Tensor> {
        self.last_weights.as_ref()
    }
}

/// Attention for every decoder step over the same encoder output.
#[derive(Default)]
pub struct TimeAttention {
    layers: Vec<Attention>,
    enc_steps: usize,
}

impl TimeAttention {
    pub fn new() -> Self {
        Self::default()
    }

    /// `hs_enc`: `T_enc` of `(N, H)`; `hs_dec`: `T_dec` of `(N, H)`.
    /// Returns one context per decoder step.
    pub fn forward(&mut self, hs_enc: &[Tensor], hs_dec: &[Tensor]) -> Vec<Tensor> {
        self.enc_steps = hs_enc.len();
        self.layers = hs_dec.iter().map(|_| Attention::new()).collect();
        self.layers
            .iter_mut()
            .zip(hs_dec)
            .map(|(layer, h)| layer.forward(hs_enc, h))
            .collect()
    }

    /// Returns `(dhs_enc, dhs_dec)`. Encoder gradients are summed over
    /// decoder steps.
    pub fn backward(&mut self, dcs: &[Tensor]) -> (Vec<Tensor>, Vec<Tensor>) {
        assert_eq!(
            dcs.len(),
            self.layers.len(),
            "TimeAttention: {} gradients for {} decoder steps",
            dcs.len(),
            self.layers.len()
        );
        let mut dhs_enc: Option<Vec<Tensor>> = None;
        let mut dhs_dec = Vec::with_capacity(dcs.len());
        for (layer, dc) in self.layers.iter_mut().zip(dcs) {
            let (dhs, dh) = layer.backward(dc);
            match dhs_enc.as_mut() {
                Some(acc) => acc.iter_mut().zip(&dhs).for_each(|(a, d)| a.add_assign(d)),
                None => dhs_enc = Some(dhs),
            }
            dhs_dec.push(dh);
        }
        let dhs_enc = dhs_enc.unwrap_or_default();
        (dhs_enc, dhs_dec)
    }

    /// Number of encoder steps seen by the last forward call.
    pub fn encoder_steps(&self) -> usize {
        self.enc_steps
    }

    /// Attention weights of every decoder step from the last forward call.
    pub fn weights(&self) -> Vec<&Tensor> {
        self.layers.iter().filter_map(|l| l.weights()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder_output() -> Vec<Tensor> {
        vec![
            Tensor::from_rows(&[&[1.0, 0.0], &[0.5, 0.5]]),
            Tensor::from_rows(&[&[0.0, 1.0], &[-0.5, 2.0]]),
            Tensor::from_rows(&[&[1.0, 1.0], &[0.0, -1.0]]),
        ]
    }

    #[test]
    fn weight_sum_picks_weighted_steps() {
        let hs = encoder_output();
        let a = Tensor::from_rows(&[&[1.0, 0.0, 0.0], &[0.0, 0.5, 0.5]]);
        let mut ws = WeightSum::new();
        let c = ws.forward(&hs, &a);
        assert_eq!(c.row(0), &[1.0, 0.0]);
        assert_eq!(c.row(1), &[-0.25, 0.5]);

        let (dhs, da) = ws.backward(&Tensor::ones(2, 2));
        assert_eq!(da.shape(), (2, 3));
        assert_eq!(da.row(0), &[1.0, 1.0, 2.0]);
        assert_eq!(dhs[0].row(1), &[0.0, 0.0]);
        assert_eq!(dhs[2].row(1), &[0.5, 0.5]);
    }

    #[test]
    fn dot_score_values() {
        let hs = encoder_output();
        let h = Tensor::from_rows(&[&[2.0, 3.0], &[1.0, 1.0]]);
        let s = DotScore::new().forward(&hs, &h);
        assert_eq!(s.row(0), &[2.0, 3.0, 5.0]);
        assert_eq!(s.row(1), &[1.0, 1.5, -1.0]);
    }

    #[test]
    fn attention_weights_are_distributions() {
        let hs = encoder_output();
        let h = Tensor::from_rows(&[&[2.0, 3.0], &[1.0, 1.0]]);
        let mut att = Attention::new();
        att.forward(&hs, &h);
        let a = att.weights().unwrap();
        for &v in a.data() {
            assert!(v >= 0.0);
        }
        for s in a.sum_axis(1).data() {
            assert!((s - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn single_step_gets_full_weight() {
        let hs = vec![Tensor::from_rows(&[&[0.3, -0.7]])];
        let mut att = Attention::new();
        let c = att.forward(&hs, &Tensor::from_rows(&[&[5.0, 5.0]]));
        assert_eq!(att.weights().unwrap(), &Tensor::scalar(1.0));
        assert!(c.approx_eq(&hs[0], 1e-12));
    }

    #[test]
    fn time_attention_sums_encoder_grads() {
        let hs = encoder_output();
        let dec = vec![Tensor::from_rows(&[&[0.1, 0.2], &[0.3, 0.4]]); 2];
        let mut single = Attention::new();
        single.forward(&hs, &dec[0]);
        let (dhs_one, _) = single.backward(&Tensor::ones(2, 2));

        let mut time = TimeAttention::new();
        let cs = time.forward(&hs, &dec);
        assert_eq!(cs.len(), 2);
        let (dhs_enc, dhs_dec) = time.backward(&vec![Tensor::ones(2, 2); 2]);
        assert_eq!(dhs_dec.len(), 2);
        for (sum, one) in dhs_enc.iter().zip(&dhs_one) {
            assert!(sum.approx_eq(&one.scale(2.0), 1e-12));
        }
    }

    #[test]
    #[should_panic(expected = "at least one step")]
    fn empty_encoder_rejected() {
        Attention::new().forward(&[], &Tensor::zeros(1, 2));
    }
}
