//! Layers applied across a time-major sequence with one shared weight set.

use loom_tensor::Tensor;

use crate::recurrent::{CellState, LstmCell, RecurrentCell, RnnCell};
use crate::{Affine, Dropout, Embedding, Module, Parameter, SoftmaxWithLoss, TimeModule};

fn check_sequence(name: &str, xs: &[Tensor]) -> (usize, usize) {
    let shape = xs[0].shape();
    for (t, x) in xs.iter().enumerate() {
        assert_eq!(
            x.shape(),
            shape,
            "{name}: step {t} has shape {:?}, step 0 has {shape:?}",
            x.shape()
        );
    }
    shape
}

/// Applies a stateless per-step [`Module`] to every step of a sequence.
///
/// Steps are stacked along the batch axis so the layer runs once; its weight
/// gradient is then the sum of the per-step gradients.
pub struct TimeDistributed<M> {
    pub layer: M,
    batch: Option<usize>,
}

pub type TimeAffine = TimeDistributed<Affine>;
pub type TimeEmbedding = TimeDistributed<Embedding>;
pub type TimeDropout = TimeDistributed<Dropout>;

impl<M: Module> TimeDistributed<M> {
    pub fn new(layer: M) -> Self {
        Self { layer, batch: None }
    }
}

impl<M: Module> TimeModule for TimeDistributed<M> {
    fn forward(&mut self, xs: &[Tensor]) -> Vec<Tensor> {
        if xs.is_empty() {
            self.batch = Some(0);
            return Vec::new();
        }
        let (batch, _) = check_sequence("TimeDistributed", xs);
        let parts: Vec<&Tensor> = xs.iter().collect();
        let out = self.layer.forward(&Tensor::vstack(&parts));
        self.batch = Some(batch);
        out.split_rows(batch)
    }

    fn backward(&mut self, dys: &[Tensor]) -> Vec<Tensor> {
        let batch = self
            .batch
            .expect("TimeDistributed: must call forward before backward");
        self.layer.zero_grad();
        if dys.is_empty() {
            return Vec::new();
        }
        let parts: Vec<&Tensor> = dys.iter().collect();
        let stacked = Tensor::vstack(&parts);
        assert_eq!(
            stacked.rows(),
            batch * dys.len(),
            "TimeDistributed: gradient batch does not match forward batch {batch}"
        );
        self.layer.backward(&stacked).split_rows(batch)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.layer.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.layer.parameters_mut()
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        self.layer.named_parameters()
    }

    fn set_training(&mut self, training: bool) {
        self.layer.set_training(training);
    }
}

/// Unrolls a [`RecurrentCell`] over `T` steps.
///
/// With `stateful` set, the final state of one forward call becomes the
/// initial state of the next until [`reset_state`](Self::reset_state).
/// A state given to [`set_state`](Self::set_state) seeds the next forward
/// call in either mode.
pub struct TimeRecurrent<C: RecurrentCell> {
    pub cell: C,
    pub stateful: bool,
    state: Option<CellState>,
    caches: Option<Vec<C::Cache>>,
    batch: usize,
    dstate: Option<CellState>,
}

pub type TimeRnn = TimeRecurrent<RnnCell>;
pub type TimeLstm = TimeRecurrent<LstmCell>;

impl<C: RecurrentCell> TimeRecurrent<C> {
    pub fn new(cell: C, stateful: bool) -> Self {
        Self {
            cell,
            stateful,
            state: None,
            caches: None,
            batch: 0,
            dstate: None,
        }
    }

    /// Seed the initial state. `c` defaults to zeros for cells that use one.
    pub fn set_state(&mut self, h: Tensor, c: Option<Tensor>) {
        let hidden = self.cell.hidden_size();
        assert_eq!(
            h.cols(),
            hidden,
            "set_state: hidden state has {} columns, expected {hidden}",
            h.cols()
        );
        let c = c.or(self.cell.zero_state(h.rows()).c);
        self.state = Some(CellState::new(h, c));
    }

    pub fn reset_state(&mut self) {
        self.state = None;
    }

    /// State retained for the next forward call, if any.
    pub fn state(&self) -> Option<&CellState> {
        self.state.as_ref()
    }

    /// Gradient w.r.t. the initial hidden state from the last backward.
    pub fn dh(&self) -> Option<&Tensor> {
        self.dstate.as_ref().map(|s| &s.h)
    }

    /// Gradient w.r.t. the initial cell state from the last backward.
    pub fn dc(&self) -> Option<&Tensor> {
        self.dstate.as_ref().and_then(|s| s.c.as_ref())
    }

    pub fn hidden_size(&self) -> usize {
        self.cell.hidden_size()
    }
}

impl<C: RecurrentCell> TimeModule for TimeRecurrent<C> {
    fn forward(&mut self, xs: &[Tensor]) -> Vec<Tensor> {
        self.dstate = None;
        if xs.is_empty() {
            self.caches = Some(Vec::new());
            self.batch = 0;
            return Vec::new();
        }
        let (batch, _) = check_sequence("TimeRecurrent", xs);
        self.batch = batch;

        let mut state = match self.state.take() {
            Some(s) => {
                assert_eq!(
                    s.batch_size(),
                    batch,
                    "TimeRecurrent: carried state has batch {}, input has {batch}",
                    s.batch_size()
                );
                s
            }
            None => self.cell.zero_state(batch),
        };

        let mut hs = Vec::with_capacity(xs.len());
        let mut caches = Vec::with_capacity(xs.len());
        for x in xs {
            let (next, cache) = self.cell.step(x, &state);
            hs.push(next.h.clone());
            caches.push(cache);
            state = next;
        }

        self.caches = Some(caches);
        if self.stateful {
            self.state = Some(state);
        }
        hs
    }

    fn backward(&mut self, dhs: &[Tensor]) -> Vec<Tensor> {
        let caches = self
            .caches
            .as_ref()
            .expect("TimeRecurrent: must call forward before backward");
        assert_eq!(
            dhs.len(),
            caches.len(),
            "TimeRecurrent: {} gradients for {} forward steps",
            dhs.len(),
            caches.len()
        );
        let expected = (self.batch, self.cell.hidden_size());
        for (t, dh) in dhs.iter().enumerate() {
            assert_eq!(
                dh.shape(),
                expected,
                "TimeRecurrent: gradient for step {t} has shape {:?}, expected {expected:?}",
                dh.shape()
            );
        }
        for p in self.cell.parameters_mut() {
            p.zero_grad();
        }

        let mut carry: Option<CellState> = None;
        let mut dxs = Vec::with_capacity(dhs.len());
        for (cache, dh) in caches.iter().zip(dhs).rev() {
            let dstate = match carry.take() {
                Some(prev) => CellState::new(dh.add(&prev.h), prev.c),
                None => CellState::new(dh.clone(), None),
            };
            let (dx, dprev) = self.cell.step_backward(cache, &dstate);
            dxs.push(dx);
            carry = Some(dprev);
        }
        dxs.reverse();
        self.dstate = carry;
        dxs
    }

    fn parameters(&self) -> Vec<&Parameter> {
        self.cell.parameters()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        self.cell.parameters_mut()
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        self.cell.named_parameters()
    }
}

/// Mean softmax cross-entropy over every `(step, row)` of a sequence of
/// score tensors.
pub struct TimeSoftmaxWithLoss {
    inner: SoftmaxWithLoss,
    batch: Option<usize>,
}

impl TimeSoftmaxWithLoss {
    pub fn new() -> Self {
        Self {
            inner: SoftmaxWithLoss::new(),
            batch: None,
        }
    }

    /// Positions labelled `label` (padding) are left out of loss and gradient.
    pub fn with_ignore_label(label: usize) -> Self {
        Self {
            inner: SoftmaxWithLoss::with_ignore_label(label),
            batch: None,
        }
    }

    /// `scores`: T of `(N, V)`; `labels`: T of `(N, 1)` id columns.
    pub fn forward(&mut self, scores: &[Tensor], labels: &[Tensor]) -> f64 {
        assert_eq!(
            scores.len(),
            labels.len(),
            "TimeSoftmaxWithLoss: {} score steps but {} label steps",
            scores.len(),
            labels.len()
        );
        if scores.is_empty() {
            self.batch = Some(0);
            return 0.0;
        }
        let (batch, _) = check_sequence("TimeSoftmaxWithLoss", scores);
        let ids: Vec<usize> = labels.iter().flat_map(|t| t.to_ids()).collect();
        let parts: Vec<&Tensor> = scores.iter().collect();
        self.batch = Some(batch);
        self.inner.forward(&Tensor::vstack(&parts), &ids)
    }

    /// Gradient per step, scaled by the upstream gradient `dout`.
    pub fn backward(&mut self, dout: f64) -> Vec<Tensor> {
        let batch = self
            .batch
            .expect("TimeSoftmaxWithLoss: must call forward before backward");
        if batch == 0 {
            return Vec::new();
        }
        self.inner.backward(dout).split_rows(batch)
    }
}

impl Default for TimeSoftmaxWithLoss {
    fn default() -> Self {
        Self::new()
    }
}
