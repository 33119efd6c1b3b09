//! Single-step recurrent cells.
//!
//! A cell owns its weights and computes one time step. [`RecurrentCell::step`]
//! is pure and hands the caller a cache; [`RecurrentCell::step_backward`]
//! consumes that cache and adds the step's weight gradients into the cell's
//! parameters. The time wrapper in [`crate::time`] keeps one cache per step.

use loom_tensor::Tensor;

use crate::{Parameter, Rng, WeightInit};

/// Recurrent state carried between steps. `c` is only present for cells
/// with a memory cell (LSTM).
#[derive(Debug, Clone, PartialEq)]
pub struct CellState {
    pub h: Tensor,
    pub c: Option<Tensor>,
}

impl CellState {
    pub fn new(h: Tensor, c: Option<Tensor>) -> Self {
        if let Some(c) = &c {
            assert_eq!(h.shape(), c.shape(), "hidden and cell state shapes differ");
        }
        Self { h, c }
    }

    pub fn batch_size(&self) -> usize {
        self.h.rows()
    }
}

pub trait RecurrentCell {
    type Cache;

    fn input_size(&self) -> usize;

    fn hidden_size(&self) -> usize;

    /// All-zero state for `batch` rows.
    fn zero_state(&self, batch: usize) -> CellState;

    /// One forward step. Does not touch gradients.
    fn step(&self, x: &Tensor, state: &CellState) -> (CellState, Self::Cache);

    /// One backward step: `dstate` is the gradient w.r.t. the step's output
    /// state. Returns `(dx, dstate_prev)` and accumulates weight gradients.
    fn step_backward(&mut self, cache: &Self::Cache, dstate: &CellState) -> (Tensor, CellState);

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;

    fn named_parameters(&self) -> Vec<(String, &Parameter)>;
}

fn check_step_shapes(name: &str, x: &Tensor, h: &Tensor, input: usize, hidden: usize) {
    assert_eq!(
        x.cols(),
        input,
        "{name}: input has {} features, expected {input}",
        x.cols()
    );
    assert_eq!(
        h.shape(),
        (x.rows(), hidden),
        "{name}: hidden state {:?} does not match batch {} x hidden {hidden}",
        h.shape(),
        x.rows()
    );
}

/// Elman cell: `h_next = tanh(x·Wx + h_prev·Wh + b)`.
pub struct RnnCell {
    pub wx: Parameter, // [D, H]
    pub wh: Parameter, // [H, H]
    pub b: Parameter,  // [1, H]
    last: Option<RnnCache>,
}

pub struct RnnCache {
    x: Tensor,
    h_prev: Tensor,
    h_next: Tensor,
}

impl RnnCell {
    pub fn new(input_size: usize, hidden_size: usize, init: WeightInit, rng: &mut Rng) -> Self {
        Self::from_parameters(
            Parameter::randn(input_size, hidden_size, init.scale(input_size), rng),
            Parameter::randn(hidden_size, hidden_size, init.scale(hidden_size), rng),
            Parameter::zeros(1, hidden_size),
        )
    }

    pub fn from_parameters(wx: Parameter, wh: Parameter, b: Parameter) -> Self {
        let h = wx.shape().1;
        assert_eq!(wh.shape(), (h, h), "RnnCell: Wh must be ({h}, {h})");
        assert_eq!(b.shape(), (1, h), "RnnCell: b must be (1, {h})");
        Self {
            wx,
            wh,
            b,
            last: None,
        }
    }

    /// Standalone step that keeps its own cache for [`backward`](Self::backward).
    pub fn forward(&mut self, x: &Tensor, h_prev: &Tensor) -> Tensor {
        let (state, cache) = self.step(x, &CellState::new(h_prev.clone(), None));
        self.last = Some(cache);
        state.h
    }

    /// Returns `(dx, dh_prev)`.
    pub fn backward(&mut self, dh_next: &Tensor) -> (Tensor, Tensor) {
        let cache = self
            .last
            .take()
            .expect("RnnCell: must call forward before backward");
        let (dx, dprev) = self.step_backward(&cache, &CellState::new(dh_next.clone(), None));
        self.last = Some(cache);
        (dx, dprev.h)
    }
}

impl RecurrentCell for RnnCell {
    type Cache = RnnCache;

    fn input_size(&self) -> usize {
        self.wx.shape().0
    }

    fn hidden_size(&self) -> usize {
        self.wx.shape().1
    }

    fn zero_state(&self, batch: usize) -> CellState {
        CellState::new(Tensor::zeros(batch, self.hidden_size()), None)
    }

    fn step(&self, x: &Tensor, state: &CellState) -> (CellState, RnnCache) {
        check_step_shapes("RnnCell", x, &state.h, self.input_size(), self.hidden_size());
        let t = state
            .h
            .matmul(&self.wh.data)
            .add(&x.matmul(&self.wx.data))
            .add(&self.b.data);
        let h_next = t.tanh();
        let cache = RnnCache {
            x: x.clone(),
            h_prev: state.h.clone(),
            h_next: h_next.clone(),
        };
        (CellState::new(h_next, None), cache)
    }

    fn step_backward(&mut self, cache: &RnnCache, dstate: &CellState) -> (Tensor, CellState) {
        assert_eq!(
            dstate.h.shape(),
            cache.h_next.shape(),
            "RnnCell: gradient shape {:?} does not match output {:?}",
            dstate.h.shape(),
            cache.h_next.shape()
        );
        // dt = dh_next * (1 - h_next^2)
        let dt = dstate.h.mul(&cache.h_next.map(|h| 1.0 - h * h));

        self.wx.accumulate_grad(&cache.x.transpose().matmul(&dt));
        self.wh.accumulate_grad(&cache.h_prev.transpose().matmul(&dt));
        self.b.accumulate_grad(&dt.sum_axis(0));

        let dx = dt.matmul(&self.wx.data.transpose());
        let dh_prev = dt.matmul(&self.wh.data.transpose());
        (dx, CellState::new(dh_prev, None))
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.wx, &self.wh, &self.b]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.wx, &mut self.wh, &mut self.b]
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        vec![
            (String::from("wx"), &self.wx),
            (String::from("wh"), &self.wh),
            (String::from("b"), &self.b),
        ]
    }
}

/// LSTM cell with one fused `4H`-wide affine transform.
///
/// Gate blocks are laid out as input, forget, output, candidate (`i f o g`).
pub struct LstmCell {
    pub wx: Parameter, // [D, 4H]
    pub wh: Parameter, // [H, 4H]
    pub b: Parameter,  // [1, 4H]
    last: Option<LstmCache>,
}

pub struct LstmCache {
    x: Tensor,
    h_prev: Tensor,
    c_prev: Tensor,
    i: Tensor,
    f: Tensor,
    o: Tensor,
    g: Tensor,
    tanh_c_next: Tensor,
}

impl LstmCell {
    pub fn new(input_size: usize, hidden_size: usize, init: WeightInit, rng: &mut Rng) -> Self {
        let h4 = 4 * hidden_size;
        Self::from_parameters(
            Parameter::randn(input_size, h4, init.scale(input_size), rng),
            Parameter::randn(hidden_size, h4, init.scale(hidden_size), rng),
            Parameter::zeros(1, h4),
        )
    }

    pub fn from_parameters(wx: Parameter, wh: Parameter, b: Parameter) -> Self {
        let h4 = wx.shape().1;
        assert_eq!(h4 % 4, 0, "LstmCell: Wx width {h4} is not a multiple of 4");
        assert_eq!(wh.shape(), (h4 / 4, h4), "LstmCell: Wh must be ({}, {h4})", h4 / 4);
        assert_eq!(b.shape(), (1, h4), "LstmCell: b must be (1, {h4})");
        Self {
            wx,
            wh,
            b,
            last: None,
        }
    }

    /// Standalone step that keeps its own cache. Returns `(h_next, c_next)`.
    pub fn forward(&mut self, x: &Tensor, h_prev: &Tensor, c_prev: &Tensor) -> (Tensor, Tensor) {
        let state = CellState::new(h_prev.clone(), Some(c_prev.clone()));
        let (next, cache) = self.step(x, &state);
        self.last = Some(cache);
        let c = next.c.unwrap_or_else(|| Tensor::zeros_like(&next.h));
        (next.h, c)
    }

    /// Returns `(dx, dh_prev, dc_prev)`.
    pub fn backward(&mut self, dh_next: &Tensor, dc_next: &Tensor) -> (Tensor, Tensor, Tensor) {
        let cache = self
            .last
            .take()
            .expect("LstmCell: must call forward before backward");
        let dstate = CellState::new(dh_next.clone(), Some(dc_next.clone()));
        let (dx, dprev) = self.step_backward(&cache, &dstate);
        self.last = Some(cache);
        let dc = dprev.c.unwrap_or_else(|| Tensor::zeros_like(&dprev.h));
        (dx, dprev.h, dc)
    }
}

impl RecurrentCell for LstmCell {
    type Cache = LstmCache;

    fn input_size(&self) -> usize {
        self.wx.shape().0
    }

    fn hidden_size(&self) -> usize {
        self.wh.shape().0
    }

    fn zero_state(&self, batch: usize) -> CellState {
        let h = self.hidden_size();
        CellState::new(Tensor::zeros(batch, h), Some(Tensor::zeros(batch, h)))
    }

    fn step(&self, x: &Tensor, state: &CellState) -> (CellState, LstmCache) {
        let hs = self.hidden_size();
        check_step_shapes("LstmCell", x, &state.h, self.input_size(), hs);
        let c_prev = state
            .c
            .clone()
            .unwrap_or_else(|| Tensor::zeros_like(&state.h));

        let a = x
            .matmul(&self.wx.data)
            .add(&state.h.matmul(&self.wh.data))
            .add(&self.b.data);

        let i = a.slice_cols(0, hs).sigmoid();
        let f = a.slice_cols(hs, 2 * hs).sigmoid();
        let o = a.slice_cols(2 * hs, 3 * hs).sigmoid();
        let g = a.slice_cols(3 * hs, 4 * hs).tanh();

        let c_next = f.mul(&c_prev).add(&g.mul(&i));
        let tanh_c_next = c_next.tanh();
        let h_next = o.mul(&tanh_c_next);

        let cache = LstmCache {
            x: x.clone(),
            h_prev: state.h.clone(),
            c_prev,
            i,
            f,
            o,
            g,
            tanh_c_next,
        };
        (CellState::new(h_next, Some(c_next)), cache)
    }

    fn step_backward(&mut self, cache: &LstmCache, dstate: &CellState) -> (Tensor, CellState) {
        let dh_next = &dstate.h;
        assert_eq!(
            dh_next.shape(),
            cache.tanh_c_next.shape(),
            "LstmCell: gradient shape {:?} does not match output {:?}",
            dh_next.shape(),
            cache.tanh_c_next.shape()
        );
        let dc_next = dstate
            .c
            .clone()
            .unwrap_or_else(|| Tensor::zeros_like(dh_next));
        let (i, f, o, g) = (&cache.i, &cache.f, &cache.o, &cache.g);
        let tanh_c = &cache.tanh_c_next;

        // ds = dc_next + dh_next * o * (1 - tanh(c_next)^2)
        let ds = dc_next.add(&dh_next.mul(o).mul(&tanh_c.map(|t| 1.0 - t * t)));
        let dc_prev = ds.mul(f);

        let sigmoid_grad = |s: &Tensor| s.map(|v| v * (1.0 - v));
        let di = ds.mul(g).mul(&sigmoid_grad(i));
        let df = ds.mul(&cache.c_prev).mul(&sigmoid_grad(f));
        let d_o = dh_next.mul(tanh_c).mul(&sigmoid_grad(o));
        let dg = ds.mul(i).mul(&g.map(|v| 1.0 - v * v));

        let da = Tensor::hstack(&[&di, &df, &d_o, &dg]);

        self.wx.accumulate_grad(&cache.x.transpose().matmul(&da));
        self.wh.accumulate_grad(&cache.h_prev.transpose().matmul(&da));
        self.b.accumulate_grad(&da.sum_axis(0));

        let dx = da.matmul(&self.wx.data.transpose());
        let dh_prev = da.matmul(&self.wh.data.transpose());
        (dx, CellState::new(dh_prev, Some(dc_prev)))
    }

    fn parameters(&self) -> Vec<&Parameter> {
        vec![&self.wx, &self.wh, &self.b]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        vec![&mut self.wx, &mut self.wh, &mut self.b]
    }

    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        vec![
            (String::from("wx"), &self.wx),
            (String::from("wh"), &self.wh),
            (String::from("b"), &self.b),
        ]
    }
}
