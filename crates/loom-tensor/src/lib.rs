//! Dense row-major 2-D arrays used by every loom layer.
//!
//! Operations never mutate their receiver unless the name says so
//! (`set`, `data_mut`, `add_assign`); everything else returns a new tensor.

mod tensor;

pub use tensor::Tensor;
