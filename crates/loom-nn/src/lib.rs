//! Manual-backprop neural network layers for sequence models.
//!
//! Every layer caches what it needs during `forward` and writes parameter
//! gradients during `backward`. Recurrent layers unroll a cell over time,
//! attention layers read a stack of encoder states, and [`Seq2Seq`] ties an
//! encoder and decoder together for teacher-forced training and greedy
//! generation. [`LstmLm`], [`Cbow`] and [`QLearningAgent`] are built from the
//! same layers.

mod agent;
mod attention;
mod cbow;
pub mod checkpoint;
mod config;
mod data;
mod init;
mod layers;
mod lm;
mod loss;
mod module;
mod optimizer;
mod parameter;
pub mod perceptron;
mod recurrent;
mod rng;
mod seq2seq;
mod time;
mod trainer;

pub use agent::QLearningAgent;
pub use attention::{Attention, AttentionWeight, DotScore, TimeAttention, WeightSum};
pub use cbow::Cbow;
pub use checkpoint::CheckpointError;
pub use config::{
    AgentConfig, CbowConfig, ConfigError, LmConfig, OptimizerKind, Seq2SeqConfig, TrainerConfig,
};
pub use data::{cbow_contexts, lm_batches, sequence, SequenceBatch, SequencePairs};
pub use init::WeightInit;
pub use layers::{Affine, Dropout, Embedding, ReLU, Sequential, Sigmoid, Softmax, Tanh};
pub use lm::LstmLm;
pub use loss::{cross_entropy_loss, mse_loss, mse_loss_grad, SoftmaxWithLoss};
pub use module::{Module, ParameterSet, TimeModule};
pub use optimizer::{clip_grad_norm, AdaGrad, Adam, Momentum, Optimizer, Sgd};
pub use parameter::Parameter;
pub use recurrent::{CellState, LstmCache, LstmCell, RecurrentCell, RnnCache, RnnCell};
pub use rng::Rng;
pub use seq2seq::{
    AttentionDecoder, AttentionEncoder, AttentionSeq2Seq, Decoder, Encoder, PlainSeq2Seq,
    Seq2Seq, SequenceDecoder, SequenceEncoder,
};
pub use time::{
    TimeAffine, TimeDistributed, TimeDropout, TimeEmbedding, TimeLstm, TimeRecurrent, TimeRnn,
    TimeSoftmaxWithLoss,
};
pub use trainer::{accuracy, perplexity, SequenceModel, Trainer};

pub use loom_tensor::Tensor;
