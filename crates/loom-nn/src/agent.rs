//! Epsilon-greedy Q-learning with a small MLP as the action-value function.

use loom_tensor::Tensor;
use tracing::debug;

use crate::layers::ReLU;
use crate::{AgentConfig, Module, Optimizer, Rng, Sequential, WeightInit};

/// Learns `Q(state, action)` one transition at a time.
///
/// The network maps a `(1, state_size)` row to `(1, action_size)` action
/// values. Each update regresses the taken action's value towards
/// `reward + gamma * max Q(next)`; the other actions get no gradient.
pub struct QLearningAgent<O: Optimizer> {
    pub gamma: f64,
    pub epsilon: f64,
    action_size: usize,
    q: Sequential,
    optimizer: O,
    rng: Rng,
}

impl<O: Optimizer> QLearningAgent<O> {
    pub fn new(config: &AgentConfig, optimizer: O) -> Self {
        let mut rng = Rng::new(config.seed);
        let q = Sequential::mlp(
            &[config.state_size, config.hidden_size, config.action_size],
            WeightInit::He,
            || Box::new(ReLU::new()),
            &mut rng,
        );
        Self {
            gamma: config.gamma,
            epsilon: config.epsilon,
            action_size: config.action_size,
            q,
            optimizer,
            rng,
        }
    }

    /// Action values for one state row.
    pub fn q_values(&mut self, state: &Tensor) -> Tensor {
        assert_eq!(state.rows(), 1, "QLearningAgent: expected one state row");
        self.q.forward(state)
    }

    /// A random action with probability `epsilon`, else the greedy one.
    pub fn action(&mut self, state: &Tensor) -> usize {
        if self.rng.bernoulli(self.epsilon) {
            return self.rng.below(self.action_size);
        }
        self.q_values(state).argmax_rows()[0]
    }

    /// One temporal-difference step on `(state, action, reward, next)`.
    /// `done` marks a terminal `next`, whose value is taken as zero.
    /// Returns the squared TD error before the update.
    pub fn update(
        &mut self,
        state: &Tensor,
        action: usize,
        reward: f64,
        next: &Tensor,
        done: bool,
    ) -> f64 {
        assert!(
            action < self.action_size,
            "QLearningAgent: action {action} out of range for {} actions",
            self.action_size
        );
        let next_q = if done { 0.0 } else { self.q_values(next).max() };
        let target = reward + self.gamma * next_q;

        // Forward on `state` last so the cached activations belong to it.
        let q = self.q_values(state).get(0, action);
        let error = q - target;
        let mut grad = Tensor::zeros(1, self.action_size);
        grad.set(0, action, 2.0 * error);

        self.q.zero_grad();
        self.q.backward(&grad);
        self.optimizer.step(&mut self.q.parameters_mut());
        debug!("q-update action={action} q={q:.4} target={target:.4}");
        error * error
    }

    pub fn network(&self) -> &Sequential {
        &self.q
    }
}
