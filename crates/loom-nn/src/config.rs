//! JSON-loadable model and training settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::optimizer::{AdaGrad, Adam, Momentum, Optimizer, Sgd};
use crate::WeightInit;

fn default_seed() -> u64 {
    42
}

/// Sizes shared by the encoder and decoder of a seq2seq model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seq2SeqConfig {
    pub vocab_size: usize,
    pub wordvec_size: usize,
    pub hidden_size: usize,
    #[serde(default)]
    pub weight_init: WeightInit,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Seq2SeqConfig {
    pub fn new(vocab_size: usize, wordvec_size: usize, hidden_size: usize) -> Self {
        Self {
            vocab_size,
            wordvec_size,
            hidden_size,
            weight_init: WeightInit::default(),
            seed: default_seed(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("vocab_size", self.vocab_size)?;
        positive("wordvec_size", self.wordvec_size)?;
        positive("hidden_size", self.hidden_size)
    }
}

/// LSTM language model sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    pub vocab_size: usize,
    pub wordvec_size: usize,
    pub hidden_size: usize,
    #[serde(default)]
    pub weight_init: WeightInit,
    #[serde(default)]
    pub dropout: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl LmConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("vocab_size", self.vocab_size)?;
        positive("wordvec_size", self.wordvec_size)?;
        positive("hidden_size", self.hidden_size)?;
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ConfigError::Invalid(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// CBOW word-embedding sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CbowConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl CbowConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("vocab_size", self.vocab_size)?;
        positive("hidden_size", self.hidden_size)
    }
}

/// Q-network and learning settings for [`QLearningAgent`](crate::QLearningAgent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub state_size: usize,
    pub hidden_size: usize,
    pub action_size: usize,
    pub gamma: f64,
    pub epsilon: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl AgentConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("state_size", self.state_size)?;
        positive("hidden_size", self.hidden_size)?;
        positive("action_size", self.action_size)?;
        for (field, value) in [("gamma", self.gamma), ("epsilon", self.epsilon)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be in [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Momentum,
    AdaGrad,
    Adam,
}

/// Settings for [`Trainer`](crate::Trainer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    #[serde(default)]
    pub max_grad_norm: Option<f64>,
}

impl TrainerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("epochs", self.epochs)?;
        positive("batch_size", self.batch_size)?;
        if !(self.learning_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if let Some(norm) = self.max_grad_norm {
            if !(norm > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "max_grad_norm must be positive, got {norm}"
                )));
            }
        }
        Ok(())
    }

    /// Build the configured optimizer with its default hyperparameters.
    pub fn build_optimizer(&self) -> Box<dyn Optimizer> {
        let lr = self.learning_rate;
        match self.optimizer {
            OptimizerKind::Sgd => Box::new(Sgd::new(lr)),
            OptimizerKind::Momentum => Box::new(Momentum::new(lr, 0.9)),
            OptimizerKind::AdaGrad => Box::new(AdaGrad::new(lr)),
            OptimizerKind::Adam => Box::new(Adam::new(lr)),
        }
    }
}

fn positive(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Invalid(format!("{field} must be positive")))
    } else {
        Ok(())
    }
}

/// Errors from loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq2seq_defaults() {
        let c = Seq2SeqConfig::from_json(
            r#"{"vocab_size": 13, "wordvec_size": 16, "hidden_size": 128}"#,
        )
        .unwrap();
        assert_eq!(c.weight_init, WeightInit::Xavier);
        assert_eq!(c.seed, 42);
        assert_eq!(c, Seq2SeqConfig::new(13, 16, 128));
    }

    #[test]
    fn zero_size_rejected() {
        let err = Seq2SeqConfig::from_json(
            r#"{"vocab_size": 0, "wordvec_size": 16, "hidden_size": 128}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(err.to_string(), "invalid config: vocab_size must be positive");
    }

    #[test]
    fn lm_dropout_range() {
        let err = LmConfig::from_json(
            r#"{"vocab_size": 10, "wordvec_size": 4, "hidden_size": 4, "dropout": 1.0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn trainer_config_parses() {
        let c = TrainerConfig::from_json(
            r#"{"epochs": 5, "batch_size": 32, "learning_rate": 0.001,
                "optimizer": "adam", "max_grad_norm": 5.0}"#,
        )
        .unwrap();
        assert_eq!(c.optimizer, OptimizerKind::Adam);
        assert_eq!(c.max_grad_norm, Some(5.0));
    }

    #[test]
    fn cbow_config_defaults_seed() {
        let c = CbowConfig::from_json(r#"{"vocab_size": 7, "hidden_size": 5}"#).unwrap();
        assert_eq!(c.seed, 42);
    }

    #[test]
    fn agent_epsilon_range() {
        let err = AgentConfig::from_json(
            r#"{"state_size": 4, "hidden_size": 8, "action_size": 2,
                "gamma": 0.9, "epsilon": 1.5}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "invalid config: epsilon must be in [0, 1], got 1.5");
    }

    #[test]
    fn bad_json_is_parse_error() {
        assert!(matches!(
            TrainerConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = LmConfig::from_file(Path::new("/nonexistent/loom.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
