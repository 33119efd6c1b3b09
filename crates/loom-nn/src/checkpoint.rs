//! Ordered parameter persistence in the safetensors format.
//!
//! Tensors are stored as F64 under their parameter names (F32 files load
//! too). The parameter
//! order is written to the file metadata so a checkpoint can be restored
//! positionally.

use std::collections::HashMap;
use std::path::Path;

use loom_tensor::Tensor;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use tracing::info;

use crate::cbow::Cbow;
use crate::lm::LstmLm;
use crate::seq2seq::{Seq2Seq, SequenceDecoder, SequenceEncoder};
use crate::{Module, Parameter, ParameterSet, Sequential};

const ORDER_KEY: &str = "parameter_order";

impl<E, D> ParameterSet for Seq2Seq<E, D>
where
    E: SequenceEncoder,
    D: SequenceDecoder<Context = E::Summary>,
{
    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        Seq2Seq::named_parameters(self)
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Seq2Seq::parameters_mut(self)
    }
}

impl ParameterSet for LstmLm {
    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        LstmLm::named_parameters(self)
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        LstmLm::parameters_mut(self)
    }
}

impl ParameterSet for Cbow {
    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        Cbow::named_parameters(self)
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Cbow::parameters_mut(self)
    }
}

impl ParameterSet for Sequential {
    fn named_parameters(&self) -> Vec<(String, &Parameter)> {
        Module::named_parameters(self)
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        Module::parameters_mut(self)
    }
}

/// Write every parameter of `model` to `path`.
pub fn save<M: ParameterSet + ?Sized>(model: &M, path: &Path) -> Result<(), CheckpointError> {
    let named = model.named_parameters();

    // Collect owned data so we can borrow it for TensorView
    let tensor_data: Vec<(String, Vec<u8>, Vec<usize>)> = named
        .iter()
        .map(|(name, p)| {
            let bytes: Vec<u8> = p.data.data().iter().flat_map(|&v| v.to_le_bytes()).collect();
            let (rows, cols) = p.shape();
            (name.clone(), bytes, vec![rows, cols])
        })
        .collect();

    let mut views = Vec::with_capacity(tensor_data.len());
    for (name, bytes, shape) in &tensor_data {
        let view = TensorView::new(Dtype::F64, shape.clone(), bytes)
            .map_err(CheckpointError::Serialize)?;
        views.push((name.as_str(), view));
    }

    let order: Vec<&str> = tensor_data.iter().map(|(name, _, _)| name.as_str()).collect();
    let mut metadata = HashMap::new();
    metadata.insert(ORDER_KEY.to_string(), serde_json::to_string(&order)?);

    let serialized =
        safetensors::tensor::serialize(views, &Some(metadata)).map_err(CheckpointError::Serialize)?;
    std::fs::write(path, serialized)?;

    info!("saved {} parameter tensors to {}", order.len(), path.display());
    Ok(())
}

/// Read `(name, tensor)` pairs from `path` in saved order.
pub fn load(path: &Path) -> Result<Vec<(String, Tensor)>, CheckpointError> {
    let data = std::fs::read(path)?;
    let (_, header) = SafeTensors::read_metadata(&data).map_err(CheckpointError::Parse)?;
    let order: Vec<String> = match header.metadata().as_ref().and_then(|m| m.get(ORDER_KEY)) {
        Some(json) => serde_json::from_str(json)?,
        None => return Err(CheckpointError::MissingOrder),
    };

    let tensors = SafeTensors::deserialize(&data).map_err(CheckpointError::Parse)?;
    let mut result = Vec::with_capacity(order.len());
    for name in order {
        let view = tensors.tensor(&name).map_err(CheckpointError::Parse)?;
        let values: Vec<f64> = match view.dtype() {
            Dtype::F64 => view
                .data()
                .chunks_exact(8)
                .map(|chunk| {
                    f64::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6],
                        chunk[7],
                    ])
                })
                .collect(),
            Dtype::F32 => view
                .data()
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64)
                .collect(),
            other => return Err(CheckpointError::UnsupportedDtype(format!("{other:?}"))),
        };
        let (rows, cols) = match *view.shape() {
            [rows, cols] => (rows, cols),
            [n] => (1, n),
            _ => {
                return Err(CheckpointError::UnsupportedShape {
                    name,
                    shape: view.shape().to_vec(),
                })
            }
        };
        result.push((name, Tensor::new(values, rows, cols)));
    }

    info!("loaded {} parameter tensors from {}", result.len(), path.display());
    Ok(result)
}

/// Restore `model` from `path`. Names, count and shapes must all match;
/// nothing is assigned unless every check passes.
pub fn load_into<M: ParameterSet + ?Sized>(model: &mut M, path: &Path) -> Result<(), CheckpointError> {
    let loaded = load(path)?;
    {
        let expected = model.named_parameters();
        if expected.len() != loaded.len() {
            return Err(CheckpointError::CountMismatch {
                expected: expected.len(),
                found: loaded.len(),
            });
        }
        for ((name, p), (loaded_name, t)) in expected.iter().zip(&loaded) {
            if name != loaded_name {
                return Err(CheckpointError::NameMismatch {
                    expected: name.clone(),
                    found: loaded_name.clone(),
                });
            }
            if p.shape() != t.shape() {
                return Err(CheckpointError::ShapeMismatch {
                    name: name.clone(),
                    expected: p.shape(),
                    found: t.shape(),
                });
            }
        }
    }

    for (p, (_, t)) in model.parameters_mut().into_iter().zip(loaded) {
        p.assign(t);
    }
    Ok(())
}

/// Errors from checkpoint operations.
#[derive(Debug)]
pub enum CheckpointError {
    Io(std::io::Error),
    Parse(safetensors::SafeTensorError),
    Serialize(safetensors::SafeTensorError),
    Metadata(serde_json::Error),
    MissingOrder,
    UnsupportedDtype(String),
    UnsupportedShape {
        name: String,
        shape: Vec<usize>,
    },
    CountMismatch {
        expected: usize,
        found: usize,
    },
    NameMismatch {
        expected: String,
        found: String,
    },
    ShapeMismatch {
        name: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::Serialize(e) => write!(f, "serialize error: {e}"),
            Self::Metadata(e) => write!(f, "bad parameter order metadata: {e}"),
            Self::MissingOrder => write!(f, "checkpoint has no parameter order metadata"),
            Self::UnsupportedDtype(d) => write!(f, "unsupported dtype: {d}"),
            Self::UnsupportedShape { name, shape } => {
                write!(f, "tensor '{name}' has unsupported shape {shape:?}")
            }
            Self::CountMismatch { expected, found } => {
                write!(f, "model has {expected} parameters, checkpoint has {found}")
            }
            Self::NameMismatch { expected, found } => {
                write!(f, "expected parameter '{expected}', checkpoint has '{found}'")
            }
            Self::ShapeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "parameter '{name}' has shape {expected:?}, checkpoint has {found:?}"
            ),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        Self::Metadata(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Rng, Tanh, WeightInit};

    fn mlp(seed: u64) -> Sequential {
        Sequential::mlp(
            &[3, 4, 2],
            WeightInit::Xavier,
            || Box::new(Tanh::new()),
            &mut Rng::new(seed),
        )
    }

    #[test]
    fn roundtrip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlp.safetensors");

        let model = mlp(1);
        save(&model, &path).unwrap();
        let loaded = load(&path).unwrap();
        let names: Vec<&str> = loaded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["0.weight", "0.bias", "2.weight", "2.bias"]);
        assert_eq!(loaded[0].1, model.parameters()[0].data);
    }

    #[test]
    fn load_into_restores_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlp.safetensors");

        let mut model = mlp(1);
        save(&model, &path).unwrap();
        let mut other = mlp(2);
        load_into(&mut other, &path).unwrap();

        let x = Tensor::from_rows(&[&[0.1, -0.2, 0.3]]);
        assert_eq!(model.forward(&x), other.forward(&x));
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlp.safetensors");
        save(&mlp(1), &path).unwrap();

        let mut wider = Sequential::mlp(
            &[3, 5, 2],
            WeightInit::Xavier,
            || Box::new(Tanh::new()),
            &mut Rng::new(0),
        );
        let before = wider.parameters()[0].data.clone();
        let err = load_into(&mut wider, &path).unwrap_err();
        assert!(matches!(err, CheckpointError::ShapeMismatch { .. }), "{err}");
        assert_eq!(wider.parameters()[0].data, before);
    }

    #[test]
    fn missing_order_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.safetensors");
        let bytes: Vec<u8> = 1.0f64.to_le_bytes().to_vec();
        let view = TensorView::new(Dtype::F64, vec![1, 1], &bytes).unwrap();
        let serialized = safetensors::tensor::serialize(vec![("w", view)], &None).unwrap();
        std::fs::write(&path, serialized).unwrap();

        assert!(matches!(load(&path), Err(CheckpointError::MissingOrder)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load(Path::new("/nonexistent/model.safetensors")).unwrap_err();
        assert!(matches!(err, CheckpointError::Io(_)));
    }
}
