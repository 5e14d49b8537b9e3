//! Opaque sequence model seam.
//!
//! The forecast engine only needs `predict([1, window, features]) -> output`.
//! [`ConstantReturnModel`] backs demos and tests; the ONNX Runtime backend is
//! compiled with the `onnx` feature.

use ndarray::ArrayView3;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("model load failed: {0}")]
    Load(String),
    #[error("model inference failed: {0}")]
    Inference(String),
}

/// Number of trading days the model's log-return target spans. The forecast
/// loop still re-feeds each output after a single calendar day.
pub const MODEL_HORIZON_TRADING_DAYS: u32 = 5;

pub trait SequenceModel: Send + Sync {
    /// Forward pass over a `[1, window, features]` tensor. The first element of
    /// the returned output is the predicted log-return.
    fn predict(&self, input: ArrayView3<'_, f32>) -> Result<Vec<f32>, ModelError>;

    fn name(&self) -> &str;
}

/// Always predicts the same log-return regardless of input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantReturnModel {
    log_return: f32,
}

impl ConstantReturnModel {
    pub fn new(log_return: f32) -> Self {
        Self { log_return }
    }
}

impl SequenceModel for ConstantReturnModel {
    fn predict(&self, _input: ArrayView3<'_, f32>) -> Result<Vec<f32>, ModelError> {
        Ok(vec![self.log_return])
    }

    fn name(&self) -> &str {
        "constant"
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxSequenceModel;

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;
    use std::sync::Mutex;

    use ndarray::ArrayView3;
    use ort::session::Session;
    use tracing::info;

    use super::{ModelError, SequenceModel};

    pub struct OnnxSequenceModel {
        session: Mutex<Session>,
        label: String,
    }

    impl OnnxSequenceModel {
        pub fn from_file(path: &Path) -> Result<Self, ModelError> {
            let session = Session::builder()
                .and_then(|builder| builder.commit_from_file(path))
                .map_err(|err| ModelError::Load(err.to_string()))?;
            info!(
                component = "model",
                event = "model.onnx.loaded",
                path = %path.display()
            );
            Ok(Self {
                session: Mutex::new(session),
                label: format!("onnx:{}", path.display()),
            })
        }

        pub fn from_bytes(bytes: &[u8], label: impl Into<String>) -> Result<Self, ModelError> {
            let label = label.into();
            let session = Session::builder()
                .and_then(|builder| builder.commit_from_memory(bytes))
                .map_err(|err| ModelError::Load(err.to_string()))?;
            info!(
                component = "model",
                event = "model.onnx.loaded",
                source = %label,
                bytes = bytes.len()
            );
            Ok(Self {
                session: Mutex::new(session),
                label: format!("onnx:{label}"),
            })
        }
    }

    impl SequenceModel for OnnxSequenceModel {
        fn predict(&self, input: ArrayView3<'_, f32>) -> Result<Vec<f32>, ModelError> {
            let shape = input.shape().to_vec();
            let flat: Vec<f32> = input.iter().copied().collect();

            let input_value = ort::value::Value::from_array((shape.as_slice(), flat))
                .map_err(|err| ModelError::Inference(format!("input tensor: {err}")))?;

            let mut session = self
                .session
                .lock()
                .map_err(|err| ModelError::Inference(format!("session lock: {err}")))?;
            let outputs = session
                .run(ort::inputs![input_value])
                .map_err(|err| ModelError::Inference(err.to_string()))?;

            let output_value = outputs
                .iter()
                .next()
                .map(|(_, value)| value)
                .ok_or_else(|| ModelError::Inference("model produced no outputs".to_string()))?;
            let (_, data) = output_value
                .try_extract_tensor::<f32>()
                .map_err(|err| ModelError::Inference(err.to_string()))?;

            Ok(data.to_vec())
        }

        fn name(&self) -> &str {
            &self.label
        }
    }
}
