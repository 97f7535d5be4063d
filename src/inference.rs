//! Inference backend abstraction and factory

use crate::config::StudioConfig;
use crate::error::{IdPhotoError, Result};
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A loaded segmentation model
///
/// Backends are `Send` so a session can move onto a blocking worker thread
/// and be shared behind a mutex by the session cache.
pub trait InferenceBackend: Send {
    /// Load the model; returns the load time on first call, `None` afterwards
    ///
    /// # Errors
    /// - Model loading or session creation failures
    fn initialize(&mut self, config: &StudioConfig) -> Result<Option<Duration>>;

    /// Run the model on a normalized NCHW tensor, returning an `N×1×H×W` mask
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Inference or tensor conversion failures
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    fn input_shape(&self) -> (usize, usize, usize, usize);

    fn output_shape(&self) -> (usize, usize, usize, usize);

    /// # Errors
    /// - Missing or invalid preprocessing configuration
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// # Errors
    /// - Model metadata unavailable
    fn get_model_info(&self) -> Result<ModelInfo>;

    fn is_initialized(&self) -> bool;
}

/// Inference engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime (GPU acceleration where available)
    #[default]
    Onnx,
    /// Tract (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Creates backends; the seam where tests inject mocks
pub trait BackendFactory: Send + Sync {
    /// # Errors
    /// - Backend type not compiled in
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends enabled by cargo features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(
                crate::backends::OnnxBackend::with_model_manager(model_manager),
            )),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(
                crate::backends::TractBackend::with_model_manager(model_manager),
            )),
            #[allow(unreachable_patterns)]
            other => {
                drop(model_manager);
                Err(IdPhotoError::invalid_config(format!(
                    "Backend '{other}' is not available in this build (enable the '{other}' feature)"
                )))
            },
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        #[allow(unused_mut)]
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockBackend;

    #[test]
    fn test_backend_type_display() {
        assert_eq!(BackendType::Onnx.to_string(), "onnx");
        assert_eq!(BackendType::Tract.to_string(), "tract");
        assert_eq!(BackendType::default(), BackendType::Onnx);
    }

    #[test]
    fn test_default_factory_lists_compiled_backends() {
        let backends = DefaultBackendFactory.available_backends();
        assert_eq!(backends.contains(&BackendType::Onnx), cfg!(feature = "onnx"));
        assert_eq!(backends.contains(&BackendType::Tract), cfg!(feature = "tract"));
        assert_eq!(
            backends.len(),
            usize::from(cfg!(feature = "onnx")) + usize::from(cfg!(feature = "tract"))
        );
    }

    #[test]
    fn test_trait_object_shapes() {
        let backend: Box<dyn InferenceBackend> = Box::new(MockBackend::new());
        assert!(!backend.is_initialized());
        assert_eq!(backend.input_shape().1, 3);
        assert_eq!(backend.output_shape().1, 1);
        assert!(backend.get_preprocessing_config().is_ok());
    }
}
