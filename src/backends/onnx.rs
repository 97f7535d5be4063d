//! ONNX Runtime backend
//!
//! Builds an `ort` session for the segmentation model with the requested
//! execution provider. Unavailable accelerators fall back to CPU with a warning.

use crate::config::{ExecutionProvider, StudioConfig};
use crate::error::{IdPhotoError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::time::{Duration, Instant};

/// ONNX Runtime backend
#[derive(Debug)]
pub struct OnnxBackend {
    session: Option<Session>,
    model_manager: ModelManager,
    model_info: Option<ModelInfo>,
}

impl OnnxBackend {
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            model_manager,
            model_info: None,
        }
    }

    /// Execution providers with availability, for `--list-providers` style output
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "🔍 Platform {} / {}, {} CPU threads",
            std::env::consts::OS,
            std::env::consts::ARCH,
            std::thread::available_parallelism()
                .map(std::num::NonZero::get)
                .unwrap_or(1)
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available(),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Accelerators to register for the requested provider
    fn execution_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let mut providers = Vec::new();

        let want_cuda = matches!(requested, ExecutionProvider::Auto | ExecutionProvider::Cuda);
        let want_coreml = matches!(requested, ExecutionProvider::Auto | ExecutionProvider::CoreMl);

        if want_cuda {
            if cuda_available() {
                log::info!("🚀 Using CUDA execution provider");
                providers.push(CUDAExecutionProvider::default().build());
            } else if requested == ExecutionProvider::Cuda {
                log::warn!("CUDA execution provider requested but not available, falling back to CPU");
            }
        }

        if want_coreml {
            if coreml_available() {
                log::info!("🍎 Using CoreML execution provider");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
            } else if requested == ExecutionProvider::CoreMl {
                log::warn!("CoreML execution provider requested but not available, falling back to CPU");
            }
        }

        if providers.is_empty() {
            log::info!("Using CPU execution provider");
        }
        providers
    }

    fn thread_counts(config: &StudioConfig) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(8);
        let intra = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }

    fn build_session(config: &StudioConfig, model_data: &[u8]) -> Result<Session> {
        let mut builder: SessionBuilder = Session::builder()
            .map_err(ort_err("Failed to create session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_err("Failed to set optimization level"))?;

        let providers = Self::execution_providers(config.execution_provider);
        if !providers.is_empty() {
            builder = builder
                .with_execution_providers(providers)
                .map_err(ort_err("Failed to register execution providers"))?;
        }

        let (intra_threads, inter_threads) = Self::thread_counts(config);
        log::debug!("Threading: {intra_threads} intra-op, {inter_threads} inter-op");

        builder
            .with_parallel_execution(true)
            .map_err(ort_err("Failed to enable parallel execution"))?
            .with_intra_threads(intra_threads)
            .map_err(ort_err("Failed to set intra threads"))?
            .with_inter_threads(inter_threads)
            .map_err(ort_err("Failed to set inter threads"))?
            .commit_from_memory(model_data)
            .map_err(ort_err("Failed to create session from model data"))
    }
}

fn ort_err<E: std::fmt::Display>(stage: &'static str) -> impl Fn(E) -> IdPhotoError {
    move |e| IdPhotoError::inference(format!("{stage}: {e}"))
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &StudioConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let start = Instant::now();
        let model_info = self.model_manager.get_info()?;
        let model_data = self.model_manager.load_model()?;
        let session = Self::build_session(config, &model_data)?;

        log::info!(
            "📊 Loaded {} ({:.1} MB) with {} in {:.0}ms",
            model_info.name,
            model_info.size_bytes as f64 / (1024.0 * 1024.0),
            config.execution_provider,
            start.elapsed().as_secs_f64() * 1000.0
        );

        self.session = Some(session);
        self.model_info = Some(model_info);
        Ok(Some(start.elapsed()))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| IdPhotoError::internal("ONNX session not initialized"))?;

        let start = Instant::now();
        log::debug!("🧠 Running inference on {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| IdPhotoError::inference(format!("Failed to convert input tensor: {e}")))?;

        // Positional input and output, tensor names differ between exports
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| IdPhotoError::inference(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| IdPhotoError::inference("Model produced no outputs"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| IdPhotoError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| IdPhotoError::inference(format!("Failed to extract output tensor: {e}")))?;

        let shape = output.shape().to_vec();
        let result = match shape.as_slice() {
            [n, c, h, w] => Array4::from_shape_vec(
                (*n, *c, *h, *w),
                output.iter().copied().collect(),
            )
            .map_err(|e| IdPhotoError::inference(format!("Failed to reshape output tensor: {e}")))?,
            _ => {
                return Err(IdPhotoError::inference(format!(
                    "Expected 4D output tensor, got {}D",
                    shape.len()
                )))
            },
        };

        log::debug!(
            "📊 Inference complete: {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info
            .as_ref()
            .map_or((1, 3, 1024, 1024), |info| info.input_shape)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info
            .as_ref()
            .map_or((1, 1, 1024, 1024), |info| info.output_shape)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.model_manager.get_preprocessing_config()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        match &self.model_info {
            Some(info) => Ok(info.clone()),
            None => self.model_manager.get_info(),
        }
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FolderModelProvider;
    use tempfile::TempDir;

    fn backend_for(temp_dir: &TempDir) -> OnnxBackend {
        crate::models::tests::write_model_folder(temp_dir.path(), &["model.onnx"]);
        let provider = FolderModelProvider::new(temp_dir.path(), None, None).unwrap();
        OnnxBackend::with_model_manager(ModelManager::with_provider(Box::new(provider)))
    }

    #[test]
    fn test_uninitialized_backend() {
        let temp_dir = TempDir::new().unwrap();
        let mut backend = backend_for(&temp_dir);

        assert!(!backend.is_initialized());
        assert_eq!(backend.input_shape(), (1, 3, 1024, 1024));
        assert_eq!(backend.output_shape(), (1, 1, 1024, 1024));
        assert_eq!(
            backend.get_preprocessing_config().unwrap().target_size,
            [1024, 1024]
        );

        let err = backend.infer(&Array4::zeros((1, 3, 8, 8))).unwrap_err();
        assert!(matches!(err, IdPhotoError::Internal(_)));
    }

    #[test]
    fn test_thread_counts() {
        let config = StudioConfig::builder().intra_threads(6).inter_threads(2).build().unwrap();
        assert_eq!(OnnxBackend::thread_counts(&config), (6, 2));

        let (intra, inter) = OnnxBackend::thread_counts(&StudioConfig::default());
        assert!(intra >= 1);
        assert!(inter >= 1);
    }

    #[test]
    fn test_cpu_is_always_listed_available() {
        let providers = OnnxBackend::list_providers();
        assert!(providers.iter().any(|(name, available, _)| name == "CPU" && *available));
    }
}
