//! Tract backend (pure Rust inference, CPU only)

use crate::config::StudioConfig;
use crate::error::{IdPhotoError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use ndarray::Array4;
use std::time::{Duration, Instant};
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend
#[derive(Debug)]
pub struct TractBackend {
    model: Option<TractModel>,
    model_manager: ModelManager,
    model_info: Option<ModelInfo>,
}

impl TractBackend {
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            model: None,
            model_manager,
            model_info: None,
        }
    }

    /// Tract only runs on the CPU
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, _config: &StudioConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }

        let start = Instant::now();
        let model_info = self.model_manager.get_info()?;
        let [height, width] = self.model_manager.get_preprocessing_config()?.target_size;
        let model_data = self.model_manager.load_model()?;

        log::info!("🚀 Loading {} into Tract (CPU)", model_info.name);

        // Pinning the input shape lets tract fully type and optimize the graph
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| IdPhotoError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact([1, 3, height as usize, width as usize]).into())
            .map_err(|e| IdPhotoError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| IdPhotoError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| IdPhotoError::model(format!("Failed to create runnable model: {e}")))?;

        let elapsed = start.elapsed();
        log::info!("✅ Tract backend ready in {}ms", elapsed.as_millis());

        self.model = Some(model);
        self.model_info = Some(model_info);
        Ok(Some(elapsed))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| IdPhotoError::internal("Tract model not initialized"))?;

        let start = Instant::now();
        let (n, c, h, w) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        let input_tensor = Tensor::from_shape(&[n, c, h, w], &data)
            .map_err(|e| IdPhotoError::inference(format!("Failed to build input tensor: {e}")))?;

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| IdPhotoError::inference(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| IdPhotoError::inference("No output tensor found"))?
            .into_arc_tensor();

        let shape = output.shape().to_vec();
        let values = output
            .as_slice::<f32>()
            .map_err(|e| IdPhotoError::inference(format!("Failed to read output tensor: {e}")))?;

        let result = match shape.as_slice() {
            [n, c, h, w] => Array4::from_shape_vec((*n, *c, *h, *w), values.to_vec()).map_err(
                |e| IdPhotoError::inference(format!("Failed to reshape output tensor: {e}")),
            )?,
            _ => {
                return Err(IdPhotoError::inference(format!(
                    "Expected 4D output tensor, got {}D",
                    shape.len()
                )))
            },
        };

        log::debug!("Tract inference completed in {}ms", start.elapsed().as_millis());
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
        self.model.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FolderModelProvider;
    use tempfile::TempDir;

    #[test]
    fn test_invalid_model_fails_without_initializing() {
        let temp_dir = TempDir::new().unwrap();
        crate::models::tests::write_model_folder(temp_dir.path(), &["model.onnx"]);
        let provider = FolderModelProvider::new(temp_dir.path(), None, None).unwrap();
        let mut backend =
            TractBackend::with_model_manager(ModelManager::with_provider(Box::new(provider)));

        assert!(backend.initialize(&StudioConfig::default()).is_err());
        assert!(!backend.is_initialized());
        assert!(backend.infer(&Array4::zeros((1, 3, 4, 4))).is_err());
        assert_eq!(backend.output_shape(), (1, 1, 1024, 1024));
    }

    #[test]
    fn test_cpu_only() {
        let providers = TractBackend::list_providers();
        assert_eq!(providers.len(), 1);
        assert!(providers[0].1);
    }
}
