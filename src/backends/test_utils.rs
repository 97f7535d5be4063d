//! Mock backends and factories for tests
//!
//! The mock produces a deterministic mask without any model file so the full
//! studio pipeline can run in unit tests.

use crate::{
    config::StudioConfig,
    error::{IdPhotoError, Result},
    inference::{BackendFactory, BackendType, InferenceBackend},
    models::{ModelInfo, ModelManager, PreprocessingConfig},
};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mask the mock model predicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockMask {
    /// Soft disc in the middle of the input
    Circle,
    /// Everything is foreground
    Full,
    /// Everything is background
    Empty,
}

/// Mock segmentation backend
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    mask: MockMask,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::with_mask(MockMask::Circle)
    }

    #[must_use]
    pub fn with_mask(mask: MockMask) -> Self {
        Self {
            initialized: false,
            mask,
            model_info: ModelInfo {
                name: "mock-isnet".to_string(),
                precision: "fp32".to_string(),
                size_bytes: 1024,
                input_shape: (1, 3, 32, 32),
                output_shape: (1, 1, 32, 32),
            },
            preprocessing_config: PreprocessingConfig {
                target_size: [32, 32],
                normalization_mean: [0.5, 0.5, 0.5],
                normalization_std: [1.0, 1.0, 1.0],
            },
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
        }
    }

    #[must_use]
    pub fn failing_init() -> Self {
        let mut backend = Self::new();
        backend.should_fail_init = true;
        backend
    }

    #[must_use]
    pub fn failing_inference() -> Self {
        let mut backend = Self::new();
        backend.should_fail_inference = true;
        backend
    }

    /// Method calls recorded so far
    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn generate_mask(&self, batch_size: usize) -> Array4<f32> {
        let (_, _, height, width) = self.model_info.output_shape;
        let center_x = width as f32 / 2.0;
        let center_y = height as f32 / 2.0;
        let radius = width.min(height) as f32 / 3.0;

        Array4::from_shape_fn((batch_size, 1, height, width), |(_, _, y, x)| match self.mask {
            MockMask::Full => 1.0,
            MockMask::Empty => 0.0,
            MockMask::Circle => {
                let dx = x as f32 + 0.5 - center_x;
                let dy = y as f32 + 0.5 - center_y;
                let distance = (dx * dx + dy * dy).sqrt();
                ((radius - distance) / radius * 4.0).clamp(0.0, 1.0)
            },
        })
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &StudioConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(IdPhotoError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(5)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(IdPhotoError::internal("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(IdPhotoError::inference("Mock backend inference failed"));
        }

        let (batch, channels, height, width) = input.dim();
        let (_, expected_channels, expected_height, expected_width) = self.model_info.input_shape;
        if channels != expected_channels || height != expected_height || width != expected_width {
            return Err(IdPhotoError::inference(format!(
                "Unexpected input shape {:?}",
                input.dim()
            )));
        }

        Ok(self.generate_mask(batch))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.input_shape
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.output_shape
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.preprocessing_config.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Factory handing out [`MockBackend`]s and counting how often it was asked
#[derive(Debug, Clone)]
pub struct MockBackendFactory {
    template: MockBackend,
    created: Arc<AtomicUsize>,
}

impl MockBackendFactory {
    #[must_use]
    pub fn new(template: MockBackend) -> Self {
        Self {
            template,
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of backends created so far
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Default for MockBackendFactory {
    fn default() -> Self {
        Self::new(MockBackend::new())
    }
}

impl BackendFactory for MockBackendFactory {
    fn create_backend(
        &self,
        _backend_type: BackendType,
        _model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.template.clone()))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_requires_initialization() {
        let mut backend = MockBackend::new();
        let input = Array4::zeros((1, 3, 32, 32));
        assert!(backend.infer(&input).is_err());

        assert!(backend.initialize(&StudioConfig::default()).unwrap().is_some());
        assert!(backend.initialize(&StudioConfig::default()).unwrap().is_none());
        let output = backend.infer(&input).unwrap();
        assert_eq!(output.dim(), (1, 1, 32, 32));
        assert_eq!(
            backend.call_history(),
            vec!["infer", "initialize", "initialize", "infer"]
        );
    }

    #[test]
    fn test_mock_masks() {
        let input = Array4::zeros((1, 3, 32, 32));

        let mut circle = MockBackend::new();
        circle.initialize(&StudioConfig::default()).unwrap();
        let output = circle.infer(&input).unwrap();
        assert!((output[[0, 0, 16, 16]] - 1.0).abs() < f32::EPSILON);
        assert!(output[[0, 0, 0, 0]].abs() < f32::EPSILON);

        let mut empty = MockBackend::with_mask(MockMask::Empty);
        empty.initialize(&StudioConfig::default()).unwrap();
        assert!(empty.infer(&input).unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_mock_rejects_wrong_shape() {
        let mut backend = MockBackend::new();
        backend.initialize(&StudioConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 64, 64))).is_err());
    }

    #[test]
    fn test_failing_variants() {
        assert!(MockBackend::failing_init()
            .initialize(&StudioConfig::default())
            .is_err());

        let mut backend = MockBackend::failing_inference();
        backend.initialize(&StudioConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 32, 32))).is_err());
    }
}
