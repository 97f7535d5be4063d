//! Parsing of `backend:provider` strings and provider availability listing

use crate::{
    config::ExecutionProvider,
    error::{IdPhotoError, Result},
    inference::BackendType,
};

/// One selectable backend/provider combination
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Backend and execution provider picked from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSelection {
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
}

impl ProviderSelection {
    /// Parse `backend:provider` (e.g. `onnx:cuda`, `tract:cpu`) or a bare backend name
    ///
    /// # Errors
    /// - Unknown backend, unknown provider, or a provider the backend can't run
    ///
    /// # Examples
    /// ```rust
    /// use iphoto_id::utils::ProviderSelection;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let selection = ProviderSelection::parse("onnx:cpu")?;
    /// assert_eq!(selection.to_string(), "onnx:cpu");
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim().to_lowercase();
        let (backend, provider) = match value.split_once(':') {
            Some((backend, provider)) => (backend, Some(provider)),
            None => (value.as_str(), None),
        };

        let backend_type = match backend {
            "onnx" => BackendType::Onnx,
            "tract" => BackendType::Tract,
            other => {
                return Err(IdPhotoError::invalid_config(format!(
                    "Unknown backend '{other}'. Supported backends: onnx, tract"
                )))
            },
        };

        let execution_provider = match (backend_type, provider) {
            (backend_type, None) => Self::default_provider(backend_type),
            (BackendType::Onnx, Some("auto")) => ExecutionProvider::Auto,
            (BackendType::Onnx, Some("cpu")) | (BackendType::Tract, Some("cpu")) => {
                ExecutionProvider::Cpu
            },
            (BackendType::Onnx, Some("cuda")) => ExecutionProvider::Cuda,
            (BackendType::Onnx, Some("coreml")) => ExecutionProvider::CoreMl,
            (BackendType::Onnx, Some(other)) => {
                return Err(IdPhotoError::invalid_config(format!(
                    "Unknown ONNX provider '{other}'. Supported: auto, cpu, cuda, coreml"
                )))
            },
            (BackendType::Tract, Some(other)) => {
                return Err(IdPhotoError::invalid_config(format!(
                    "Unknown Tract provider '{other}'. Tract only supports 'cpu'"
                )))
            },
        };

        Ok(Self {
            backend_type,
            execution_provider,
        })
    }

    #[must_use]
    pub fn default_provider(backend_type: BackendType) -> ExecutionProvider {
        match backend_type {
            BackendType::Onnx => ExecutionProvider::Auto,
            BackendType::Tract => ExecutionProvider::Cpu,
        }
    }
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self {
            backend_type: BackendType::Onnx,
            execution_provider: ExecutionProvider::Auto,
        }
    }
}

impl std::fmt::Display for ProviderSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.backend_type, self.execution_provider)
    }
}

impl std::str::FromStr for ProviderSelection {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Every provider combination with its availability on this machine
#[must_use]
pub fn list_all_providers() -> Vec<ProviderInfo> {
    let mut providers = Vec::new();

    #[cfg(feature = "onnx")]
    let onnx: Vec<(String, bool, String)> = crate::backends::OnnxBackend::list_providers();
    #[cfg(not(feature = "onnx"))]
    let onnx: Vec<(String, bool, String)> = Vec::new();

    let onnx_available = |name: &str| {
        onnx.iter()
            .any(|(provider, available, _)| provider.eq_ignore_ascii_case(name) && *available)
    };
    let disabled = if cfg!(feature = "onnx") {
        ""
    } else {
        " (feature disabled)"
    };

    for (execution_provider, description) in [
        (ExecutionProvider::Auto, "ONNX Runtime with auto-selected provider"),
        (ExecutionProvider::Cpu, "ONNX Runtime CPU execution"),
        (ExecutionProvider::Cuda, "ONNX Runtime CUDA GPU acceleration"),
        (ExecutionProvider::CoreMl, "ONNX Runtime CoreML (Apple Silicon) acceleration"),
    ] {
        let available = match execution_provider {
            ExecutionProvider::Auto => onnx_available("cpu"),
            other => onnx_available(&other.to_string()),
        };
        providers.push(ProviderInfo {
            name: format!("onnx:{execution_provider}"),
            backend_type: BackendType::Onnx,
            execution_provider,
            available,
            description: format!("{description}{disabled}"),
        });
    }

    #[cfg(feature = "tract")]
    for (name, available, description) in crate::backends::TractBackend::list_providers() {
        providers.push(ProviderInfo {
            name: format!("tract:{}", name.to_lowercase()),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available,
            description,
        });
    }

    #[cfg(not(feature = "tract"))]
    providers.push(ProviderInfo {
        name: "tract:cpu".to_string(),
        backend_type: BackendType::Tract,
        execution_provider: ExecutionProvider::Cpu,
        available: false,
        description: "Pure Rust CPU inference via Tract (feature disabled)".to_string(),
    });

    providers
}
