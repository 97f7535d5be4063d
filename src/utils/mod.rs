//! Shared helpers for model input preparation and provider selection

pub mod preprocessing;
pub mod providers;

pub use preprocessing::{ImagePreprocessor, LetterboxGeometry, PreprocessingOptions};
pub use providers::{list_all_providers, ProviderInfo, ProviderSelection};
