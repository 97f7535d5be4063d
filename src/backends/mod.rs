//! Inference backends
//!
//! - ONNX Runtime (`onnx` feature): execution providers for CPU, CUDA and `CoreML`
//! - Tract (`tract` feature): pure Rust, CPU only

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
