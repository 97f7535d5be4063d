//! Services separating codec and progress concerns from the pipeline

pub mod format;
pub mod progress;

pub use format::ImageCodec;
pub use progress::{
    NoOpProgressReporter, ProcessingStage, ProgressReporter, ProgressTracker, ProgressUpdate,
    TracingProgressReporter,
};
