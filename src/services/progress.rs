//! Progress reporting for ID photo generation
//!
//! The pipeline reports three steps plus completion. Frontends plug in their
//! own [`ProgressReporter`]; the library ships a no-op one and one that emits
//! `tracing` events.

use crate::types::ProcessingTimings;
use std::sync::Arc;
use std::time::Instant;

/// Pipeline steps, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStage {
    /// Acquiring the segmentation session (may download the model)
    ModelLoading,
    BackgroundRemoval,
    /// Cover-fit placement and encoding
    Composition,
    Completed,
}

impl ProcessingStage {
    /// Number of working steps before [`ProcessingStage::Completed`]
    pub const STEP_COUNT: u8 = 3;

    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::ModelLoading => "Loading segmentation model",
            ProcessingStage::BackgroundRemoval => "Removing background",
            ProcessingStage::Composition => "Composing ID photo",
            ProcessingStage::Completed => "ID photo ready",
        }
    }

    /// 1-based step number, `None` for completion
    #[must_use]
    pub fn step(&self) -> Option<u8> {
        match self {
            ProcessingStage::ModelLoading => Some(1),
            ProcessingStage::BackgroundRemoval => Some(2),
            ProcessingStage::Composition => Some(3),
            ProcessingStage::Completed => None,
        }
    }

    /// Share of the request already done when this stage starts
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::ModelLoading => 0,
            ProcessingStage::BackgroundRemoval => 30,
            ProcessingStage::Composition => 70,
            ProcessingStage::Completed => 100,
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step() {
            Some(step) => write!(
                f,
                "Step {step}/{}: {}",
                Self::STEP_COUNT,
                self.description()
            ),
            None => f.write_str(self.description()),
        }
    }
}

/// Snapshot sent to a reporter when a stage starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: ProcessingStage,
    /// 0-100
    pub progress: u8,
    pub description: String,
    /// Since the request started
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Receives progress of a generation request
pub trait ProgressReporter: Send + Sync {
    fn report_progress(&self, update: ProgressUpdate);

    fn report_completion(&self, timings: &ProcessingTimings);

    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Emits progress as `tracing` events tagged with the request id
#[derive(Debug, Clone)]
pub struct TracingProgressReporter {
    request_id: String,
}

impl TracingProgressReporter {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}

impl ProgressReporter for TracingProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        tracing::info!(
            request_id = %self.request_id,
            progress = update.progress,
            elapsed_ms = update.elapsed_ms,
            "{}",
            update.description
        );
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        tracing::info!(
            request_id = %self.request_id,
            total_ms = timings.total_ms,
            model_load_ms = timings.model_load_ms,
            inference_ms = timings.inference_ms,
            "✅ {}",
            timings.summary()
        );
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        tracing::error!(
            request_id = %self.request_id,
            stage = ?stage,
            "❌ {} failed: {error}",
            stage.description()
        );
    }
}

/// Tracks the current stage and elapsed time of one request
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("current_stage", &self.current_stage)
            .field("elapsed_ms", &self.elapsed_ms())
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Arc::new(NoOpProgressReporter))
    }

    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Report [`ProcessingStage::Completed`] followed by the final timings
    pub fn report_completion(&mut self, timings: &ProcessingTimings) {
        self.report_stage(ProcessingStage::Completed);
        self.reporter.report_completion(timings);
    }

    /// Report a failure at the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::ModelLoading);
        self.reporter.report_error(stage, error);
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records everything it is told
    #[derive(Debug, Default)]
    pub(crate) struct RecordingReporter {
        pub(crate) updates: Mutex<Vec<ProgressUpdate>>,
        pub(crate) completions: Mutex<Vec<ProcessingTimings>>,
        pub(crate) errors: Mutex<Vec<(ProcessingStage, String)>>,
    }

    impl RecordingReporter {
        pub(crate) fn stages(&self) -> Vec<ProcessingStage> {
            self.updates.lock().unwrap().iter().map(|u| u.stage).collect()
        }

        pub(crate) fn errors(&self) -> Vec<(ProcessingStage, String)> {
            self.errors.lock().unwrap().clone()
        }

        pub(crate) fn completion_count(&self) -> usize {
            self.completions.lock().unwrap().len()
        }
    }

    impl ProgressReporter for RecordingReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.updates.lock().unwrap().push(update);
        }

        fn report_completion(&self, timings: &ProcessingTimings) {
            self.completions.lock().unwrap().push(timings.clone());
        }

        fn report_error(&self, stage: ProcessingStage, error: &str) {
            self.errors.lock().unwrap().push((stage, error.to_string()));
        }
    }
}
