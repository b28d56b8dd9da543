//! Progress reporting service
//!
//! Stage timing is advisory: reporters observe the pipeline but never steer it.

use instant::Instant;
use serde::{Deserialize, Serialize};

/// Stages of one generation request, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Loading and validating the template bundle
    TemplateLoading,
    /// Decoding the uploaded user image
    ImageDecoding,
    /// Face detection and landmark regression
    LandmarkLocation,
    /// Remote face parsing
    Segmentation,
    /// Label-driven head matting
    HeadExtraction,
    /// Similarity transform estimation and warping
    Alignment,
    /// Long-neck base image and region mask
    InpaintAssets,
    /// Remote neck synthesis
    Inpainting,
    /// Background replacement and variant encoding
    Compositing,
}

impl PipelineStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::TemplateLoading => "Loading template bundle",
            Self::ImageDecoding => "Decoding user image",
            Self::LandmarkLocation => "Locating facial landmarks",
            Self::Segmentation => "Parsing face regions",
            Self::HeadExtraction => "Extracting head",
            Self::Alignment => "Aligning head to template",
            Self::InpaintAssets => "Building inpainting assets",
            Self::Inpainting => "Synthesizing neck region",
            Self::Compositing => "Compositing output variants",
        }
    }

    /// Rough progress percentage once this stage has finished
    #[must_use]
    pub fn progress_percentage(self) -> u8 {
        match self {
            Self::TemplateLoading => 5,
            Self::ImageDecoding => 10,
            Self::LandmarkLocation => 20,
            Self::Segmentation => 35,
            Self::HeadExtraction => 40,
            Self::Alignment => 45,
            Self::InpaintAssets => 50,
            Self::Inpainting => 90,
            Self::Compositing => 100,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Wall-clock duration of one finished stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: PipelineStage,
    pub elapsed_ms: u64,
}

/// Progress update emitted when a stage finishes
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: PipelineStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Duration of this stage (milliseconds)
    pub stage_ms: u64,
    /// Elapsed time since the request started (milliseconds)
    pub elapsed_ms: u64,
}

/// Trait for reporting pipeline progress
///
/// Implementations must be cheap: they run inline on the request path.
pub trait ProgressReporter: Send + Sync {
    /// Report a finished stage
    fn report_progress(&self, update: ProgressUpdate);

    /// Report request completion with all stage timings
    fn report_completion(&self, request_id: &str, timings: &[StageTiming], total_ms: u64);

    /// Report a failure inside `stage`
    fn report_error(&self, stage: PipelineStage, error: &str);
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _request_id: &str, _timings: &[StageTiming], _total_ms: u64) {}

    fn report_error(&self, _stage: PipelineStage, _error: &str) {}
}

/// Reporter that emits structured `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressReporter {
    verbose: bool,
}

impl TracingProgressReporter {
    /// * `verbose` - Also emit the per-stage breakdown on completion
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for TracingProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        tracing::info!(
            stage = ?update.stage,
            progress = update.progress,
            stage_ms = update.stage_ms,
            elapsed_ms = update.elapsed_ms,
            "[{}%] {}",
            update.progress,
            update.stage.description()
        );
    }

    fn report_completion(&self, request_id: &str, timings: &[StageTiming], total_ms: u64) {
        tracing::info!(request_id, total_ms, "ID photo generated in {}ms", total_ms);

        if self.verbose {
            for timing in timings {
                tracing::info!(
                    request_id,
                    stage = ?timing.stage,
                    elapsed_ms = timing.elapsed_ms,
                    "  {}: {}ms",
                    timing.stage.description(),
                    timing.elapsed_ms
                );
            }
        }
    }

    fn report_error(&self, stage: PipelineStage, error: &str) {
        tracing::error!(stage = ?stage, "Error during {}: {}", stage.description(), error);
    }
}

/// Per-request tracker that measures stages and forwards them to a reporter
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    start_time: Instant,
    stage_start: Instant,
    current_stage: Option<PipelineStage>,
    timings: Vec<StageTiming>,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter) -> Self {
        let now = Instant::now();
        Self {
            reporter,
            start_time: now,
            stage_start: now,
            current_stage: None,
            timings: Vec::new(),
        }
    }

    /// Mark the start of `stage`
    pub fn begin(&mut self, stage: PipelineStage) {
        self.current_stage = Some(stage);
        self.stage_start = Instant::now();
    }

    /// Close the current stage and report it
    pub fn finish(&mut self) {
        let Some(stage) = self.current_stage.take() else {
            return;
        };
        let stage_ms = self.stage_start.elapsed().as_millis() as u64;
        self.timings.push(StageTiming {
            stage,
            elapsed_ms: stage_ms,
        });
        self.reporter.report_progress(ProgressUpdate {
            stage,
            progress: stage.progress_percentage(),
            stage_ms,
            elapsed_ms: self.elapsed_ms(),
        });
    }

    /// Record an already-measured stage (used for work that ran concurrently)
    ///
    /// Leaves no stage in progress.
    pub fn record(&mut self, stage: PipelineStage, elapsed_ms: u64) {
        self.current_stage = None;
        self.timings.push(StageTiming { stage, elapsed_ms });
        self.reporter.report_progress(ProgressUpdate {
            stage,
            progress: stage.progress_percentage(),
            stage_ms: elapsed_ms,
            elapsed_ms: self.elapsed_ms(),
        });
    }

    /// Report an error against the stage in progress
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(PipelineStage::TemplateLoading);
        self.reporter.report_error(stage, error);
    }

    /// Report completion and hand back the collected timings
    pub fn complete(self, request_id: &str) -> Vec<StageTiming> {
        let total_ms = self.elapsed_ms();
        self.reporter
            .report_completion(request_id, &self.timings, total_ms);
        self.timings
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.current_stage
    }

    #[must_use]
    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingReporter {
        updates: Arc<Mutex<Vec<PipelineStage>>>,
        completions: Arc<Mutex<Vec<(String, usize)>>>,
        errors: Arc<Mutex<Vec<(PipelineStage, String)>>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.updates.lock().unwrap().push(update.stage);
        }

        fn report_completion(&self, request_id: &str, timings: &[StageTiming], _total_ms: u64) {
            self.completions
                .lock()
                .unwrap()
                .push((request_id.to_string(), timings.len()));
        }

        fn report_error(&self, stage: PipelineStage, error: &str) {
            self.errors
                .lock()
                .unwrap()
                .push((stage, error.to_string()));
        }
    }

    #[test]
    fn test_stage_percentages_are_monotonic() {
        let stages = [
            PipelineStage::TemplateLoading,
            PipelineStage::ImageDecoding,
            PipelineStage::LandmarkLocation,
            PipelineStage::Segmentation,
            PipelineStage::HeadExtraction,
            PipelineStage::Alignment,
            PipelineStage::InpaintAssets,
            PipelineStage::Inpainting,
            PipelineStage::Compositing,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].progress_percentage() < pair[1].progress_percentage());
        }
        assert_eq!(PipelineStage::Compositing.progress_percentage(), 100);
    }

    #[test]
    fn test_tracker_records_stages_in_order() {
        let reporter = RecordingReporter::default();
        let updates = reporter.updates.clone();
        let completions = reporter.completions.clone();

        let mut tracker = ProgressTracker::new(&reporter);
        tracker.begin(PipelineStage::TemplateLoading);
        tracker.finish();
        tracker.record(PipelineStage::Segmentation, 12);
        tracker.begin(PipelineStage::Compositing);
        tracker.finish();
        // finishing twice is a no-op
        tracker.finish();

        let timings = tracker.complete("req-1");
        assert_eq!(timings.len(), 3);
        assert_eq!(timings[1].stage, PipelineStage::Segmentation);
        assert_eq!(timings[1].elapsed_ms, 12);
        assert_eq!(
            *updates.lock().unwrap(),
            vec![
                PipelineStage::TemplateLoading,
                PipelineStage::Segmentation,
                PipelineStage::Compositing
            ]
        );
        assert_eq!(*completions.lock().unwrap(), vec![("req-1".to_string(), 3)]);
    }

    #[test]
    fn test_tracker_error_uses_current_stage() {
        let reporter = RecordingReporter::default();
        let errors = reporter.errors.clone();

        let mut tracker = ProgressTracker::new(&reporter);
        tracker.begin(PipelineStage::Inpainting);
        tracker.report_error("HTTP 503");

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, PipelineStage::Inpainting);
    }

    #[test]
    fn test_record_leaves_no_stage_in_progress() {
        let reporter = RecordingReporter::default();
        let mut tracker = ProgressTracker::new(&reporter);
        tracker.begin(PipelineStage::LandmarkLocation);
        tracker.record(PipelineStage::LandmarkLocation, 7);
        tracker.record(PipelineStage::Segmentation, 9);
        assert_eq!(tracker.current_stage(), None);

        // a later finish() must not add a phantom timing
        tracker.finish();
        assert_eq!(tracker.timings().len(), 2);
    }

    #[test]
    fn test_stage_timing_serialization() {
        let timing = StageTiming {
            stage: PipelineStage::InpaintAssets,
            elapsed_ms: 42,
        };
        let json = serde_json::to_string(&timing).unwrap();
        assert_eq!(json, r#"{"stage":"inpaint_assets","elapsed_ms":42}"#);
    }

    #[test]
    fn test_no_op_reporter() {
        let reporter = NoOpProgressReporter;
        let mut tracker = ProgressTracker::new(&reporter);
        tracker.begin(PipelineStage::Alignment);
        tracker.finish();
        tracker.report_error("ignored");
        assert_eq!(tracker.complete("req").len(), 1);
    }
}
