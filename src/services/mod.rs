//! Supporting services kept apart from the pipeline stages

pub mod io;
pub mod progress;

pub use io::ImageIOService;
pub use progress::{
    NoOpProgressReporter, PipelineStage, ProgressReporter, ProgressTracker, ProgressUpdate,
    StageTiming, TracingProgressReporter,
};
