#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # ID Photo Composer
//!
//! Turns a casual frontal portrait into a studio-style ID photo by placing the
//! subject's head onto a pre-shot template body and synthesizing a natural neck
//! between them.
//!
//! The pipeline for one request:
//!
//! 1. **Landmarks**: detect the primary face and regress its 68 landmarks
//! 2. **Segmentation**: an external face parser labels every pixel (runs
//!    concurrently with step 1)
//! 3. **Head matting**: head labels become an alpha matte, softened at the edge
//! 4. **Alignment**: a least-squares similarity transform over six stable
//!    landmarks warps the head onto the template canvas
//! 5. **Long-neck assets**: the template's generous neck mask minus the head
//!    alpha is the strip an external inpainting model synthesizes
//! 6. **Compositing**: background replacement and one encoded image per
//!    configured output variant
//!
//! ## Feature Flags
//!
//! - `seeta` (default): SeetaFace frontal face detector via `rustface`
//! - `cli` (default): the `idphoto` command-line tool and tracing subscriber
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idphoto_composer::{GenerationRequest, PipelineConfig, PipelineOrchestrator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::from_file("idphoto.json")?;
//! let orchestrator = PipelineOrchestrator::from_config(config)?;
//!
//! let photo = std::fs::read("portrait.jpg")?;
//! let response = orchestrator
//!     .generate(GenerationRequest::new(photo, "001"))
//!     .await?;
//! for (variant, data_uri) in &response.results {
//!     println!("{}: {} bytes", variant, data_uri.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom collaborators
//!
//! Every external dependency sits behind a trait: [`FaceDetector`],
//! [`LandmarkPredictor`], [`SegmentationBackend`] and [`InpaintingBackend`].
//! [`PipelineOrchestrator::new`] accepts any implementation, which is how the
//! test suite drives the pipeline with the doubles in `backends::test_utils`
//! (enabled by the `test-utils` feature).

pub mod alignment;
pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod inference;
pub mod inpaint_assets;
pub mod landmarks;
pub mod mask;
pub mod matting;
pub mod pipeline;
pub mod services;
pub mod template;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

// Public API exports
pub use alignment::{fit_similarity, AlignmentEstimator, SimilarityTransform, STABLE_LANDMARKS};
pub use backends::{HttpInpaintingClient, HttpSegmentationClient};
pub use compositor::Compositor;
pub use config::{
    BackgroundPolicy, CanvasBase, CompositingConfig, HeadEdgePolicy, InpaintAssetConfig,
    InpaintPrompt, MattingConfig, ModelConfig, OutputFormat, OutputVariant, PipelineConfig,
    PipelineConfigBuilder, RemoteConfig,
};
pub use error::{ErrorKind, IdPhotoError, Result};
pub use inference::{InpaintingBackend, SegmentationBackend};
pub use inpaint_assets::{InpaintAssetBuilder, InpaintAssets};
pub use landmarks::{ErtShapePredictor, FaceDetector, LandmarkLocator, LandmarkPredictor};
#[cfg(feature = "seeta")]
pub use landmarks::SeetaFaceDetector;
pub use matting::{HeadExtractor, HEAD_LABELS};
pub use pipeline::PipelineOrchestrator;
pub use services::{
    ImageIOService, NoOpProgressReporter, PipelineStage, ProgressReporter, ProgressTracker,
    ProgressUpdate, StageTiming, TracingProgressReporter,
};
pub use template::{prepare_template, TemplateBundle, TemplateStore};
pub use types::{
    FaceRect, GenerationRequest, GenerationResponse, LandmarkSet, SegmentationMask,
    LANDMARK_COUNT,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};
