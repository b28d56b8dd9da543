//! End-to-end ID photo generation
//!
//! The orchestrator owns shared read-only handles (landmark models, collaborator
//! clients, template store) and runs each request in isolation: all stage
//! artifacts are per-request buffers, and optional debug dumps land under a
//! directory named after the request id.

use crate::{
    alignment::AlignmentEstimator,
    compositor::Compositor,
    config::PipelineConfig,
    error::{IdPhotoError, Result},
    inference::{InpaintingBackend, SegmentationBackend},
    inpaint_assets::InpaintAssetBuilder,
    landmarks::LandmarkLocator,
    matting::HeadExtractor,
    services::{ImageIOService, NoOpProgressReporter, PipelineStage, ProgressReporter, ProgressTracker},
    template::{self, TemplateStore},
    types::{GenerationRequest, GenerationResponse, LandmarkSet},
};
use image::DynamicImage;
use instant::Instant;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info_span, Instrument};

/// Writes stage artifacts of one request under `<root>/<request_id>/`
struct IntermediateWriter {
    dir: PathBuf,
}

impl IntermediateWriter {
    fn create(root: &std::path::Path, request_id: &str) -> Result<Self> {
        let dir = root.join(request_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| IdPhotoError::file_io_error("create intermediates directory", &dir, &e))?;
        Ok(Self { dir })
    }

    fn save(&self, name: &str, image: DynamicImage) -> Result<()> {
        ImageIOService::save_image(&image, self.dir.join(name))
    }
}

/// Sequences landmark location, segmentation, matting, alignment, inpainting
/// and compositing for one request at a time, safe to share across tasks
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    templates: TemplateStore,
    locator: LandmarkLocator,
    segmentation: Arc<dyn SegmentationBackend>,
    inpainting: Arc<dyn InpaintingBackend>,
    extractor: HeadExtractor,
    aligner: AlignmentEstimator,
    asset_builder: InpaintAssetBuilder,
    compositor: Compositor,
    reporter: Arc<dyn ProgressReporter>,
}

impl PipelineOrchestrator {
    /// Assemble an orchestrator from already-loaded collaborators
    ///
    /// # Errors
    /// `InvalidConfig` when the configuration does not validate
    pub fn new(
        config: PipelineConfig,
        locator: LandmarkLocator,
        segmentation: Arc<dyn SegmentationBackend>,
        inpainting: Arc<dyn InpaintingBackend>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            templates: TemplateStore::new(config.templates_dir.clone()),
            extractor: HeadExtractor::new(config.matting.clone()),
            aligner: AlignmentEstimator::default(),
            asset_builder: InpaintAssetBuilder::new(config.inpaint_assets.clone()),
            compositor: Compositor::new(config.compositing.clone()),
            config,
            locator,
            segmentation,
            inpainting,
            reporter: Arc::new(NoOpProgressReporter),
        })
    }

    /// Load the landmark models and build HTTP clients for both collaborators
    #[cfg(feature = "seeta")]
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        use crate::backends::{HttpInpaintingClient, HttpSegmentationClient};

        let locator = LandmarkLocator::from_config(&config.models)?;
        let segmentation = Arc::new(HttpSegmentationClient::from_config(&config.remote)?);
        let inpainting = Arc::new(HttpInpaintingClient::from_config(&config.remote)?);
        Self::new(config, locator, segmentation, inpainting)
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Compute and store the landmark file of a template
    pub fn prepare_template(&self, template_id: &str) -> Result<LandmarkSet> {
        template::prepare_template(&self.templates, template_id, &self.locator)
    }

    /// Run the whole pipeline for one request
    ///
    /// # Errors
    /// Fails fast with the first stage error:
    /// - `TemplateNotFound` before any collaborator is contacted
    /// - `AssetIo` when the user image cannot be decoded
    /// - `NoFaceDetected`, `TransformEstimationFailed`, `RemoteService`
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "generate",
            request_id = %request_id,
            template_id = %request.template_id
        );
        self.run(request_id, request).instrument(span).await
    }

    async fn run(&self, request_id: String, request: GenerationRequest) -> Result<GenerationResponse> {
        let mut tracker = ProgressTracker::new(self.reporter.as_ref());
        match self.execute(&request_id, &request, &mut tracker).await {
            Ok(results) => {
                let processing_time_seconds = tracker.elapsed_ms() as f64 / 1000.0;
                let timings = tracker.complete(&request_id);
                Ok(GenerationResponse {
                    request_id,
                    template_id: request.template_id,
                    status: "success".to_string(),
                    processing_time_seconds,
                    generated_at: chrono::Utc::now(),
                    results,
                    timings,
                })
            },
            Err(e) => {
                tracker.report_error(&e.to_string());
                Err(e)
            },
        }
    }

    async fn execute(
        &self,
        request_id: &str,
        request: &GenerationRequest,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<std::collections::BTreeMap<String, String>> {
        tracker.begin(PipelineStage::TemplateLoading);
        let bundle = self.templates.load(&request.template_id)?;
        let dump = match &self.config.intermediates_dir {
            Some(root) => Some(IntermediateWriter::create(root, request_id)?),
            None => None,
        };
        tracker.finish();

        tracker.begin(PipelineStage::ImageDecoding);
        let user_image = ImageIOService::load_from_bytes(&request.user_image)?;
        tracker.finish();
        tracing::debug!(
            width = user_image.width(),
            height = user_image.height(),
            "Decoded user image"
        );

        // landmark regression is CPU-bound and overlaps the segmentation call;
        // each branch tags its error with the stage that failed
        let locator = self.locator.clone();
        let gray = user_image.to_luma8();
        let landmark_task = async move {
            let start = Instant::now();
            let landmarks = tokio::task::spawn_blocking(move || locator.locate_gray(&gray))
                .await
                .map_err(|e| IdPhotoError::internal(format!("Landmark task failed: {}", e)))
                .and_then(|located| located)
                .map_err(|e| (PipelineStage::LandmarkLocation, e))?;
            Ok::<_, (PipelineStage, IdPhotoError)>((landmarks, start.elapsed().as_millis() as u64))
        };
        let rgb = user_image.to_rgb8();
        let segmentation_task = async {
            let start = Instant::now();
            let mask = self
                .segmentation
                .segment(&rgb)
                .await
                .map_err(|e| (PipelineStage::Segmentation, e))?;
            Ok::<_, (PipelineStage, IdPhotoError)>((mask, start.elapsed().as_millis() as u64))
        };
        let ((landmarks, landmark_ms), (segmentation, segmentation_ms)) =
            match tokio::try_join!(landmark_task, segmentation_task) {
                Ok(joined) => joined,
                Err((stage, e)) => {
                    tracker.begin(stage);
                    return Err(e);
                },
            };
        tracker.record(PipelineStage::LandmarkLocation, landmark_ms);
        tracker.record(PipelineStage::Segmentation, segmentation_ms);

        tracker.begin(PipelineStage::HeadExtraction);
        let head = self.extractor.extract(&user_image, &segmentation)?;
        tracker.finish();

        tracker.begin(PipelineStage::Alignment);
        let (aligned, transform) =
            self.aligner
                .align(&head, &landmarks, &bundle.landmarks, bundle.canvas_size())?;
        tracker.finish();
        tracing::debug!(
            scale = transform.scale(),
            rotation_deg = transform.rotation_degrees(),
            "Head aligned onto template canvas"
        );

        tracker.begin(PipelineStage::InpaintAssets);
        let assets = self
            .asset_builder
            .build(&aligned, &bundle.head_removed, &bundle.long_neck)?;
        if let Some(dump) = &dump {
            dump.save("head.png", DynamicImage::ImageRgba8(head))?;
            dump.save("aligned_head.png", DynamicImage::ImageRgba8(aligned))?;
            dump.save("init_image.png", DynamicImage::ImageRgb8(assets.init_image.clone()))?;
            dump.save("mask_image.png", DynamicImage::ImageLuma8(assets.mask.clone()))?;
        }
        tracker.finish();

        tracker.begin(PipelineStage::Inpainting);
        let inpainted = self.inpainting.inpaint(&assets, &self.config.prompt).await?;
        if let Some(dump) = &dump {
            dump.save("inpainted.png", DynamicImage::ImageRgb8(inpainted.clone()))?;
        }
        tracker.finish();

        tracker.begin(PipelineStage::Compositing);
        let results = self
            .compositor
            .render_variants(inpainted, &bundle.template, &self.config.variants)?;
        tracker.finish();

        Ok(results)
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("templates", &self.templates)
            .field("segmentation", &self.segmentation.name())
            .field("inpainting", &self.inpainting.name())
            .finish_non_exhaustive()
    }
}
