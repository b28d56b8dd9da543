//! End-to-end generation workflows driven by in-memory collaborators
//!
//! These tests exercise the orchestrator through the public API only: a
//! template bundle on disk, encoded portrait bytes in, data URIs out.

use idphoto_composer::{
    backends::test_utils::{
        synthetic_portrait, write_template, MockFaceDetector, MockInpaintingBackend,
        MockLandmarkPredictor, MockSegmentationBackend,
    },
    config::{BackgroundPolicy, OutputFormat, OutputVariant},
    error::{ErrorKind, Result},
    services::ImageIOService,
    GenerationRequest, LandmarkLocator, PipelineConfig, PipelineOrchestrator, PipelineStage,
    TemplateStore,
};
use image::{DynamicImage, GenericImageView};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    templates: TempDir,
    segmentation: Arc<MockSegmentationBackend>,
    inpainting: Arc<MockInpaintingBackend>,
}

impl Harness {
    fn new(width: u32, height: u32) -> Result<Self> {
        let templates = tempfile::tempdir()?;
        write_template(templates.path(), "001", width, height)?;
        Ok(Self {
            templates,
            segmentation: Arc::new(MockSegmentationBackend::new()),
            inpainting: Arc::new(MockInpaintingBackend::new()),
        })
    }

    fn orchestrator(&self, config: PipelineConfig, detector: MockFaceDetector) -> Result<PipelineOrchestrator> {
        let locator = LandmarkLocator::new(
            Arc::new(detector),
            Arc::new(MockLandmarkPredictor::frontal()),
        );
        PipelineOrchestrator::new(
            PipelineConfig {
                templates_dir: self.templates.path().to_path_buf(),
                ..config
            },
            locator,
            self.segmentation.clone(),
            self.inpainting.clone(),
        )
    }
}

fn portrait(width: u32, height: u32) -> Result<Vec<u8>> {
    ImageIOService::encode(
        &DynamicImage::ImageRgb8(synthetic_portrait(width, height)),
        OutputFormat::Jpeg,
        95,
    )
}

fn decode_variant(uri: &str) -> Result<DynamicImage> {
    let (_, bytes) = ImageIOService::from_data_uri(uri)?;
    ImageIOService::load_from_bytes(&bytes)
}

#[tokio::test]
async fn test_white_template_produces_one_canvas_sized_variant() -> Result<()> {
    let harness = Harness::new(800, 600)?;
    let orchestrator =
        harness.orchestrator(PipelineConfig::default(), MockFaceDetector::centered(640, 480))?;

    let response = orchestrator
        .generate(GenerationRequest::new(portrait(640, 480)?, "001"))
        .await?;

    assert_eq!(response.status, "success");
    assert_eq!(response.results.len(), 1);
    let uri = &response.results["id_photo_white_background"];
    assert!(uri.starts_with("data:image/jpeg;base64,"));

    let photo = decode_variant(uri)?;
    assert_eq!(photo.dimensions(), (800, 600));

    // background stays white, the template torso survives the color key
    let rgb = photo.to_rgb8();
    assert!(rgb.get_pixel(2, 2).0.iter().all(|&c| c > 240));
    assert!(rgb.get_pixel(400, 590).0.iter().all(|&c| c < 140));

    assert_eq!(harness.segmentation.call_count(), 1);
    assert_eq!(harness.inpainting.call_count(), 1);
    assert!(response.processing_time_seconds >= 0.0);
    Ok(())
}

#[tokio::test]
async fn test_nonexistent_template_fails_before_remote_calls() -> Result<()> {
    let harness = Harness::new(200, 150)?;
    let orchestrator =
        harness.orchestrator(PipelineConfig::default(), MockFaceDetector::centered(200, 150))?;

    let err = orchestrator
        .generate(GenerationRequest::new(portrait(200, 150)?, "nonexistent"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
    assert!(err.to_string().contains("nonexistent"));
    assert_eq!(harness.segmentation.call_count(), 0);
    assert_eq!(harness.inpainting.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_faceless_portrait_never_reaches_inpainting() -> Result<()> {
    let harness = Harness::new(200, 150)?;
    let orchestrator = harness.orchestrator(PipelineConfig::default(), MockFaceDetector::empty())?;

    let err = orchestrator
        .generate(GenerationRequest::new(portrait(200, 150)?, "001"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoFaceDetected);
    assert_eq!(harness.inpainting.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_multiple_variants_with_pass_through() -> Result<()> {
    let harness = Harness::new(240, 180)?;
    let config = PipelineConfig::builder()
        .background_policy(BackgroundPolicy::PassThrough)
        .add_variant(OutputVariant {
            name: "blue_png".to_string(),
            background: [67, 142, 219],
            format: OutputFormat::Png,
            jpeg_quality: 90,
        })
        .build()?;
    let orchestrator = harness.orchestrator(config, MockFaceDetector::centered(240, 180))?;

    let response = orchestrator
        .generate(GenerationRequest::new(portrait(240, 180)?, "001"))
        .await?;

    let names: Vec<&str> = response.results.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["blue_png", "id_photo_white_background"]);
    assert!(response.results["blue_png"].starts_with("data:image/png;base64,"));
    for uri in response.results.values() {
        assert_eq!(decode_variant(uri)?.dimensions(), (240, 180));
    }
    Ok(())
}

#[tokio::test]
async fn test_response_serializes_with_timings() -> Result<()> {
    let harness = Harness::new(160, 120)?;
    let orchestrator =
        harness.orchestrator(PipelineConfig::default(), MockFaceDetector::centered(160, 120))?;

    let response = orchestrator
        .generate(GenerationRequest::new(portrait(160, 120)?, "001"))
        .await?;
    assert!(response
        .timings
        .iter()
        .any(|t| t.stage == PipelineStage::Inpainting));

    let json = serde_json::to_value(&response)?;
    assert_eq!(json["status"], "success");
    assert_eq!(json["template_id"], "001");
    assert!(json["results"]["id_photo_white_background"].is_string());
    assert!(json["timings"].is_array());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_share_one_orchestrator() -> Result<()> {
    let harness = Harness::new(160, 120)?;
    let orchestrator = Arc::new(
        harness.orchestrator(PipelineConfig::default(), MockFaceDetector::centered(160, 120))?,
    );

    let mut handles = Vec::new();
    for _ in 0..4 {
        let orchestrator = orchestrator.clone();
        let bytes = portrait(160, 120)?;
        handles.push(tokio::spawn(async move {
            orchestrator
                .generate(GenerationRequest::new(bytes, "001"))
                .await
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for handle in handles {
        let response = handle.await.map_err(|e| idphoto_composer::IdPhotoError::internal(e.to_string()))??;
        ids.insert(response.request_id);
    }
    assert_eq!(ids.len(), 4);
    assert_eq!(harness.inpainting.call_count(), 4);
    Ok(())
}

#[test]
fn test_template_store_lists_bundles() -> Result<()> {
    let harness = Harness::new(64, 48)?;
    write_template(harness.templates.path(), "002", 64, 48)?;
    let store = TemplateStore::new(harness.templates.path());
    assert_eq!(store.list()?, vec!["001", "002"]);
    assert_eq!(store.load("002")?.canvas_size(), (64, 48));
    Ok(())
}
