//! Test doubles for every injected seam and on-disk template fixtures
//!
//! The doubles are deterministic and record their calls, so tests can assert
//! both outputs and which collaborators were (or were not) contacted.

use crate::{
    config::InpaintPrompt,
    error::{IdPhotoError, Result},
    inference::{InpaintingBackend, SegmentationBackend},
    inpaint_assets::InpaintAssets,
    landmarks::{FaceDetector, LandmarkPredictor},
    template::{HEAD_REMOVED_IMAGE, LONG_NECK_MASK, TEMPLATE_IMAGE, TEMPLATE_LANDMARKS},
    types::{FaceRect, LandmarkSet, SegmentationMask},
};
use async_trait::async_trait;
use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Skin tone used for synthesized pixels
pub const SKIN: [u8; 3] = [224, 172, 140];

#[derive(Debug, Clone, Default)]
struct CallHistory(Arc<Mutex<Vec<String>>>);

impl CallHistory {
    fn record(&self, call: impl Into<String>) {
        if let Ok(mut history) = self.0.lock() {
            history.push(call.into());
        }
    }

    fn calls(&self) -> Vec<String> {
        self.0.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

/// Canonical frontal 68-point layout in coordinates normalized to a face box
#[must_use]
pub fn canonical_layout() -> Vec<(f32, f32)> {
    let mut points = Vec::with_capacity(68);
    // jaw 0-16, chin at 8
    for i in 0..17 {
        let t = i as f32 / 16.0;
        let u = 2.0 * t - 1.0;
        points.push((0.05 + 0.9 * t, 0.35 + 0.6 * (1.0 - u * u)));
    }
    // brows 17-26
    for i in 0..5 {
        points.push((0.18 + 0.05 * i as f32, 0.28));
    }
    for i in 0..5 {
        points.push((0.62 + 0.05 * i as f32, 0.28));
    }
    // nose bridge 27-30, tip at 30
    for i in 0..4 {
        points.push((0.5, 0.36 + 0.08 * i as f32));
    }
    // nostrils 31-35
    for i in 0..5 {
        points.push((0.42 + 0.04 * i as f32, 0.66));
    }
    // eyes 36-47, each ring starts at its left corner; outer corners are 36 and 45
    for cx in [0.33_f32, 0.67] {
        for (dx, dy) in [
            (-0.08, 0.0),
            (-0.03, -0.03),
            (0.03, -0.03),
            (0.08, 0.0),
            (0.03, 0.03),
            (-0.03, 0.03),
        ] {
            points.push((cx + dx, 0.4 + dy));
        }
    }
    // outer lip 48-59, corners 48 and 54
    for i in 0..12 {
        let angle = std::f32::consts::PI * i as f32 / 6.0;
        points.push((0.5 - 0.15 * angle.cos(), 0.8 - 0.06 * angle.sin()));
    }
    // inner lip 60-67
    for i in 0..8 {
        let angle = std::f32::consts::PI * i as f32 / 4.0;
        points.push((0.5 - 0.1 * angle.cos(), 0.8 - 0.03 * angle.sin()));
    }
    points
}

/// Canonical layout placed inside `face`
pub fn canonical_landmarks(face: &FaceRect) -> Result<LandmarkSet> {
    let points: Vec<(f32, f32)> = canonical_layout()
        .into_iter()
        .map(|(u, v)| {
            (
                face.left as f32 + u * face.width as f32,
                face.top as f32 + v * face.height as f32,
            )
        })
        .collect();
    LandmarkSet::from_subpixel(&points)
}

/// Face detector returning a fixed list of boxes
#[derive(Debug, Clone, Default)]
pub struct MockFaceDetector {
    faces: Vec<FaceRect>,
    history: CallHistory,
}

impl MockFaceDetector {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_faces(faces: Vec<FaceRect>) -> Self {
        Self {
            faces,
            history: CallHistory::default(),
        }
    }

    /// One face box covering the central upper part of a `width` x `height` image
    #[must_use]
    pub fn centered(width: u32, height: u32) -> Self {
        Self::with_faces(vec![FaceRect::new(
            (width * 3 / 10) as i32,
            (height / 10) as i32,
            width * 2 / 5,
            height * 2 / 5,
        )])
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.history.calls().len()
    }
}

impl FaceDetector for MockFaceDetector {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceRect>> {
        self.history
            .record(format!("detect {}x{}", image.width(), image.height()));
        Ok(self.faces.clone())
    }
}

/// Landmark predictor placing the canonical layout inside the face box
#[derive(Debug, Clone, Default)]
pub struct MockLandmarkPredictor {
    faces: Arc<Mutex<Vec<FaceRect>>>,
}

impl MockLandmarkPredictor {
    #[must_use]
    pub fn frontal() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.faces.lock().map(|f| f.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn last_face(&self) -> Option<FaceRect> {
        self.faces.lock().ok().and_then(|f| f.last().copied())
    }
}

impl LandmarkPredictor for MockLandmarkPredictor {
    fn predict(&self, _image: &GrayImage, face: &FaceRect) -> Result<LandmarkSet> {
        if let Ok(mut faces) = self.faces.lock() {
            faces.push(*face);
        }
        canonical_landmarks(face)
    }
}

/// Face parser that labels an elliptical head with hair on top, a neck
/// below it and clothing underneath
#[derive(Debug, Clone, Default)]
pub struct MockSegmentationBackend {
    history: CallHistory,
    failure: Option<String>,
}

impl MockSegmentationBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            history: CallHistory::default(),
            failure: Some(message.into()),
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.history.calls().len()
    }

    /// Label map matching the layout of [`MockFaceDetector::centered`]
    #[must_use]
    pub fn labels_for(width: u32, height: u32) -> GrayImage {
        let (w, h) = (width as f32, height as f32);
        let (cx, cy) = (0.5 * w, 0.3 * h);
        let (rx, ry) = (0.2 * w, 0.22 * h);
        GrayImage::from_fn(width, height, |x, y| {
            let (fx, fy) = (x as f32, y as f32);
            let dx = (fx - cx) / rx;
            let dy = (fy - cy) / ry;
            let label = if dx * dx + dy * dy <= 1.0 {
                if fy < cy - 0.6 * ry {
                    17
                } else {
                    1
                }
            } else if (fx - cx).abs() < 0.08 * w && fy > cy && fy < 0.62 * h {
                14
            } else if fy >= 0.62 * h {
                16
            } else {
                0
            };
            Luma([label])
        })
    }
}

#[async_trait]
impl SegmentationBackend for MockSegmentationBackend {
    async fn segment(&self, image: &RgbImage) -> Result<SegmentationMask> {
        self.history
            .record(format!("segment {}x{}", image.width(), image.height()));
        if let Some(message) = &self.failure {
            return Err(IdPhotoError::remote_service("segmentation", message.clone()));
        }
        SegmentationMask::from_labels(Self::labels_for(image.width(), image.height()))
    }

    fn name(&self) -> &str {
        "mock-segmentation"
    }
}

/// Inpainter that paints the masked region with a flat skin tone
#[derive(Debug, Clone, Default)]
pub struct MockInpaintingBackend {
    history: CallHistory,
    failure: Option<String>,
    output_size: Option<(u32, u32)>,
    masked_pixels: Arc<Mutex<Vec<usize>>>,
}

impl MockInpaintingBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Reply with an image of a different size than requested
    #[must_use]
    pub fn with_output_size(width: u32, height: u32) -> Self {
        Self {
            output_size: Some((width, height)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.history.calls().len()
    }

    /// Number of mask pixels marked for synthesis, per call
    #[must_use]
    pub fn masked_pixels(&self) -> Vec<usize> {
        self.masked_pixels.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InpaintingBackend for MockInpaintingBackend {
    async fn inpaint(&self, assets: &InpaintAssets, prompt: &InpaintPrompt) -> Result<RgbImage> {
        self.history.record(format!(
            "inpaint {}x{} steps={}",
            assets.init_image.width(),
            assets.init_image.height(),
            prompt.num_inference_steps
        ));
        if let Ok(mut counts) = self.masked_pixels.lock() {
            counts.push(crate::mask::coverage(&assets.mask));
        }
        if let Some(message) = &self.failure {
            return Err(IdPhotoError::remote_service("inpainting", message.clone()));
        }

        let mut out = assets.init_image.clone();
        for (pixel, m) in out.pixels_mut().zip(assets.mask.pixels()) {
            if m.0[0] > crate::mask::BINARY_THRESHOLD {
                *pixel = Rgb(SKIN);
            }
        }
        Ok(match self.output_size {
            Some((w, h)) => image::imageops::resize(&out, w, h, image::imageops::FilterType::Nearest),
            None => out,
        })
    }

    fn name(&self) -> &str {
        "mock-inpainting"
    }
}

/// Write a complete template bundle of `width` x `height` under `root/id`.
///
/// The template is an opaque RGB canvas with a white background and a gray
/// torso; its landmarks follow the canonical layout of a centered face.
pub fn write_template(root: &Path, id: &str, width: u32, height: u32) -> Result<()> {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).map_err(|e| IdPhotoError::file_io_error("create", &dir, &e))?;

    let torso_top = height * 7 / 10;
    let in_torso = |x: u32, y: u32| y >= torso_top && x >= width / 5 && x < width * 4 / 5;

    let template = RgbImage::from_fn(width, height, |x, y| {
        if in_torso(x, y) {
            Rgb([70, 70, 90])
        } else {
            Rgb([255, 255, 255])
        }
    });
    template.save(dir.join(TEMPLATE_IMAGE))?;

    let head_removed = RgbaImage::from_fn(width, height, |x, y| {
        if in_torso(x, y) {
            Rgba([70, 70, 90, 255])
        } else {
            Rgba([255, 255, 255, 0])
        }
    });
    head_removed.save(dir.join(HEAD_REMOVED_IMAGE))?;

    let long_neck = GrayImage::from_fn(width, height, |x, y| {
        let neck_x = x >= width * 3 / 8 && x < width * 5 / 8;
        let neck_y = y >= height * 3 / 10 && y < height * 4 / 5;
        Luma([if neck_x && neck_y { 255 } else { 0 }])
    });
    long_neck.save(dir.join(LONG_NECK_MASK))?;

    let face = MockFaceDetector::centered(width, height);
    let landmarks = canonical_landmarks(face.faces.first().ok_or_else(|| IdPhotoError::internal("no face"))?)?;
    std::fs::write(dir.join(TEMPLATE_LANDMARKS), serde_json::to_string(&landmarks)?)?;
    Ok(())
}

/// Synthetic frontal portrait: skin-colored ellipse on a light background
#[must_use]
pub fn synthetic_portrait(width: u32, height: u32) -> RgbImage {
    let labels = MockSegmentationBackend::labels_for(width, height);
    RgbImage::from_fn(width, height, |x, y| match labels.get_pixel(x, y).0[0] {
        1 => Rgb(SKIN),
        17 => Rgb([40, 30, 20]),
        14 => Rgb([210, 160, 130]),
        16 => Rgb([30, 60, 120]),
        _ => Rgb([200, 220, 235]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_layout_stable_points() {
        let layout = canonical_layout();
        assert_eq!(layout.len(), 68);
        // chin is the lowest jaw point, outer eye corners are the widest eye points
        assert!((layout[8].1 - 0.95).abs() < 1e-6);
        assert!(layout[36].0 < layout[39].0);
        assert!(layout[45].0 > layout[42].0);
        assert!(layout[48].0 < layout[54].0);
    }

    #[tokio::test]
    async fn test_mock_inpainting_fills_mask() {
        let assets = InpaintAssets {
            init_image: RgbImage::from_pixel(4, 1, Rgb([0, 0, 0])),
            mask: GrayImage::from_raw(4, 1, vec![0, 255, 255, 0]).unwrap(),
        };
        let backend = MockInpaintingBackend::new();
        let out = backend.inpaint(&assets, &InpaintPrompt::default()).await.unwrap();
        assert_eq!(out.get_pixel(1, 0).0, SKIN);
        assert_eq!(out.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.masked_pixels(), vec![2]);
    }

    #[tokio::test]
    async fn test_mock_segmentation_labels() {
        let backend = MockSegmentationBackend::new();
        let mask = backend.segment(&RgbImage::new(100, 100)).await.unwrap();
        assert_eq!(mask.labels().get_pixel(50, 30).0[0], 1);
        assert_eq!(mask.labels().get_pixel(50, 10).0[0], 17);
        assert_eq!(mask.labels().get_pixel(50, 90).0[0], 16);
        assert_eq!(mask.labels().get_pixel(2, 2).0[0], 0);
    }
}
