//! SeetaFace frontal face detector backed by `rustface`

use super::FaceDetector;
use crate::{
    error::{IdPhotoError, Result},
    types::FaceRect,
};
use image::GrayImage;
use std::path::Path;

/// Face detector holding a parsed SeetaFace model
///
/// `rustface` detectors are stateful, so a fresh one is built from the shared
/// model on every call.
pub struct SeetaFaceDetector {
    model: rustface::Model,
    min_face_size: u32,
    score_threshold: f64,
}

impl SeetaFaceDetector {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        min_face_size: u32,
        score_threshold: f64,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            IdPhotoError::model_error_with_context(
                "read",
                path,
                &e.to_string(),
                &["check models.face_detector_model_path"],
            )
        })?;
        let detector = Self::from_bytes(&bytes, min_face_size, score_threshold).map_err(|e| {
            IdPhotoError::model_error_with_context("parse", path, &e.to_string(), &[])
        })?;
        log::info!("Loaded SeetaFace detector from {}", path.display());
        Ok(detector)
    }

    pub fn from_bytes(bytes: &[u8], min_face_size: u32, score_threshold: f64) -> Result<Self> {
        let model = rustface::read_model(std::io::Cursor::new(bytes))
            .map_err(|e| IdPhotoError::model(format!("Invalid SeetaFace model: {}", e)))?;
        Ok(Self {
            model,
            min_face_size,
            score_threshold,
        })
    }
}

impl FaceDetector for SeetaFaceDetector {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceRect>> {
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(self.min_face_size);
        detector.set_score_thresh(self.score_threshold);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(
            image.as_raw(),
            image.width(),
            image.height(),
        ));

        Ok(faces
            .iter()
            .filter(|face| face.bbox().width() > 0 && face.bbox().height() > 0)
            .map(|face| {
                let bbox = face.bbox();
                FaceRect {
                    left: bbox.x(),
                    top: bbox.y(),
                    width: bbox.width(),
                    height: bbox.height(),
                    score: face.score(),
                }
            })
            .collect())
    }
}

impl std::fmt::Debug for SeetaFaceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeetaFaceDetector")
            .field("min_face_size", &self.min_face_size)
            .field("score_threshold", &self.score_threshold)
            .finish_non_exhaustive()
    }
}
