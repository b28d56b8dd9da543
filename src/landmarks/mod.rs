//! Face detection and 68-point landmark regression
//!
//! Detector and predictor are injected as shared read-only handles, loaded
//! once and reused across concurrent requests.

pub mod ert;
#[cfg(feature = "seeta")]
pub mod seeta;

pub use ert::ErtShapePredictor;
#[cfg(feature = "seeta")]
pub use seeta::SeetaFaceDetector;

use crate::{
    error::{IdPhotoError, Result},
    types::{FaceRect, LandmarkSet},
};
use image::{DynamicImage, GrayImage};
use std::sync::Arc;

/// Finds face bounding boxes in a grayscale image
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &GrayImage) -> Result<Vec<FaceRect>>;
}

/// Regresses the 68-point landmark set inside a face box
pub trait LandmarkPredictor: Send + Sync {
    fn predict(&self, image: &GrayImage, face: &FaceRect) -> Result<LandmarkSet>;
}

/// Pick the face with the largest box; ties go to the smallest `(top, left)`
#[must_use]
pub fn select_primary_face(faces: &[FaceRect]) -> Option<FaceRect> {
    faces.iter().copied().min_by(|a, b| {
        b.area()
            .cmp(&a.area())
            .then_with(|| a.top.cmp(&b.top))
            .then_with(|| a.left.cmp(&b.left))
    })
}

/// Detects the primary face and regresses its landmarks
#[derive(Clone)]
pub struct LandmarkLocator {
    detector: Arc<dyn FaceDetector>,
    predictor: Arc<dyn LandmarkPredictor>,
}

impl LandmarkLocator {
    #[must_use]
    pub fn new(detector: Arc<dyn FaceDetector>, predictor: Arc<dyn LandmarkPredictor>) -> Self {
        Self {
            detector,
            predictor,
        }
    }

    /// Load the SeetaFace detector and the dlib-format shape predictor named
    /// in the configuration
    #[cfg(feature = "seeta")]
    pub fn from_config(models: &crate::config::ModelConfig) -> Result<Self> {
        let detector = SeetaFaceDetector::from_file(
            &models.face_detector_model_path,
            models.min_face_size,
            models.score_threshold,
        )?;
        let predictor = ErtShapePredictor::from_file(&models.landmark_model_path)?;
        Ok(Self::new(Arc::new(detector), Arc::new(predictor)))
    }

    /// Locate landmarks of the primary face in `image`
    ///
    /// # Errors
    /// - `NoFaceDetected` when the detector reports no face
    /// - `Model` when the predictor fails
    pub fn locate(&self, image: &DynamicImage) -> Result<LandmarkSet> {
        self.locate_gray(&image.to_luma8())
    }

    pub fn locate_gray(&self, gray: &GrayImage) -> Result<LandmarkSet> {
        let faces = self.detector.detect(gray)?;
        let face = select_primary_face(&faces).ok_or_else(|| {
            IdPhotoError::no_face(format!("{}x{} image", gray.width(), gray.height()))
        })?;
        log::debug!(
            "Selected face at ({}, {}) {}x{} out of {} candidate(s)",
            face.left,
            face.top,
            face.width,
            face.height,
            faces.len()
        );
        self.predictor.predict(gray, &face)
    }
}

impl std::fmt::Debug for LandmarkLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LandmarkLocator").finish_non_exhaustive()
    }
}
