//! Core types shared by the pipeline stages

use crate::{
    error::{IdPhotoError, Result},
    services::progress::StageTiming,
};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of points in every landmark set (iBUG 68-point convention)
pub const LANDMARK_COUNT: usize = 68;

/// Largest class label of the 19-class face-parsing taxonomy
pub const MAX_SEGMENTATION_LABEL: u8 = 18;

/// Ordered 68-point facial landmark set with integer pixel coordinates.
///
/// Index `i` denotes the same anatomical feature in every set: 0-16 jaw,
/// 17-26 brows, 27-35 nose, 36-47 eyes, 48-67 mouth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[i32; 2]>", into = "Vec<[i32; 2]>")]
pub struct LandmarkSet {
    points: Vec<[i32; 2]>,
}

impl LandmarkSet {
    /// Create a landmark set, rejecting anything but exactly 68 points
    pub fn new(points: Vec<[i32; 2]>) -> Result<Self> {
        if points.len() != LANDMARK_COUNT {
            return Err(IdPhotoError::model(format!(
                "Landmark set must have {} points, got {}",
                LANDMARK_COUNT,
                points.len()
            )));
        }
        Ok(Self { points })
    }

    /// Round sub-pixel predictions to the nearest integer pixel
    pub fn from_subpixel(points: &[(f32, f32)]) -> Result<Self> {
        Self::new(
            points
                .iter()
                .map(|&(x, y)| [x.round() as i32, y.round() as i32])
                .collect(),
        )
    }

    #[must_use]
    pub fn points(&self) -> &[[i32; 2]] {
        &self.points
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<[i32; 2]> {
        self.points.get(index).copied()
    }
}

impl TryFrom<Vec<[i32; 2]>> for LandmarkSet {
    type Error = IdPhotoError;

    fn try_from(points: Vec<[i32; 2]>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<LandmarkSet> for Vec<[i32; 2]> {
    fn from(set: LandmarkSet) -> Self {
        set.points
    }
}

/// Axis-aligned face bounding box reported by a face detector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
    /// Detector confidence, informational only
    pub score: f64,
}

impl FaceRect {
    #[must_use]
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
            score: 0.0,
        }
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Per-pixel class labels from the face-parsing collaborator
#[derive(Debug, Clone)]
pub struct SegmentationMask {
    labels: GrayImage,
}

impl SegmentationMask {
    /// Wrap a label map, rejecting values outside the 19-class taxonomy
    pub fn from_labels(labels: GrayImage) -> Result<Self> {
        if let Some(bad) = labels.as_raw().iter().find(|&&v| v > MAX_SEGMENTATION_LABEL) {
            return Err(IdPhotoError::remote_service(
                "segmentation",
                format!(
                    "label map contains value {} outside 0-{}",
                    bad, MAX_SEGMENTATION_LABEL
                ),
            ));
        }
        Ok(Self { labels })
    }

    #[must_use]
    pub fn labels(&self) -> &GrayImage {
        &self.labels
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.labels.dimensions()
    }
}

/// One generation request: raw user image bytes plus the template to apply
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub user_image: Vec<u8>,
    pub template_id: String,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(user_image: Vec<u8>, template_id: impl Into<String>) -> Self {
        Self {
            user_image,
            template_id: template_id.into(),
        }
    }
}

/// Response contract: one data URI per named output variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub request_id: String,
    pub template_id: String,
    pub status: String,
    pub processing_time_seconds: f64,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub results: BTreeMap<String, String>,
    pub timings: Vec<StageTiming>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points() -> Vec<[i32; 2]> {
        (0..68).map(|i| [i, i * 2]).collect()
    }

    #[test]
    fn test_landmark_set_requires_68_points() {
        assert!(LandmarkSet::new(grid_points()).is_ok());
        assert!(LandmarkSet::new(vec![[0, 0]; 5]).is_err());
        assert!(LandmarkSet::new(vec![[0, 0]; 69]).is_err());
    }

    #[test]
    fn test_landmark_set_json_shape() {
        let set = LandmarkSet::new(grid_points()).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert!(json.starts_with("[[0,0],[1,2]"));

        let parsed: LandmarkSet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, set);

        let short: std::result::Result<LandmarkSet, _> = serde_json::from_str("[[1,2],[3,4]]");
        assert!(short.is_err());
    }

    #[test]
    fn test_subpixel_rounding() {
        let points: Vec<(f32, f32)> = (0..68).map(|i| (i as f32 + 0.6, 10.4)).collect();
        let set = LandmarkSet::from_subpixel(&points).unwrap();
        assert_eq!(set.get(0), Some([1, 10]));
        assert_eq!(set.get(67), Some([68, 10]));
        assert_eq!(set.get(68), None);
    }

    #[test]
    fn test_segmentation_mask_rejects_unknown_labels() {
        let mut labels = GrayImage::new(4, 4);
        labels.put_pixel(1, 1, image::Luma([18]));
        assert!(SegmentationMask::from_labels(labels.clone()).is_ok());

        labels.put_pixel(2, 2, image::Luma([19]));
        let err = SegmentationMask::from_labels(labels).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RemoteServiceError);
    }

    #[test]
    fn test_face_rect_area() {
        assert_eq!(FaceRect::new(0, 0, 10, 20).area(), 200);
    }
}
