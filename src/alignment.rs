//! Landmark-driven similarity alignment
//!
//! A similarity transform (rotation, uniform scale, translation) is fitted in
//! the least-squares sense to a stable subset of landmarks, then used to
//! resample the matted head onto the template canvas.

use crate::{
    error::{IdPhotoError, Result},
    types::LandmarkSet,
};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use ndarray::{Array2, Axis};

/// Outer eye corners, nose tip, mouth corners, chin
pub const STABLE_LANDMARKS: [usize; 6] = [36, 45, 30, 48, 54, 8];

/// Smallest mean squared spread accepted for a point set
const MIN_SPREAD: f64 = 1e-9;

/// `x' = a*x - b*y + tx`, `y' = b*x + a*y + ty`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl SimilarityTransform {
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    #[must_use]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }

    #[must_use]
    pub fn rotation_degrees(&self) -> f64 {
        self.b.atan2(self.a).to_degrees()
    }

    /// Row-major 2x3 affine matrix
    #[must_use]
    pub fn to_affine(&self) -> [[f64; 3]; 2] {
        [[self.a, -self.b, self.tx], [self.b, self.a, self.ty]]
    }

    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        (self.a - other.a).abs() <= tolerance
            && (self.b - other.b).abs() <= tolerance
            && (self.tx - other.tx).abs() <= tolerance
            && (self.ty - other.ty).abs() <= tolerance
    }

    fn projection(&self) -> Option<Projection> {
        Projection::from_matrix([
            self.a as f32,
            -self.b as f32,
            self.tx as f32,
            self.b as f32,
            self.a as f32,
            self.ty as f32,
            0.0,
            0.0,
            1.0,
        ])
    }
}

/// Least-squares similarity mapping `source` onto `destination`.
///
/// Returns `None` when either point set has no spread, the correspondence
/// counts differ, or the fitted scale vanishes.
#[must_use]
pub fn fit_similarity(source: &[[f64; 2]], destination: &[[f64; 2]]) -> Option<SimilarityTransform> {
    if source.len() != destination.len() || source.is_empty() {
        return None;
    }
    let src = to_array(source)?;
    let dst = to_array(destination)?;

    let src_mean = src.mean_axis(Axis(0))?;
    let dst_mean = dst.mean_axis(Axis(0))?;
    let src_c = &src - &src_mean;
    let dst_c = &dst - &dst_mean;

    let n = source.len() as f64;
    let spread = src_c.mapv(|v| v * v).sum() / n;
    let dst_spread = dst_c.mapv(|v| v * v).sum() / n;
    if !(spread > MIN_SPREAD && dst_spread > MIN_SPREAD) {
        return None;
    }

    let sx = src_c.column(0);
    let sy = src_c.column(1);
    let dx = dst_c.column(0);
    let dy = dst_c.column(1);
    let a = (sx.dot(&dx) + sy.dot(&dy)) / n / spread;
    let b = (sx.dot(&dy) - sy.dot(&dx)) / n / spread;

    let (mx, my) = (src_mean[0], src_mean[1]);
    let transform = SimilarityTransform {
        a,
        b,
        tx: dst_mean[0] - (a * mx - b * my),
        ty: dst_mean[1] - (b * mx + a * my),
    };

    let finite = [transform.a, transform.b, transform.tx, transform.ty]
        .iter()
        .all(|v| v.is_finite());
    (finite && transform.scale() > 1e-12).then_some(transform)
}

fn to_array(points: &[[f64; 2]]) -> Option<Array2<f64>> {
    let flat: Vec<f64> = points.iter().flat_map(|p| p.iter().copied()).collect();
    Array2::from_shape_vec((points.len(), 2), flat).ok()
}

/// Estimates head-to-template transforms and resamples onto the template canvas
#[derive(Debug, Clone)]
pub struct AlignmentEstimator {
    stable_indices: Vec<usize>,
}

impl Default for AlignmentEstimator {
    fn default() -> Self {
        Self {
            stable_indices: STABLE_LANDMARKS.to_vec(),
        }
    }
}

impl AlignmentEstimator {
    /// Use a custom landmark subset
    #[must_use]
    pub fn with_indices(stable_indices: Vec<usize>) -> Self {
        Self { stable_indices }
    }

    /// Fit the transform mapping `source` landmarks onto `target` landmarks
    ///
    /// # Errors
    /// `TransformEstimationFailed` for degenerate correspondences
    pub fn estimate(
        &self,
        source: &LandmarkSet,
        target: &LandmarkSet,
    ) -> Result<SimilarityTransform> {
        let src = self.subset(source)?;
        let dst = self.subset(target)?;
        let transform = fit_similarity(&src, &dst).ok_or_else(|| {
            IdPhotoError::transform(format!(
                "landmarks {:?} do not determine a unique similarity",
                self.stable_indices
            ))
        })?;

        tracing::debug!(
            scale = transform.scale(),
            rotation_deg = transform.rotation_degrees(),
            tx = transform.tx,
            ty = transform.ty,
            "Estimated head alignment"
        );
        Ok(transform)
    }

    /// Resample `head` through `transform` into a `canvas`-sized image.
    ///
    /// Color channels use bilinear sampling, the alpha channel nearest
    /// neighbour; pixels mapped from outside the source are transparent.
    pub fn warp_to_canvas(
        &self,
        head: &RgbaImage,
        transform: &SimilarityTransform,
        canvas: (u32, u32),
    ) -> Result<RgbaImage> {
        let projection = transform
            .projection()
            .ok_or_else(|| IdPhotoError::transform("transform is not invertible"))?;
        let (width, height) = canvas;

        let mut color = RgbaImage::new(width, height);
        warp_into(
            head,
            &projection,
            Interpolation::Bilinear,
            Rgba([0, 0, 0, 0]),
            &mut color,
        );

        let alpha_src = crate::mask::alpha_channel(head);
        let mut alpha = GrayImage::new(width, height);
        warp_into(
            &alpha_src,
            &projection,
            Interpolation::Nearest,
            Luma([0]),
            &mut alpha,
        );

        for (pixel, a) in color.pixels_mut().zip(alpha.pixels()) {
            pixel.0[3] = a.0[0];
        }
        Ok(color)
    }

    /// Estimate and warp in one step
    pub fn align(
        &self,
        head: &RgbaImage,
        source: &LandmarkSet,
        target: &LandmarkSet,
        canvas: (u32, u32),
    ) -> Result<(RgbaImage, SimilarityTransform)> {
        let transform = self.estimate(source, target)?;
        let aligned = self.warp_to_canvas(head, &transform, canvas)?;
        Ok((aligned, transform))
    }

    fn subset(&self, landmarks: &LandmarkSet) -> Result<Vec<[f64; 2]>> {
        self.stable_indices
            .iter()
            .map(|&i| {
                landmarks
                    .get(i)
                    .map(|[x, y]| [f64::from(x), f64::from(y)])
                    .ok_or_else(|| IdPhotoError::transform(format!("landmark {} missing", i)))
            })
            .collect()
    }
}
