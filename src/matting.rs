//! Label-driven head matting

use crate::{
    config::{HeadEdgePolicy, MattingConfig},
    error::{IdPhotoError, Result},
    mask,
    types::SegmentationMask,
};
use image::{DynamicImage, GrayImage, Luma, RgbaImage};

/// Face-parsing classes that make up the head: skin, brows, eyes, ears,
/// earrings, nose, mouth, lips, hair. Glasses, neck, cloth and hat are excluded.
pub const HEAD_LABELS: [u8; 13] = [1, 2, 3, 4, 5, 7, 8, 9, 10, 11, 12, 13, 17];

/// Builds an alpha-matted head cutout from a segmentation label map
#[derive(Debug, Clone)]
pub struct HeadExtractor {
    config: MattingConfig,
}

impl HeadExtractor {
    #[must_use]
    pub fn new(config: MattingConfig) -> Self {
        Self { config }
    }

    /// Binary head mask (0/255) from the label map
    #[must_use]
    pub fn head_mask(labels: &GrayImage) -> GrayImage {
        let mut lookup = [0u8; 256];
        for label in HEAD_LABELS {
            lookup[usize::from(label)] = 255;
        }
        GrayImage::from_fn(labels.width(), labels.height(), |x, y| {
            Luma([lookup[usize::from(labels.get_pixel(x, y).0[0])]])
        })
    }

    /// Head alpha after applying the configured edge policy
    #[must_use]
    pub fn alpha(&self, segmentation: &SegmentationMask) -> GrayImage {
        let hard = Self::head_mask(segmentation.labels());
        match self.config.edge_policy {
            HeadEdgePolicy::Hard => hard,
            HeadEdgePolicy::Soft => {
                let grown = mask::dilate_square(
                    &hard,
                    self.config.dilation_kernel_size,
                    self.config.dilation_iterations,
                );
                mask::feather(&grown, self.config.blur_sigma)
            },
        }
    }

    /// RGBA cutout: the image's color with the head alpha
    ///
    /// # Errors
    /// `RemoteService` when the label map does not cover the image pixel grid
    pub fn extract(
        &self,
        image: &DynamicImage,
        segmentation: &SegmentationMask,
    ) -> Result<RgbaImage> {
        let image_size = (image.width(), image.height());
        if segmentation.dimensions() != image_size {
            let (mw, mh) = segmentation.dimensions();
            return Err(IdPhotoError::remote_service(
                "segmentation",
                format!(
                    "mask is {}x{} but the image is {}x{}",
                    mw, mh, image_size.0, image_size.1
                ),
            ));
        }

        let alpha = self.alpha(segmentation);
        let coverage = mask::coverage(&alpha);
        if coverage == 0 {
            log::warn!("Segmentation contains no head pixels");
        }
        log::debug!(
            "Head matte covers {} of {} pixels ({:?} edges)",
            coverage,
            u64::from(image_size.0) * u64::from(image_size.1),
            self.config.edge_policy
        );

        mask::with_alpha(&image.to_rgb8(), &alpha)
    }
}
