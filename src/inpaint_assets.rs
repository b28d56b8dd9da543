//! Long-neck inpainting asset construction
//!
//! The template's long-neck mask is a generous region drawn once per template.
//! Subtracting the aligned head's alpha from it leaves exactly the strip
//! between the head's lower edge and the template shoulders, which is what
//! the inpainting collaborator must synthesize.

use crate::{
    config::{CanvasBase, InpaintAssetConfig},
    error::Result,
    mask::{self, ensure_same_size},
};
use image::{GrayImage, Luma, RgbImage, RgbaImage};

const WHITE: [u8; 3] = [255, 255, 255];

/// Init image plus region mask, the exact payload of one inpainting call
#[derive(Debug, Clone)]
pub struct InpaintAssets {
    /// Template canvas with the aligned head composited on top
    pub init_image: RgbImage,
    /// 255 = synthesize, 0 = preserve
    pub mask: GrayImage,
}

impl InpaintAssets {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.init_image.dimensions()
    }
}

#[derive(Debug, Clone)]
pub struct InpaintAssetBuilder {
    config: InpaintAssetConfig,
}

impl InpaintAssetBuilder {
    #[must_use]
    pub fn new(config: InpaintAssetConfig) -> Self {
        Self { config }
    }

    /// Build the init image and region mask.
    ///
    /// All three inputs must share the template canvas size.
    pub fn build(
        &self,
        aligned_head: &RgbaImage,
        head_removed: &RgbaImage,
        long_neck: &GrayImage,
    ) -> Result<InpaintAssets> {
        let canvas = head_removed.dimensions();
        ensure_same_size("aligned head", aligned_head.dimensions(), canvas)?;
        ensure_same_size("long-neck mask", long_neck.dimensions(), canvas)?;

        let long_neck = mask::binarize(long_neck);

        let base = match self.config.canvas_base {
            CanvasBase::HeadRemovedTemplate => mask::flatten_over(head_removed, WHITE),
            CanvasBase::White => RgbImage::from_pixel(canvas.0, canvas.1, image::Rgb(WHITE)),
        };
        let init_image = mask::alpha_composite(&base, aligned_head)?;

        let head_alpha = mask::alpha_channel(aligned_head);
        let region = self.region_mask(&long_neck, &head_alpha)?;

        log::debug!(
            "Inpaint region covers {} px of {} px long-neck area",
            mask::coverage(&region),
            mask::coverage(&long_neck)
        );

        Ok(InpaintAssets {
            init_image,
            mask: region,
        })
    }

    /// `binarize(clamp(long_neck - head_alpha))`, optionally grown by one
    /// structuring-element pass.
    ///
    /// Growth never reaches pixels where the head alpha is saturated.
    pub fn region_mask(&self, long_neck: &GrayImage, head_alpha: &GrayImage) -> Result<GrayImage> {
        let region = mask::binarize(&mask::subtract_clamped(long_neck, head_alpha)?);
        if !self.config.dilate_region {
            return Ok(region);
        }

        let grown = mask::dilate_square(&region, self.config.region_dilation_kernel_size, 1);
        Ok(GrayImage::from_fn(grown.width(), grown.height(), |x, y| {
            let covered = head_alpha.get_pixel(x, y).0[0] == 255;
            Luma([if covered { 0 } else { grown.get_pixel(x, y).0[0] }])
        }))
    }
}
