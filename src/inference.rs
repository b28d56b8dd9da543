//! Inference collaborator abstraction
//!
//! Face parsing and neck inpainting run outside this crate. Each is reached
//! through an async trait so the pipeline can be driven by HTTP clients in
//! production and by in-memory doubles in tests.

use crate::{
    config::InpaintPrompt, error::Result, inpaint_assets::InpaintAssets, types::SegmentationMask,
};
use async_trait::async_trait;
use image::RgbImage;

/// Face-parsing collaborator: one RGB image in, a per-pixel label map out
#[async_trait]
pub trait SegmentationBackend: Send + Sync {
    /// Segment `image` into the 19-class face-parsing taxonomy
    ///
    /// # Errors
    /// - `RemoteService` for transport failures and non-success replies
    /// - `AssetIo` when the returned payload cannot be decoded
    async fn segment(&self, image: &RgbImage) -> Result<SegmentationMask>;

    /// Short name used in logs and error messages
    fn name(&self) -> &str;
}

/// Generative inpainting collaborator
#[async_trait]
pub trait InpaintingBackend: Send + Sync {
    /// Synthesize the white region of `assets.mask` on top of `assets.init_image`
    ///
    /// # Errors
    /// - `RemoteService` for transport failures and non-success replies
    /// - `AssetIo` when the returned payload cannot be decoded
    async fn inpaint(&self, assets: &InpaintAssets, prompt: &InpaintPrompt) -> Result<RgbImage>;

    fn name(&self) -> &str;
}
