//! Configuration types for ID photo generation

use crate::error::{IdPhotoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// How the head cutout boundary is treated before compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeadEdgePolicy {
    /// Dilate the head mask, then Gaussian-blur it to feather the seam
    #[default]
    Soft,
    /// Use the label mask as-is for a crisp boundary
    Hard,
}

/// Starting canvas for the image handed to the inpainting collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CanvasBase {
    /// Template with the head removed, composited over white
    #[default]
    HeadRemovedTemplate,
    /// Plain white canvas
    White,
}

/// Background replacement applied to the inpainted result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundPolicy {
    /// Template alpha (binarized) marks the foreground; templates without an
    /// alpha channel fall back to color keying
    #[default]
    AlphaMatte,
    /// Corner-pixel color key, regardless of template alpha
    ColorKey,
    /// Return the inpainted image unchanged
    PassThrough,
}

/// Encoding of a delivered variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// A named deliverable produced from the same inpainted image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputVariant {
    pub name: String,
    /// Solid RGB background placed behind the foreground
    pub background: [u8; 3],
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl OutputVariant {
    #[must_use]
    pub fn white_background() -> Self {
        Self {
            name: "id_photo_white_background".to_string(),
            background: [255, 255, 255],
            format: OutputFormat::Jpeg,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_jpeg_quality() -> u8 {
    90
}

/// Landmark model locations and detector tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// dlib-format 68-point shape predictor (`.dat` or `.dat.bz2`)
    pub landmark_model_path: PathBuf,
    /// SeetaFace frontal detector model
    pub face_detector_model_path: PathBuf,
    pub min_face_size: u32,
    pub score_threshold: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            landmark_model_path: PathBuf::from(
                "assets/models/shape_predictor_68_face_landmarks.dat",
            ),
            face_detector_model_path: PathBuf::from("assets/models/seeta_fd_frontal_v1.0.bin"),
            min_face_size: 40,
            score_threshold: 2.0,
        }
    }
}

/// Head matting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MattingConfig {
    pub edge_policy: HeadEdgePolicy,
    /// Side of the square structuring element (odd)
    pub dilation_kernel_size: u8,
    pub dilation_iterations: u8,
    pub blur_sigma: f32,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            edge_policy: HeadEdgePolicy::Soft,
            dilation_kernel_size: 5,
            dilation_iterations: 4,
            // sigma OpenCV derives for a 15x15 kernel
            blur_sigma: 2.6,
        }
    }
}

/// Inpainting asset construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InpaintAssetConfig {
    pub canvas_base: CanvasBase,
    /// Grow the inpaint region by one structuring-element pass
    pub dilate_region: bool,
    pub region_dilation_kernel_size: u8,
}

impl Default for InpaintAssetConfig {
    fn default() -> Self {
        Self {
            canvas_base: CanvasBase::HeadRemovedTemplate,
            dilate_region: false,
            region_dilation_kernel_size: 5,
        }
    }
}

/// Final background replacement parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositingConfig {
    pub background_policy: BackgroundPolicy,
    /// Summed absolute RGB difference above which a pixel is foreground
    pub color_key_threshold: u32,
}

impl Default for CompositingConfig {
    fn default() -> Self {
        Self {
            background_policy: BackgroundPolicy::AlphaMatte,
            color_key_threshold: 50,
        }
    }
}

/// Endpoints of the two inference collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub segmentation_url: String,
    pub inpainting_url: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            segmentation_url: "http://127.0.0.1:8001/parse".to_string(),
            inpainting_url: "http://127.0.0.1:8000/inpaint".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Fixed prompt configuration sent with every inpainting call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InpaintPrompt {
    pub prompt: String,
    pub negative_prompt: String,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub strength: f32,
}

impl Default for InpaintPrompt {
    fn default() -> Self {
        Self {
            prompt: "male, necklace, 8k, high quality".to_string(),
            negative_prompt: "shirt, clothes, jewelry, backend, blurry, lowres, bad anatomy, \
                              error body, error arm, error hand, error finger, error leg, \
                              error foot, error face, multiple face, multiple body, \
                              multiple arm, multiple hand, multiple finger, multiple leg, \
                              multiple foot, ugly, tiling, poorly drawn hands, \
                              poorly drawn feet, poorly drawn face, out of frame, mutation, \
                              mutated, extra limb, ugly, disgusting, blurry, dehydrated, \
                              bad proportions"
                .to_string(),
            num_inference_steps: 20,
            guidance_scale: 8.0,
            strength: 0.9,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub templates_dir: PathBuf,
    pub models: ModelConfig,
    pub matting: MattingConfig,
    pub inpaint_assets: InpaintAssetConfig,
    pub compositing: CompositingConfig,
    pub variants: Vec<OutputVariant>,
    pub remote: RemoteConfig,
    pub prompt: InpaintPrompt,
    /// Persist stage artifacts under `<dir>/<request_id>/` for debugging
    pub intermediates_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("assets/templates"),
            models: ModelConfig::default(),
            matting: MattingConfig::default(),
            inpaint_assets: InpaintAssetConfig::default(),
            compositing: CompositingConfig::default(),
            variants: vec![OutputVariant::white_background()],
            remote: RemoteConfig::default(),
            prompt: InpaintPrompt::default(),
            intermediates_dir: None,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load and validate a JSON configuration file. Missing keys take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| IdPhotoError::file_io_error("read configuration", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            IdPhotoError::invalid_config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        log::debug!("Loaded pipeline configuration from {}", path.display());
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Empty or duplicate output variants, JPEG quality above 100
    /// - Zero or even structuring-element sizes, non-positive blur sigma
    /// - Inpainting strength outside (0, 1], zero remote timeout
    pub fn validate(&self) -> Result<()> {
        if self.variants.is_empty() {
            return Err(IdPhotoError::invalid_config(
                "At least one output variant is required",
            ));
        }
        let mut names = HashSet::new();
        for variant in &self.variants {
            if variant.name.trim().is_empty() {
                return Err(IdPhotoError::invalid_config("Variant name must not be empty"));
            }
            if !names.insert(variant.name.as_str()) {
                return Err(IdPhotoError::invalid_config(format!(
                    "Duplicate variant name '{}'",
                    variant.name
                )));
            }
            if variant.jpeg_quality > 100 {
                return Err(IdPhotoError::config_value_error(
                    "JPEG quality",
                    variant.jpeg_quality,
                    "0-100",
                    Some(90),
                ));
            }
        }

        validate_kernel("dilation kernel size", self.matting.dilation_kernel_size)?;
        validate_kernel(
            "inpaint region dilation kernel size",
            self.inpaint_assets.region_dilation_kernel_size,
        )?;
        if self.matting.edge_policy == HeadEdgePolicy::Soft
            && !(self.matting.blur_sigma.is_finite() && self.matting.blur_sigma > 0.0)
        {
            return Err(IdPhotoError::config_value_error(
                "blur sigma",
                self.matting.blur_sigma,
                "> 0",
                Some(2.6),
            ));
        }

        if !(self.prompt.strength > 0.0 && self.prompt.strength <= 1.0) {
            return Err(IdPhotoError::config_value_error(
                "inpainting strength",
                self.prompt.strength,
                "(0, 1]",
                Some(0.9),
            ));
        }
        if self.prompt.num_inference_steps == 0 {
            return Err(IdPhotoError::invalid_config(
                "Inpainting step count must be positive",
            ));
        }
        if self.remote.timeout_secs == 0 {
            return Err(IdPhotoError::config_value_error(
                "remote timeout (s)",
                self.remote.timeout_secs,
                ">= 1",
                Some(120),
            ));
        }

        Ok(())
    }
}

fn validate_kernel(parameter: &str, size: u8) -> Result<()> {
    if size == 0 || size % 2 == 0 {
        return Err(IdPhotoError::config_value_error(
            parameter,
            size,
            "odd, >= 1",
            Some(5),
        ));
    }
    Ok(())
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn templates_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.templates_dir = dir.into();
        self
    }

    #[must_use]
    pub fn models(mut self, models: ModelConfig) -> Self {
        self.config.models = models;
        self
    }

    #[must_use]
    pub fn edge_policy(mut self, policy: HeadEdgePolicy) -> Self {
        self.config.matting.edge_policy = policy;
        self
    }

    #[must_use]
    pub fn canvas_base(mut self, base: CanvasBase) -> Self {
        self.config.inpaint_assets.canvas_base = base;
        self
    }

    #[must_use]
    pub fn dilate_inpaint_region(mut self, dilate: bool) -> Self {
        self.config.inpaint_assets.dilate_region = dilate;
        self
    }

    #[must_use]
    pub fn background_policy(mut self, policy: BackgroundPolicy) -> Self {
        self.config.compositing.background_policy = policy;
        self
    }

    /// Replace the variant list
    #[must_use]
    pub fn variants(mut self, variants: Vec<OutputVariant>) -> Self {
        self.config.variants = variants;
        self
    }

    #[must_use]
    pub fn add_variant(mut self, variant: OutputVariant) -> Self {
        self.config.variants.push(variant);
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: RemoteConfig) -> Self {
        self.config.remote = remote;
        self
    }

    #[must_use]
    pub fn prompt(mut self, prompt: InpaintPrompt) -> Self {
        self.config.prompt = prompt;
        self
    }

    #[must_use]
    pub fn intermediates_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.intermediates_dir = Some(dir.into());
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// Any rule enforced by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
