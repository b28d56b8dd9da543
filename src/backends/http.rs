//! HTTP clients for the face-parsing and inpainting services
//!
//! Both services accept multipart uploads and reply with JSON carrying a
//! base64-encoded PNG. Every call is a single attempt bounded by the client
//! timeout.

use crate::{
    config::{InpaintPrompt, RemoteConfig},
    error::{IdPhotoError, Result},
    inference::{InpaintingBackend, SegmentationBackend},
    inpaint_assets::InpaintAssets,
    services::ImageIOService,
    types::SegmentationMask,
};
use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::Deserialize;
use std::time::Duration;

const SEGMENTATION: &str = "segmentation";
const INPAINTING: &str = "inpainting";

#[derive(Debug, Deserialize)]
struct SegmentationReply {
    status: Option<String>,
    mask_base64: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InpaintingReply {
    status: Option<String>,
    image_base64: Option<String>,
    message: Option<String>,
}

fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| IdPhotoError::invalid_config(format!("Failed to create HTTP client: {}", e)))
}

fn png_part(image: DynamicImage, file_name: &'static str) -> Result<Part> {
    let bytes = ImageIOService::encode_png(&image)?;
    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("image/png")
        .map_err(|e| IdPhotoError::internal(format!("Invalid multipart MIME type: {}", e)))
}

/// POST `form` and return the body of a 2xx reply
async fn post_form(client: &Client, service: &str, url: &str, form: Form) -> Result<String> {
    let response = client
        .post(url)
        .multipart(form)
        .send()
        .await
        .map_err(|e| IdPhotoError::remote_service(service, format!("request to {} failed: {}", url, e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| IdPhotoError::remote_service(service, format!("failed to read reply: {}", e)))?;

    if !status.is_success() {
        let detail: String = body.chars().take(200).collect();
        return Err(IdPhotoError::remote_service(
            service,
            format!("HTTP {}: {}", status, detail),
        ));
    }
    Ok(body)
}

fn reject_status(service: &str, status: Option<&str>, message: Option<String>) -> Result<()> {
    match status {
        None | Some("success") => Ok(()),
        Some(other) => Err(IdPhotoError::remote_service(
            service,
            message.unwrap_or_else(|| format!("status '{}'", other)),
        )),
    }
}

/// Decode a face-parsing reply into a label map of `expected` size
pub fn parse_segmentation_reply(body: &str, expected: (u32, u32)) -> Result<SegmentationMask> {
    let reply: SegmentationReply = serde_json::from_str(body).map_err(|e| {
        IdPhotoError::remote_service(SEGMENTATION, format!("malformed reply: {}", e))
    })?;
    reject_status(SEGMENTATION, reply.status.as_deref(), reply.message)?;

    let payload = reply
        .mask_base64
        .ok_or_else(|| IdPhotoError::remote_service(SEGMENTATION, "reply has no mask_base64"))?;
    let labels = ImageIOService::load_from_base64(&payload, "segmentation mask")?.to_luma8();

    if labels.dimensions() != expected {
        return Err(IdPhotoError::remote_service(
            SEGMENTATION,
            format!(
                "mask is {}x{} but the image is {}x{}",
                labels.width(),
                labels.height(),
                expected.0,
                expected.1
            ),
        ));
    }
    SegmentationMask::from_labels(labels)
}

/// Decode an inpainting reply into an RGB image
pub fn parse_inpainting_reply(body: &str) -> Result<RgbImage> {
    let reply: InpaintingReply = serde_json::from_str(body)
        .map_err(|e| IdPhotoError::remote_service(INPAINTING, format!("malformed reply: {}", e)))?;
    reject_status(INPAINTING, reply.status.as_deref(), reply.message)?;

    let payload = reply
        .image_base64
        .ok_or_else(|| IdPhotoError::remote_service(INPAINTING, "reply has no image_base64"))?;
    Ok(ImageIOService::load_from_base64(&payload, "inpainted image")?.to_rgb8())
}

/// Face-parsing service client
#[derive(Debug, Clone)]
pub struct HttpSegmentationClient {
    client: Client,
    url: String,
}

impl HttpSegmentationClient {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            url: url.into(),
        })
    }

    pub fn from_config(remote: &RemoteConfig) -> Result<Self> {
        Self::new(remote.segmentation_url.clone(), remote.timeout_secs)
    }
}

#[async_trait]
impl SegmentationBackend for HttpSegmentationClient {
    async fn segment(&self, image: &RgbImage) -> Result<SegmentationMask> {
        let form = Form::new().part("image", png_part(DynamicImage::ImageRgb8(image.clone()), "image.png")?);
        tracing::debug!(url = %self.url, "Requesting face parsing");
        let body = post_form(&self.client, SEGMENTATION, &self.url, form).await?;
        parse_segmentation_reply(&body, image.dimensions())
    }

    fn name(&self) -> &str {
        SEGMENTATION
    }
}

/// Inpainting service client
#[derive(Debug, Clone)]
pub struct HttpInpaintingClient {
    client: Client,
    url: String,
}

impl HttpInpaintingClient {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            url: url.into(),
        })
    }

    pub fn from_config(remote: &RemoteConfig) -> Result<Self> {
        Self::new(remote.inpainting_url.clone(), remote.timeout_secs)
    }
}

#[async_trait]
impl InpaintingBackend for HttpInpaintingClient {
    async fn inpaint(&self, assets: &InpaintAssets, prompt: &InpaintPrompt) -> Result<RgbImage> {
        let form = Form::new()
            .part(
                "init_image",
                png_part(DynamicImage::ImageRgb8(assets.init_image.clone()), "init_image.png")?,
            )
            .part(
                "mask_image",
                png_part(DynamicImage::ImageLuma8(assets.mask.clone()), "mask_image.png")?,
            )
            .text("prompt", prompt.prompt.clone())
            .text("negative_prompt", prompt.negative_prompt.clone())
            .text("num_inference_steps", prompt.num_inference_steps.to_string())
            .text("guidance_scale", prompt.guidance_scale.to_string())
            .text("strength", prompt.strength.to_string());

        tracing::debug!(url = %self.url, "Requesting neck inpainting");
        let body = post_form(&self.client, INPAINTING, &self.url, form).await?;
        parse_inpainting_reply(&body)
    }

    fn name(&self) -> &str {
        INPAINTING
    }
}
