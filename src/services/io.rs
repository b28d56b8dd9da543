//! Image I/O operations service
//!
//! Every decode or encode failure surfaces as `AssetIo`.

use crate::{
    config::OutputFormat,
    error::{IdPhotoError, Result},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;

/// Service for image file and buffer input/output
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Falls back to content sniffing when the extension does not match the data.
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(IdPhotoError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );
                let data = std::fs::read(path_ref)
                    .map_err(|io_err| IdPhotoError::file_io_error("read image data", path_ref, &io_err))?;
                image::load_from_memory(&data).map_err(|content_err| {
                    IdPhotoError::image_decode_error(&path_ref.display().to_string(), &content_err)
                })
            },
        }
    }

    /// Decode an image held in memory
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(IdPhotoError::asset_io("Image buffer is empty"));
        }
        image::load_from_memory(bytes)
            .map_err(|e| IdPhotoError::image_decode_error("image buffer", &e))
    }

    /// Decode a base64-encoded image payload
    pub fn load_from_base64(payload: &str, source: &str) -> Result<DynamicImage> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| IdPhotoError::asset_io(format!("Invalid base64 in {}: {}", source, e)))?;
        image::load_from_memory(&bytes).map_err(|e| IdPhotoError::image_decode_error(source, &e))
    }

    /// Encode an image into `format`. JPEG output drops any alpha channel.
    pub fn encode(image: &DynamicImage, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        match format {
            OutputFormat::Png => image
                .write_to(&mut buffer, ImageFormat::Png)
                .map_err(|e| IdPhotoError::asset_io(format!("Failed to encode PNG: {}", e)))?,
            OutputFormat::Jpeg => {
                let rgb = image.to_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(&mut buffer, jpeg_quality);
                encoder
                    .encode_image(&rgb)
                    .map_err(|e| IdPhotoError::asset_io(format!("Failed to encode JPEG: {}", e)))?;
            },
        }
        Ok(buffer.into_inner())
    }

    /// Encode as PNG, the lossless format used for collaborator uploads
    pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
        Self::encode(image, OutputFormat::Png, 100)
    }

    /// Wrap encoded bytes into a `data:` URI
    #[must_use]
    pub fn to_data_uri(bytes: &[u8], format: OutputFormat) -> String {
        format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes))
    }

    /// Split a `data:` URI back into its format and raw bytes
    pub fn from_data_uri(uri: &str) -> Result<(OutputFormat, Vec<u8>)> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| IdPhotoError::asset_io("Not a data URI"))?;
        let (mime, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| IdPhotoError::asset_io("Data URI is not base64-encoded"))?;
        let format = match mime {
            "image/jpeg" => OutputFormat::Jpeg,
            "image/png" => OutputFormat::Png,
            other => {
                return Err(IdPhotoError::asset_io(format!(
                    "Unsupported data URI media type '{}'",
                    other
                )))
            },
        };
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| IdPhotoError::asset_io(format!("Invalid base64 in data URI: {}", e)))?;
        Ok((format, bytes))
    }

    /// Save an image, creating parent directories. The format follows the extension.
    pub fn save_image<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IdPhotoError::file_io_error("create output directory", parent, &e))?;
        }

        image.save(path_ref).map_err(|e| {
            IdPhotoError::asset_io(format!("Failed to save '{}': {}", path_ref.display(), e))
        })
    }
}
