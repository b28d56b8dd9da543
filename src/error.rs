//! Error types for ID photo generation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for ID photo operations
pub type Result<T> = std::result::Result<T, IdPhotoError>;

/// Stable, serializable classification of an [`IdPhotoError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TemplateNotFound,
    NoFaceDetected,
    TransformEstimationFailed,
    RemoteServiceError,
    AssetIoError,
    InvalidConfig,
    Model,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TemplateNotFound => "TemplateNotFound",
            Self::NoFaceDetected => "NoFaceDetected",
            Self::TransformEstimationFailed => "TransformEstimationFailed",
            Self::RemoteServiceError => "RemoteServiceError",
            Self::AssetIoError => "AssetIOError",
            Self::InvalidConfig => "InvalidConfig",
            Self::Model => "Model",
            Self::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Error types for the ID photo pipeline
#[derive(Error, Debug)]
pub enum IdPhotoError {
    /// Template bundle is missing, incomplete or inconsistent
    #[error("Template '{template_id}' not found: {reason}")]
    TemplateNotFound { template_id: String, reason: String },

    /// No face found in the input image
    #[error("No face detected in {0}")]
    NoFaceDetected(String),

    /// Landmark correspondences do not determine a unique similarity transform
    #[error("Transform estimation failed: {0}")]
    TransformEstimationFailed(String),

    /// Non-success status or transport failure from an inference collaborator
    #[error("Remote service '{service}' failed: {message}")]
    RemoteService { service: String, message: String },

    /// Image decode/encode failure or storage I/O failure
    #[error("Asset I/O error: {0}")]
    AssetIo(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Landmark or detector model could not be loaded
    #[error("Model error: {0}")]
    Model(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdPhotoError {
    /// Classification used by callers to tell failures apart
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TemplateNotFound { .. } => ErrorKind::TemplateNotFound,
            Self::NoFaceDetected(_) => ErrorKind::NoFaceDetected,
            Self::TransformEstimationFailed(_) => ErrorKind::TransformEstimationFailed,
            Self::RemoteService { .. } => ErrorKind::RemoteServiceError,
            Self::AssetIo(_) => ErrorKind::AssetIoError,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Model(_) => ErrorKind::Model,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn template_not_found<S: Into<String>, R: Into<String>>(template_id: S, reason: R) -> Self {
        Self::TemplateNotFound {
            template_id: template_id.into(),
            reason: reason.into(),
        }
    }

    pub fn no_face<S: Into<String>>(source: S) -> Self {
        Self::NoFaceDetected(source.into())
    }

    pub fn transform<S: Into<String>>(msg: S) -> Self {
        Self::TransformEstimationFailed(msg.into())
    }

    pub fn remote_service<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::RemoteService {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn asset_io<S: Into<String>>(msg: S) -> Self {
        Self::AssetIo(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::AssetIo(format!(
            "Failed to {} '{}': {}",
            operation,
            path.as_ref().display(),
            error
        ))
    }

    /// Create image decoding error with source context
    pub fn image_decode_error(source: &str, error: &image::ImageError) -> Self {
        Self::AssetIo(format!("Failed to decode {}: {}", source, error))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create model error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<std::path::Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::Model(format!(
            "Failed to {} model '{}': {}.{}",
            operation,
            model_path.as_ref().display(),
            error,
            suggestion_text
        ))
    }
}

impl From<std::io::Error> for IdPhotoError {
    fn from(error: std::io::Error) -> Self {
        Self::AssetIo(error.to_string())
    }
}

impl From<image::ImageError> for IdPhotoError {
    fn from(error: image::ImageError) -> Self {
        Self::AssetIo(error.to_string())
    }
}

impl From<serde_json::Error> for IdPhotoError {
    fn from(error: serde_json::Error) -> Self {
        Self::AssetIo(format!("JSON error: {}", error))
    }
}
