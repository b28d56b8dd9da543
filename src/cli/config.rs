//! Configuration assembly from CLI arguments

use crate::cli::main_impl::Cli;
use crate::config::PipelineConfig;
use anyhow::{Context, Result};

/// Builds the pipeline configuration: JSON file (or defaults), then
/// command-line overrides, then validation
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(dir) = &cli.templates_dir {
            config.templates_dir.clone_from(dir);
        }
        if let Some(path) = &cli.landmark_model {
            config.models.landmark_model_path.clone_from(path);
        }
        if let Some(path) = &cli.detector_model {
            config.models.face_detector_model_path.clone_from(path);
        }
        if let Some(url) = &cli.segmentation_url {
            config.remote.segmentation_url.clone_from(url);
        }
        if let Some(url) = &cli.inpainting_url {
            config.remote.inpainting_url.clone_from(url);
        }
        if let Some(dir) = &cli.intermediates_dir {
            config.intermediates_dir = Some(dir.clone());
        }

        config.validate().context("Invalid configuration")?;
        log::debug!("Templates directory: {}", config.templates_dir.display());
        Ok(config)
    }
}
