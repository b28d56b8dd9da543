//! ID photo CLI tool
//!
//! Command-line front end for generating ID photos and maintaining templates.

use super::config::CliConfigBuilder;
use crate::{
    landmarks::LandmarkLocator,
    pipeline::PipelineOrchestrator,
    services::{ImageIOService, TracingProgressReporter},
    template::{self, TemplateStore},
    tracing_config::init_cli_tracing,
    types::{GenerationRequest, GenerationResponse},
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Studio-style ID photo generator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "idphoto")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Pipeline configuration (JSON); missing keys take defaults
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the templates directory
    #[arg(long, global = true, value_name = "DIR")]
    pub templates_dir: Option<PathBuf>,

    /// Override the 68-point shape predictor model
    #[arg(long, global = true, value_name = "PATH")]
    pub landmark_model: Option<PathBuf>,

    /// Override the face detector model
    #[arg(long, global = true, value_name = "PATH")]
    pub detector_model: Option<PathBuf>,

    /// Override the face-parsing service URL
    #[arg(long, global = true, value_name = "URL")]
    pub segmentation_url: Option<String>,

    /// Override the inpainting service URL
    #[arg(long, global = true, value_name = "URL")]
    pub inpainting_url: Option<String>,

    /// Write every stage artifact under DIR/<request_id>/
    #[arg(long, global = true, value_name = "DIR")]
    pub intermediates_dir: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Plain log output without colors
    #[arg(long, global = true)]
    pub compact_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate an ID photo from a portrait
    Generate {
        /// Portrait image (JPEG or PNG)
        #[arg(short, long, value_name = "PATH")]
        image: PathBuf,

        /// Template identifier
        #[arg(short, long)]
        template: String,

        /// Response JSON destination; "-" or omitted writes to stdout
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<String>,

        /// Also write every variant as an image file into DIR
        #[arg(long, value_name = "DIR")]
        save_dir: Option<PathBuf>,
    },
    /// Detect the template face and store its landmarks
    PrepareTemplate {
        #[arg(short, long)]
        template: String,
    },
    /// Verify that a template bundle is complete and consistent
    CheckTemplate {
        #[arg(short, long)]
        template: String,
    },
    /// List template identifiers
    ListTemplates,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_cli_tracing(cli.verbose, cli.compact_logs).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli)?;

    match &cli.command {
        Command::Generate {
            image,
            template,
            output,
            save_dir,
        } => {
            let orchestrator = PipelineOrchestrator::from_config(config)
                .context("Failed to set up the pipeline")?
                .with_reporter(Arc::new(TracingProgressReporter::new(cli.verbose > 0)));

            let photo = std::fs::read(image)
                .with_context(|| format!("Failed to read {}", image.display()))?;
            info!("Generating ID photo from {} with template '{}'", image.display(), template);

            let response = orchestrator
                .generate(GenerationRequest::new(photo, template.clone()))
                .await
                .context("ID photo generation failed")?;

            if let Some(dir) = save_dir {
                save_variants(&response, dir)?;
            }
            write_response(&response, output.as_deref())
        },
        Command::PrepareTemplate { template } => {
            let locator =
                LandmarkLocator::from_config(&config.models).context("Failed to load landmark models")?;
            let store = TemplateStore::new(&config.templates_dir);
            template::prepare_template(&store, template, &locator)
                .with_context(|| format!("Failed to prepare template '{}'", template))?;
            println!("Template '{}' prepared", template);
            Ok(())
        },
        Command::CheckTemplate { template } => {
            let bundle = TemplateStore::new(&config.templates_dir)
                .load(template)
                .with_context(|| format!("Template '{}' is not usable", template))?;
            let (width, height) = bundle.canvas_size();
            println!(
                "Template '{}' OK: {}x{} canvas, alpha: {}",
                bundle.id,
                width,
                height,
                bundle.template.color().has_alpha()
            );
            Ok(())
        },
        Command::ListTemplates => {
            for id in TemplateStore::new(&config.templates_dir).list()? {
                println!("{}", id);
            }
            Ok(())
        },
    }
}

fn write_response(response: &GenerationResponse, output: Option<&str>) -> Result<()> {
    let json = serde_json::to_string_pretty(response).context("Failed to serialize response")?;
    match output {
        None | Some("-") => {
            let mut stdout = io::stdout();
            stdout
                .write_all(json.as_bytes())
                .context("Failed to write response to stdout")?;
            stdout.write_all(b"\n")?;
            stdout.flush().context("Failed to flush stdout")?;
        },
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path))?;
            info!("Response written to {}", path);
        },
    }
    Ok(())
}

/// Decode each data URI and store it as `<variant>.<ext>`
fn save_variants(response: &GenerationResponse, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    for (name, uri) in &response.results {
        let (format, bytes) = ImageIOService::from_data_uri(uri)
            .with_context(|| format!("Variant '{}' is not a valid data URI", name))?;
        let path = dir.join(format!("{}.{}", name, format.extension()));
        std::fs::write(&path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved {}", path.display());
    }
    Ok(())
}
