mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sketchforge_core::bitmap::Bitmap;
use sketchforge_core::outcome::{ErrorKind, GenerateResult};
use sketchforge_core::request::GenerationRequest;
use sketchforge_core::types::SessionId;
use sketchforge_pipeline::{EngineConfig, RenderPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries only the JSON result.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sketchforge=info,sketchforge_pipeline=info,sketchforge_comfyui=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    let session = cli
        .session
        .map(SessionId::from_string)
        .unwrap_or_else(SessionId::generate);

    tracing::info!(api_url = %config.api_url, session = %session, "Using ComfyUI server");
    let pipeline = RenderPipeline::from_config(&config, session);

    match cli.command {
        Commands::Check => {
            let reachable = pipeline.check_connection().await;
            println!("{}", serde_json::json!({ "connected": reachable }));
            Ok(if reachable {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Render {
            prompt,
            input,
            style,
            influence,
            count,
            reference,
            output_dir,
        } => {
            let mut request = GenerationRequest::new(prompt, load_bitmap(&input)?)
                .with_style(style)
                .with_influence(influence)
                .with_num_images(count);
            if let Some(path) = reference {
                request = request.with_reference_image(load_bitmap(&path)?);
            }

            let result = match output_dir {
                None => pipeline.generate(&request).await,
                Some(dir) => render_to_dir(&pipeline, &request, &dir).await?,
            };

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn load_bitmap(path: &Path) -> anyhow::Result<Bitmap> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Bitmap::decode(&bytes).with_context(|| format!("decoding {}", path.display()))
}

/// Render, then save every output image under `dir`.
async fn render_to_dir(
    pipeline: &RenderPipeline,
    request: &GenerationRequest,
    dir: &Path,
) -> anyhow::Result<GenerateResult> {
    let output = match pipeline.render(request).await {
        Ok(output) => output,
        Err(e) => return Ok(GenerateResult::failed(e.kind(), &e.to_string())),
    };

    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for image in &output.images {
        let Some(path) = output_path(dir, &image.filename) else {
            return Ok(GenerateResult::failed(
                ErrorKind::ProtocolError,
                &format!("Unusable output filename '{}'", image.filename),
            ));
        };
        let bytes = match pipeline.download(image).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(GenerateResult::failed(e.kind(), &e.to_string())),
        };
        std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), "Saved image");
    }

    Ok(GenerateResult::succeeded(output.urls))
}

/// Destination for an engine-supplied filename; only its final component
/// is used, so the file always lands directly inside `dir`.
fn output_path(dir: &Path, filename: &str) -> Option<PathBuf> {
    let name = Path::new(filename).file_name()?;
    Some(dir.join(name))
}
