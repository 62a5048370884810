//! Kernel image management.

use anyhow::{Context, Result};
use bollard::image::{BuildImageOptions, ListImagesOptions};
use bollard::service::ImageSummary;
use bollard::Docker;
use bytes::Bytes;
use clap::Subcommand;
use colored::Colorize;
use futures_util::StreamExt;
use tar::{Builder, Header};
use tracing::info;

use crate::config::Config;
use crate::templates;

/// Image management actions.
#[derive(Subcommand, Debug)]
pub(crate) enum ImageAction {
    /// Build the kernel image from the embedded Dockerfile
    Build {
        /// Image tag (default: from codebox.toml or "codebox-kernel:latest")
        #[arg(long)]
        tag: Option<String>,
    },

    /// Show image status and information
    Status {
        /// Image name to check (default: from codebox.toml)
        #[arg(long)]
        image: Option<String>,
    },
}

/// Run image management command.
pub(crate) async fn run(config: &Config, action: ImageAction) -> Result<()> {
    match action {
        ImageAction::Build { tag } => {
            let tag = tag.unwrap_or_else(|| config.session.docker.image.clone());
            build_image(&tag).await
        }
        ImageAction::Status { image } => {
            let image = image.unwrap_or_else(|| config.session.docker.image.clone());
            show_image_status(&image).await
        }
    }
}

async fn connect() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults()
        .context("Failed to connect to Docker. Is Docker running?")?;

    docker
        .ping()
        .await
        .context("Cannot ping Docker daemon. Is Docker running?")?;

    Ok(docker)
}

/// Build context holding only the kernel Dockerfile.
fn build_context() -> Result<Bytes> {
    let dockerfile = templates::KERNEL_DOCKERFILE.as_bytes();

    let mut header = Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut tar_buf = Vec::new();
    {
        let mut tar = Builder::new(&mut tar_buf);
        tar.append_data(&mut header, "Dockerfile", dockerfile)
            .context("Failed to add Dockerfile to build context")?;
        tar.finish().context("Failed to finalize build context")?;
    }
    Ok(Bytes::from(tar_buf))
}

async fn build_image(tag: &str) -> Result<()> {
    let docker = connect().await?;
    info!("Building kernel image: {}", tag);

    let options = BuildImageOptions {
        dockerfile: "Dockerfile".to_string(),
        t: tag.to_string(),
        rm: true,
        ..Default::default()
    };

    let mut stream = docker.build_image(options, None, Some(build_context()?));

    while let Some(chunk) = stream.next().await {
        let output = chunk.context("Error building image")?;
        if let Some(error) = output.error {
            anyhow::bail!("Docker build error: {error}");
        }
        if let Some(text) = output.stream {
            let trimmed = text.trim_end();
            if !trimmed.is_empty() {
                println!("{}", trimmed.dimmed());
            }
        }
    }

    println!("\n{} Image built: {}", "✓".green().bold(), tag.cyan());
    Ok(())
}

async fn show_image_status(image: &str) -> Result<()> {
    let docker = connect().await?;

    let images = docker
        .list_images(Some(ListImagesOptions::<String> {
            all: true,
            ..Default::default()
        }))
        .await
        .context("Failed to list Docker images")?;

    let (name, tag) = parse_image_tag(image);
    let matching: Vec<&ImageSummary> = images
        .iter()
        .filter(|img| img.repo_tags.iter().any(|t| matches_tag(t, name, tag)))
        .collect();

    if matching.is_empty() {
        println!("Image not found: {image}");
        println!("\nTo build the image, run:");
        println!("  {}", "codebox image build".green());
        return Ok(());
    }

    println!("Image: {image}");
    println!("Status: {}", "Found".green());

    for img in matching {
        #[allow(clippy::cast_precision_loss)]
        let size_megabytes = img.size.unsigned_abs() as f64 / 1_048_576.0;
        println!("Size: {size_megabytes:.2} MB");
        println!("Created: {}", format_created(img.created));
        if !img.repo_tags.is_empty() {
            println!("Tags: {}", img.repo_tags.join(", "));
        }
        println!("ID: {}", img.id);
    }

    Ok(())
}

fn format_created(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map_or_else(|| timestamp.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// True when a `repo:tag` string names `name` at `tag`.
fn matches_tag(repo_tag: &str, name: &str, tag: &str) -> bool {
    let (n, t) = parse_image_tag(repo_tag);
    n == name && t == tag
}

/// Parse image name and tag from a string.
fn parse_image_tag(image: &str) -> (&str, &str) {
    match image.rfind(':') {
        Some(colon) if !image[colon + 1..].contains('/') => (&image[..colon], &image[colon + 1..]),
        _ => (image, "latest"),
    }
}
