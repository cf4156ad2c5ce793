//! Render command handlers
//!
//! Prints or writes the artifacts of the stack.

use anyhow::{Context, Result};
use berth_core::domain::stack::Stack;
use berth_render::chart::{render_chart, values_yaml};
use berth_render::makefile::MakefileOptions;
use berth_render::{compose, dockerfile, makefile, workflow};
use clap::ValueEnum;
use colored::*;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Renderable artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Artifact {
    Pipeline,
    Image,
    Chart,
    Compose,
    Makefile,
    Values,
    All,
}

/// One rendered file, relative to the output directory
#[derive(Debug)]
struct RenderedFile {
    path: PathBuf,
    content: String,
}

impl RenderedFile {
    fn new(path: impl Into<PathBuf>, content: String) -> Self {
        Self {
            path: path.into(),
            content,
        }
    }
}

/// Handle the render command
///
/// # Arguments
/// * `artifact` - What to render
/// * `out` - Output directory; stdout when absent
/// * `release` - Chart release name
/// * `config` - The CLI configuration
pub fn handle_render_command(
    artifact: Artifact,
    out: Option<PathBuf>,
    release: Option<String>,
    config: &Config,
) -> Result<()> {
    let loaded = config.load()?;
    let release = release.unwrap_or_else(|| loaded.stack.name.clone());
    let files = render_artifact(&loaded.stack, artifact, &release)?;

    match out {
        Some(dir) => write_files(&dir, &files),
        None => {
            print_files(&files);
            Ok(())
        }
    }
}

fn render_artifact(stack: &Stack, artifact: Artifact, release: &str) -> Result<Vec<RenderedFile>> {
    let files = match artifact {
        Artifact::Pipeline => vec![RenderedFile::new(
            format!(".github/workflows/{}.yml", stack.pipeline.name),
            workflow::render(&stack.pipeline).context("Failed to render pipeline job")?,
        )],
        Artifact::Image => vec![RenderedFile::new(
            "Dockerfile",
            dockerfile::render(&stack.image).context("Failed to render Dockerfile")?,
        )],
        Artifact::Chart => {
            let chart = render_chart(&stack.values, release).context("Failed to render chart")?;
            let mut files = vec![
                RenderedFile::new("k8s/deployment.yaml", chart.deployment),
                RenderedFile::new("k8s/service.yaml", chart.service),
            ];
            if let Some(hpa) = chart.hpa {
                files.push(RenderedFile::new("k8s/hpa.yaml", hpa));
            }
            files
        }
        Artifact::Compose => vec![RenderedFile::new(
            "docker-compose.yml",
            compose::render(&stack.compose).context("Failed to render compose topology")?,
        )],
        Artifact::Makefile => vec![RenderedFile::new(
            "Makefile",
            makefile::render(&stack.entrypoints, &MakefileOptions::default())
                .context("Failed to render Makefile")?,
        )],
        Artifact::Values => vec![RenderedFile::new(
            "chart/values.yaml",
            values_yaml(&stack.values).context("Failed to render values")?,
        )],
        Artifact::All => {
            let mut files = Vec::new();
            for artifact in [
                Artifact::Pipeline,
                Artifact::Image,
                Artifact::Values,
                Artifact::Chart,
                Artifact::Compose,
                Artifact::Makefile,
            ] {
                files.extend(render_artifact(stack, artifact, release)?);
            }
            files
        }
    };

    Ok(files)
}

/// Every artifact format takes `#` comments, so files are separated with a
/// source header the way `helm template` does
fn print_files(files: &[RenderedFile]) {
    let headers = files.len() > 1;
    for file in files {
        if headers {
            println!("# Source: {}", file.path.display());
        }
        print!("{}", file.content);
        if !file.content.ends_with('\n') {
            println!();
        }
    }
}

fn write_files(dir: &Path, files: &[RenderedFile]) -> Result<()> {
    for file in files {
        let path = dir.join(&file.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, &file.content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} {}", "✓ Wrote".green().bold(), path.display());
    }
    Ok(())
}
