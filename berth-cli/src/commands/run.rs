//! Run command handlers
//!
//! Executes an entry point target through the container engine.

use anyhow::{Context, Result};
use berth_core::EnvVarProvider;
use berth_render::{LoadedDir, compose};
use berth_runner::{ComposeEngine, ContainerEngine, EngineKind, RunnerConfig, TargetRunner};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;

/// Directory the rendered topology is written to when the repository has
/// no compose file of its own
const GENERATED_DIR: &str = ".berth";

/// Handle the run command
pub async fn handle_run_command(
    target: &str,
    engine: Option<String>,
    compose_file: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let loaded = config.load()?;
    let runner_config = runner_config(engine)?;
    let runner = target_runner(&loaded, runner_config, compose_file)?;

    let summary = runner
        .run(target)
        .await
        .with_context(|| format!("Target '{}' failed", target))?;

    for output in &summary.outputs {
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
    }

    println!(
        "{} {} ({} action(s) in {:.1?})",
        "✓ Target completed:".green().bold(),
        summary.target.cyan(),
        summary.actions,
        summary.elapsed
    );
    println!("  {}", format!("run {}", summary.run_id).dimmed());

    Ok(())
}

/// Runner configuration from the environment, with `engine` taking
/// precedence over `BERTH_ENGINE`
pub(crate) fn runner_config(engine: Option<String>) -> Result<RunnerConfig> {
    let mut config = RunnerConfig::from_env().context("Invalid runner configuration")?;
    if let Some(engine) = engine {
        config.engine = engine
            .parse::<EngineKind>()
            .context("Invalid --engine")?;
    }
    config.validate().context("Invalid runner configuration")?;
    Ok(config)
}

/// Builds a target runner for the loaded directory
pub(crate) fn target_runner(
    loaded: &LoadedDir,
    config: RunnerConfig,
    compose_file: Option<PathBuf>,
) -> Result<TargetRunner> {
    // The engine runs inside the project, so paths taken relative to the
    // invoking directory are made absolute first
    let root = absolute(&loaded.root)?;

    let mut engine =
        ComposeEngine::new(config.engine, &root).with_project_name(project_name(&loaded.stack.name));
    engine = match compose_file.or_else(|| loaded.compose_file.clone()) {
        Some(path) => engine.with_compose_file(absolute(&path)?),
        None => engine
            .with_compose_file(absolute(&write_generated_compose(loaded)?)?)
            .with_project_directory(&root),
    };
    let engine: Arc<dyn ContainerEngine> = Arc::new(engine);

    Ok(TargetRunner::new(
        loaded.stack.clone(),
        engine,
        Arc::new(EnvVarProvider),
        root,
    )
    .with_config(config))
}

/// Compose project names are lowercase letters, digits, `-` and `_`
fn project_name(stack: &str) -> String {
    stack
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Failed to resolve {}", path.display()))
}

fn write_generated_compose(loaded: &LoadedDir) -> Result<PathBuf> {
    let dir = loaded.root.join(GENERATED_DIR);
    let path = dir.join("docker-compose.yml");
    let yaml = compose::render(&loaded.stack.compose).context("Failed to render compose topology")?;

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    std::fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;

    info!("No compose file found, using rendered {}", path.display());
    Ok(path)
}
