//! Wait command handler
//!
//! Blocks until one compose service accepts connections. Rendered
//! Makefiles call this in place of a fixed sleep.

use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;
use std::time::Duration;

use super::run::{runner_config, target_runner};
use crate::config::Config;

/// Handle the wait command
///
/// # Arguments
/// * `service` - Compose service to wait for
/// * `profile` - Profile the service runs in
/// * `timeout` - Overrides `BERTH_READY_TIMEOUT` (seconds)
pub async fn handle_wait_command(
    service: &str,
    profile: &str,
    timeout: Option<u64>,
    engine: Option<String>,
    compose_file: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let loaded = config.load()?;

    let mut runner_config = runner_config(engine)?;
    if let Some(secs) = timeout {
        runner_config.ready_timeout = Duration::from_secs(secs);
        runner_config
            .validate()
            .context("Invalid --timeout")?;
    }

    let runner = target_runner(&loaded, runner_config, compose_file)?;
    let elapsed = runner
        .wait_for(service, profile)
        .await
        .with_context(|| format!("Service '{}' is not ready", service))?;

    println!(
        "{} {} {}",
        "✓ Ready:".green().bold(),
        service.cyan(),
        format!("({:.1?})", elapsed).dimmed()
    );

    Ok(())
}
