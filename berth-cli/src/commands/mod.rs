//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod check;
mod ci;
mod profiles;
mod render;
mod run;
mod wait;

pub use check::OutputFormat;
pub use render::Artifact;

use anyhow::Result;
use berth_core::domain::compose::DEV_PROFILE;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Render deployment artifacts from the stack
    Render {
        /// Artifact to render
        #[arg(value_enum)]
        artifact: Artifact,

        /// Write files under this directory instead of printing them
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Release name used by the chart (defaults to the stack name)
        #[arg(long)]
        release: Option<String>,
    },
    /// Check the artifacts for consistency
    Check {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Run an entry point target
    Run {
        /// Target name (e.g. setup, run, test)
        target: String,

        /// Container engine (docker or podman)
        #[arg(long, env = "BERTH_ENGINE")]
        engine: Option<String>,

        /// Compose file (defaults to the one found in --dir)
        #[arg(long)]
        compose_file: Option<PathBuf>,
    },
    /// Wait until a service accepts connections
    Wait {
        /// Compose service name
        service: String,

        /// Profile the service runs in
        #[arg(short, long, default_value = DEV_PROFILE)]
        profile: String,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Container engine (docker or podman)
        #[arg(long, env = "BERTH_ENGINE")]
        engine: Option<String>,

        /// Compose file (defaults to the one found in --dir)
        #[arg(long)]
        compose_file: Option<PathBuf>,
    },
    /// Run the pipeline job against the local checkout
    Ci {
        /// Branch the pull request targets
        #[arg(long, default_value = "main")]
        base: String,

        /// Repository as owner/name
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repo: Option<String>,

        /// Commit the statuses are posted for
        #[arg(long, env = "GITHUB_SHA")]
        sha: Option<String>,

        /// Hosting platform API
        #[arg(long, env = "BERTH_HOSTING_URL", default_value = "https://api.github.com")]
        hosting_url: String,

        /// Token for the hosting platform API
        #[arg(long, env = "BERTH_HOSTING_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// List compose profiles with their services and start order
    Profiles,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
///
/// # Returns
/// Result indicating success or failure
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Render {
            artifact,
            out,
            release,
        } => render::handle_render_command(artifact, out, release, config),
        Commands::Check { format } => check::handle_check_command(format, config),
        Commands::Run {
            target,
            engine,
            compose_file,
        } => run::handle_run_command(&target, engine, compose_file, config).await,
        Commands::Wait {
            service,
            profile,
            timeout,
            engine,
            compose_file,
        } => {
            wait::handle_wait_command(&service, &profile, timeout, engine, compose_file, config)
                .await
        }
        Commands::Ci {
            base,
            repo,
            sha,
            hosting_url,
            token,
        } => ci::handle_ci_command(base, repo, sha, hosting_url, token, config).await,
        Commands::Profiles => profiles::handle_profiles_command(config),
    }
}
