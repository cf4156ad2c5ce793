//! Berth CLI
//!
//! Renders, checks and runs the deployment surface of a service.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Deployment surface toolkit: render, check and run", long_about = None)]
struct Cli {
    /// Stack manifest (defaults to berth.yaml in --dir when present)
    #[arg(long, env = "BERTH_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Repository directory
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so rendered artifacts can be piped
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "berth=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        dir: cli.dir,
        manifest: cli.manifest,
    };

    handle_command(cli.command, &config).await
}
