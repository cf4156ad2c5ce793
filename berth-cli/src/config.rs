//! Configuration module
//!
//! Resolves where the stack comes from: the repository directory and an
//! optional explicit manifest.

use anyhow::{Context, Result};
use berth_render::{LoadedDir, load_dir, parse_manifest};
use std::path::PathBuf;
use tracing::debug;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository directory
    pub dir: PathBuf,
    /// Explicit manifest; replaces whatever the directory yields
    pub manifest: Option<PathBuf>,
}

impl Config {
    /// Loads the stack of the configured directory
    pub fn load(&self) -> Result<LoadedDir> {
        let mut loaded = load_dir(&self.dir)
            .with_context(|| format!("Failed to load {}", self.dir.display()))?;

        if let Some(path) = &self.manifest {
            debug!("Using manifest {}", path.display());
            let yaml = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
            loaded.stack = parse_manifest(&yaml)
                .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
            loaded.sources = vec![path.clone()];
        }

        Ok(loaded)
    }
}
