//! Image build spec domain types
//!
//! A single-stage container image: OS packages, dependency installation,
//! a non-privileged runtime user, copied sources and the start command.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Container image recipe for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuildSpec {
    pub base_image: String,
    #[serde(default)]
    pub os_packages: Vec<String>,
    pub workdir: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Shell commands installing the declared dependencies
    #[serde(default)]
    pub dependency_install: Vec<String>,
    pub user: RuntimeUser,
    #[serde(default)]
    pub copy: Vec<CopyInstruction>,
    pub expose: u16,
    pub command: Vec<String>,
}

/// Non-root user the container runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeUser {
    pub name: String,
    pub uid: u32,
}

/// `COPY src dest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyInstruction {
    pub source: String,
    pub destination: String,
    /// Optional `--chown` owner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chown: Option<String>,
}

impl CopyInstruction {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            chown: None,
        }
    }
}

impl ImageBuildSpec {
    /// The banking API image, served by gunicorn on port 8000
    pub fn banking() -> Self {
        Self {
            base_image: "python:3.12-slim".to_string(),
            os_packages: vec![
                "build-essential".to_string(),
                "libpq-dev".to_string(),
            ],
            workdir: "/app".to_string(),
            env: BTreeMap::from([
                ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ]),
            dependency_install: vec![
                "pip install --no-cache-dir --upgrade pip".to_string(),
                "pip install --no-cache-dir -r requirements.txt".to_string(),
            ],
            user: RuntimeUser {
                name: "appuser".to_string(),
                uid: 1000,
            },
            copy: vec![
                CopyInstruction::new("requirements.txt", "."),
                CopyInstruction {
                    source: ".".to_string(),
                    destination: ".".to_string(),
                    chown: Some("appuser:appuser".to_string()),
                },
            ],
            expose: 8000,
            command: vec![
                "gunicorn".to_string(),
                "-c".to_string(),
                "server/gunicorn.conf.py".to_string(),
                "manage:app".to_string(),
            ],
        }
    }

    /// The frontend image, served on port 4000
    pub fn frontend() -> Self {
        Self {
            base_image: "node:20-slim".to_string(),
            os_packages: Vec::new(),
            workdir: "/app".to_string(),
            env: BTreeMap::from([("NODE_ENV".to_string(), "production".to_string())]),
            dependency_install: vec!["npm ci".to_string(), "npm run build".to_string()],
            user: RuntimeUser {
                name: "appuser".to_string(),
                uid: 1000,
            },
            copy: vec![
                CopyInstruction::new("package.json", "."),
                CopyInstruction::new("package-lock.json", "."),
                CopyInstruction {
                    source: ".".to_string(),
                    destination: ".".to_string(),
                    chown: Some("appuser:appuser".to_string()),
                },
            ],
            expose: 4000,
            command: vec![
                "npx".to_string(),
                "pm2-runtime".to_string(),
                "start".to_string(),
                "ecosystem.config.js".to_string(),
            ],
        }
    }

    /// Port the image declares with `EXPOSE`
    pub fn exposed_port(&self) -> u16 {
        self.expose
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_image.trim().is_empty() {
            return Err(CoreError::invalid("image", "base image cannot be empty"));
        }

        if self.user.uid == 0 || self.user.name == "root" {
            return Err(CoreError::invalid(
                "image",
                "runtime user must not be root",
            ));
        }

        if self.expose == 0 {
            return Err(CoreError::invalid("image", "exposed port must be non-zero"));
        }

        if self.command.is_empty() {
            return Err(CoreError::invalid("image", "start command cannot be empty"));
        }

        if !self.workdir.starts_with('/') {
            return Err(CoreError::invalid(
                "image",
                format!("workdir '{}' must be absolute", self.workdir),
            ));
        }

        Ok(())
    }
}
