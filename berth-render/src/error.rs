//! Render and load error types

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

/// Errors raised while rendering or loading artifacts
#[derive(Debug, Error)]
pub enum RenderError {
    /// Template rendering failed
    #[error("template render error: {0}")]
    Template(#[from] minijinja::Error),

    /// A template referenced a value the context does not define
    #[error("undefined value in template '{template}': {message}")]
    Undefined { template: String, message: String },

    /// A template uses syntax the engine cannot parse
    #[error("cannot parse template '{template}': {message}")]
    Syntax { template: String, message: String },

    /// Rendered output still contains template delimiters
    #[error("unresolved placeholders in '{template}': {}", .placeholders.join(", "))]
    Unresolved {
        template: String,
        placeholders: Vec<String>,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An artifact could not be understood
    #[error("cannot parse {artifact} (line {line}): {message}")]
    Parse {
        artifact: &'static str,
        line: usize,
        message: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] berth_core::CoreError),
}

impl RenderError {
    pub fn parse(artifact: &'static str, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            artifact,
            line,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
