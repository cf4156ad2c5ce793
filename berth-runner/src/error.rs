//! Runner error types

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The entry point set has no target with this name
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// An action names a service missing from the topology
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// Required shell variables are not set
    #[error("missing required variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    /// A command exited with a non-zero status
    #[error("'{command}' failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A service did not accept connections in time
    #[error("service '{service}' not ready after {elapsed:?}: {last_error}")]
    NotReady {
        service: String,
        elapsed: Duration,
        last_error: String,
    },

    /// The engine binary could not be started
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] berth_core::CoreError),

    #[error("status report failed: {0}")]
    Status(#[from] berth_client::ClientError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variables_display() {
        let err = RunnerError::MissingVariables(vec!["PG_USER".to_string(), "SECRET_KEY".to_string()]);
        assert_eq!(err.to_string(), "missing required variables: PG_USER, SECRET_KEY");
    }

    #[test]
    fn test_command_failed_display() {
        let err = RunnerError::CommandFailed {
            command: "pytest -v".to_string(),
            exit_code: 1,
            stderr: "2 failed".to_string(),
        };
        assert!(err.to_string().contains("exit code 1"));
    }
}
