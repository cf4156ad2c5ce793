//! Runner configuration
//!
//! Tunables for readiness waits and the container engine, read from the
//! environment with defaults.

use std::time::Duration;

use crate::error::{Result, RunnerError};

/// Container engine binary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineKind {
    #[default]
    Docker,
    Podman,
}

impl EngineKind {
    pub fn program(&self) -> &'static str {
        match self {
            EngineKind::Docker => "docker",
            EngineKind::Podman => "podman",
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(EngineKind::Docker),
            "podman" => Ok(EngineKind::Podman),
            other => Err(RunnerError::Config(format!(
                "unknown engine '{}' (expected docker or podman)",
                other
            ))),
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub engine: EngineKind,

    /// Host the published service ports are reached on
    pub service_host: String,

    /// Give up waiting for a service after this long
    pub ready_timeout: Duration,

    /// First delay between readiness probes
    pub ready_initial_delay: Duration,

    /// Upper bound of the probe delay
    pub ready_max_delay: Duration,
}

impl RunnerConfig {
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            service_host: "127.0.0.1".to_string(),
            ready_timeout: Duration::from_secs(60),
            ready_initial_delay: Duration::from_millis(250),
            ready_max_delay: Duration::from_secs(5),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - BERTH_ENGINE (optional, docker or podman, default: docker)
    /// - BERTH_SERVICE_HOST (optional, default: 127.0.0.1)
    /// - BERTH_READY_TIMEOUT (optional, seconds, default: 60)
    /// - BERTH_READY_INITIAL_DELAY_MS (optional, default: 250)
    /// - BERTH_READY_MAX_DELAY_MS (optional, default: 5000)
    pub fn from_env() -> Result<Self> {
        let engine = match std::env::var("BERTH_ENGINE") {
            Ok(value) => value.parse()?,
            Err(_) => EngineKind::default(),
        };

        let mut config = Self::new(engine);

        if let Ok(host) = std::env::var("BERTH_SERVICE_HOST") {
            config.service_host = host;
        }

        if let Some(timeout) = env_u64("BERTH_READY_TIMEOUT") {
            config.ready_timeout = Duration::from_secs(timeout);
        }

        if let Some(delay) = env_u64("BERTH_READY_INITIAL_DELAY_MS") {
            config.ready_initial_delay = Duration::from_millis(delay);
        }

        if let Some(delay) = env_u64("BERTH_READY_MAX_DELAY_MS") {
            config.ready_max_delay = Duration::from_millis(delay);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.service_host.trim().is_empty() {
            return Err(RunnerError::Config("service_host cannot be empty".to_string()));
        }

        if self.ready_timeout.is_zero() {
            return Err(RunnerError::Config(
                "ready_timeout must be greater than 0".to_string(),
            ));
        }

        if self.ready_initial_delay.is_zero() {
            return Err(RunnerError::Config(
                "ready_initial_delay must be greater than 0".to_string(),
            ));
        }

        if self.ready_max_delay < self.ready_initial_delay {
            return Err(RunnerError::Config(
                "ready_max_delay must not be below ready_initial_delay".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(EngineKind::default())
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.engine, EngineKind::Docker);
        assert_eq!(config.ready_timeout, Duration::from_secs(60));
        assert_eq!(config.ready_initial_delay, Duration::from_millis(250));
        assert_eq!(config.ready_max_delay, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunnerConfig::default();

        config.ready_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.ready_timeout = Duration::from_secs(10);
        config.ready_max_delay = Duration::from_millis(100);
        assert!(config.validate().is_err());

        config.ready_max_delay = Duration::from_secs(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("podman".parse::<EngineKind>().unwrap(), EngineKind::Podman);
        assert_eq!(" Docker ".parse::<EngineKind>().unwrap(), EngineKind::Docker);
        assert!("containerd".parse::<EngineKind>().is_err());
        assert_eq!(EngineKind::Podman.program(), "podman");
    }
}
