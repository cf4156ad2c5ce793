//! Readiness probes
//!
//! Waits until a service accepts connections, retrying with exponential
//! backoff until the configured timeout.

use berth_core::domain::compose::ComposeService;
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::engine::ContainerEngine;
use crate::error::{Result, RunnerError};

/// Port Postgres listens on when the service declares none
pub const DEFAULT_PG_PORT: u16 = 5432;

/// Connection parameters of a Postgres service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
}

impl PgEndpoint {
    /// Endpoint of a Postgres compose service reached on `host`
    ///
    /// Credentials come from the service's `POSTGRES_*` environment, with
    /// the image defaults (`postgres` user, database named after the user).
    /// Returns None when no port is published to the host.
    pub fn for_service(service: &ComposeService, host: &str) -> Option<Self> {
        let port = service.ports.iter().find_map(|p| p.host)?;
        let env = &service.environment;
        let user = env
            .get("POSTGRES_USER")
            .filter(|u| !u.is_empty())
            .cloned()
            .unwrap_or_else(|| "postgres".to_string());
        let database = env
            .get("POSTGRES_DB")
            .filter(|d| !d.is_empty())
            .cloned()
            .unwrap_or_else(|| user.clone());

        Some(Self {
            host: host.to_string(),
            port,
            user,
            password: env.get("POSTGRES_PASSWORD").cloned(),
            database,
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

/// How readiness of one service is established
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// A TCP connect to a published port
    Tcp { host: String, port: u16 },
    /// `SELECT 1` against a Postgres service
    Postgres(PgEndpoint),
    /// A command run inside the service container that exits 0 when ready
    Exec {
        profile: String,
        service: String,
        command: Vec<String>,
    },
}

impl Probe {
    /// Picks the probe for `service`, started under `profile`
    ///
    /// Postgres services get a query probe (or `pg_isready` on the server's
    /// listen port in the container when no port is published), other
    /// services a TCP probe
    /// on their first published port, and the rest a no-op exec that
    /// succeeds once the container runs.
    pub fn for_service(name: &str, service: &ComposeService, profile: &str, host: &str) -> Self {
        if service.is_database() {
            if let Some(endpoint) = PgEndpoint::for_service(service, host) {
                return Probe::Postgres(endpoint);
            }
            let user = service
                .environment
                .get("POSTGRES_USER")
                .cloned()
                .unwrap_or_else(|| "postgres".to_string());
            let port = service.listen_port().unwrap_or(DEFAULT_PG_PORT);
            return Probe::Exec {
                profile: profile.to_string(),
                service: name.to_string(),
                command: vec![
                    "pg_isready".to_string(),
                    "-U".to_string(),
                    user,
                    "-p".to_string(),
                    port.to_string(),
                ],
            };
        }

        match service.ports.iter().find_map(|p| p.host) {
            Some(port) => Probe::Tcp {
                host: host.to_string(),
                port,
            },
            None => Probe::Exec {
                profile: profile.to_string(),
                service: name.to_string(),
                command: vec!["true".to_string()],
            },
        }
    }

    /// One probe attempt; the error is the reason the service is not ready
    pub async fn check(&self, engine: &dyn ContainerEngine) -> std::result::Result<(), String> {
        match self {
            Probe::Tcp { host, port } => TcpStream::connect((host.as_str(), *port))
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Probe::Postgres(endpoint) => {
                let mut conn = PgConnection::connect_with(&endpoint.connect_options())
                    .await
                    .map_err(|e| e.to_string())?;
                sqlx::query("SELECT 1")
                    .execute(&mut conn)
                    .await
                    .map_err(|e| e.to_string())?;
                let _ = conn.close().await;
                Ok(())
            }
            Probe::Exec {
                profile,
                service,
                command,
            } => {
                let output = engine
                    .exec(profile, service, command)
                    .await
                    .map_err(|e| e.to_string())?;
                if output.success() {
                    Ok(())
                } else {
                    Err(format!(
                        "'{}' exited with {}: {}",
                        command.join(" "),
                        output.exit_code,
                        output.stderr.trim()
                    ))
                }
            }
        }
    }
}

/// Backoff schedule for readiness waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for ReadinessPolicy {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            timeout: config.ready_timeout,
            initial_delay: config.ready_initial_delay,
            max_delay: config.ready_max_delay,
        }
    }
}

/// Probes `service` until it is ready or the policy times out
///
/// # Returns
/// Time spent waiting
pub async fn wait_ready(
    service: &str,
    probe: &Probe,
    engine: &dyn ContainerEngine,
    policy: &ReadinessPolicy,
) -> Result<Duration> {
    let started = Instant::now();
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    info!("Waiting for '{}' to accept connections", service);

    loop {
        attempt += 1;
        let remaining = policy.timeout.saturating_sub(started.elapsed());
        let attempt_timeout = remaining.min(policy.max_delay.max(Duration::from_secs(1)));

        let outcome = match tokio::time::timeout(attempt_timeout, probe.check(engine)).await {
            Ok(result) => result,
            Err(_) => Err(format!("probe timed out after {:?}", attempt_timeout)),
        };

        match outcome {
            Ok(()) => {
                let elapsed = started.elapsed();
                info!(
                    "'{}' is ready after {} attempt(s) ({:?})",
                    service, attempt, elapsed
                );
                return Ok(elapsed);
            }
            Err(reason) => {
                let elapsed = started.elapsed();
                if elapsed + delay > policy.timeout {
                    warn!("'{}' did not become ready: {}", service, reason);
                    return Err(RunnerError::NotReady {
                        service: service.to_string(),
                        elapsed,
                        last_error: reason,
                    });
                }

                debug!(
                    "'{}' not ready (attempt {}): {}; retrying in {:?}",
                    service, attempt, reason, delay
                );
                tokio::time::sleep(delay).await;

                // Exponential backoff with cap
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;
    use berth_core::MapVarProvider;
    use berth_core::domain::compose::{ComposeTopology, PortMapping};
    use tokio::net::TcpListener;

    fn quick_policy() -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_millis(300),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_probe_selection() {
        let topology = ComposeTopology::banking();

        let db = topology.service("test_db").unwrap();
        match Probe::for_service("test_db", db, "test", "127.0.0.1") {
            Probe::Postgres(endpoint) => {
                assert_eq!(endpoint.port, 5439);
                assert_eq!(endpoint.database, "banking_test");
            }
            other => panic!("unexpected probe: {:?}", other),
        }

        let redis = topology.service("redis").unwrap();
        assert_eq!(
            Probe::for_service("redis", redis, "dev", "127.0.0.1"),
            Probe::Tcp {
                host: "127.0.0.1".to_string(),
                port: 6379
            }
        );
    }

    #[test]
    fn test_unpublished_database_uses_pg_isready() {
        let mut db = ComposeTopology::banking().service("db").unwrap().clone();
        db.ports = vec![PortMapping {
            host: None,
            container: 5432,
        }];

        match Probe::for_service("db", &db, "dev", "127.0.0.1") {
            Probe::Exec { command, .. } => {
                assert_eq!(command, vec!["pg_isready", "-U", "${PG_USER}", "-p", "5432"])
            }
            other => panic!("unexpected probe: {:?}", other),
        }
    }

    #[test]
    fn test_pg_isready_targets_custom_port() {
        let topology = ComposeTopology::banking()
            .interpolate(&MapVarProvider::from([
                ("PG_USER", "banking"),
                ("PG_PASSWORD", "secret"),
                ("SECRET_KEY", "dev-key"),
            ]))
            .unwrap();
        let mut test_db = topology.service("test_db").unwrap().clone();
        test_db.ports.clear();

        assert_eq!(
            Probe::for_service("test_db", &test_db, "test", "127.0.0.1"),
            Probe::Exec {
                profile: "test".to_string(),
                service: "test_db".to_string(),
                command: vec!["pg_isready", "-U", "banking", "-p", "5439"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            }
        );
    }

    #[tokio::test]
    async fn test_tcp_probe_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = Probe::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        };

        let waited = wait_ready("redis", &probe, &FakeEngine::new(), &quick_policy())
            .await
            .unwrap();
        assert!(waited < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_closed_port_times_out() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let probe = Probe::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        };

        let err = wait_ready("redis", &probe, &FakeEngine::new(), &quick_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::NotReady { .. }));
    }

    #[tokio::test]
    async fn test_exec_probe_retries_until_success() {
        let engine = FakeEngine::new().script("db", &[1, 1, 0]);
        let probe = Probe::Exec {
            profile: "dev".to_string(),
            service: "db".to_string(),
            command: vec!["pg_isready".to_string()],
        };

        wait_ready("db", &probe, &engine, &quick_policy()).await.unwrap();
        assert_eq!(engine.calls().len(), 3);
    }
}
