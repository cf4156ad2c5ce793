//! Database bootstrap
//!
//! Applies a multi-statement SQL script to a Postgres service, either over
//! a published port or through `psql` inside the container.

use sqlx::Connection;
use sqlx::postgres::PgConnection;
use std::path::Path;
use tracing::info;

use crate::engine::ContainerEngine;
use crate::error::{Result, RunnerError};
use crate::readiness::PgEndpoint;

/// Reads a bootstrap script
pub async fn read_script(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RunnerError::Io {
            path: path.display().to_string(),
            source,
        })
}

/// Runs `script` against the endpoint in one simple-query round trip
///
/// Statements run in order; the first failing statement aborts the script
/// with the database error.
pub async fn bootstrap(endpoint: &PgEndpoint, script: &str) -> Result<()> {
    info!(
        "Applying bootstrap script to {}:{}/{}",
        endpoint.host, endpoint.port, endpoint.database
    );

    let mut conn = PgConnection::connect_with(&endpoint.connect_options()).await?;
    let result = sqlx::raw_sql(script).execute(&mut conn).await?;
    conn.close().await?;

    info!("Bootstrap applied ({} rows affected)", result.rows_affected());
    Ok(())
}

/// Runs `script` through `psql` inside the container of `service`,
/// connecting to the server on `port`
pub async fn bootstrap_in_container(
    engine: &dyn ContainerEngine,
    profile: &str,
    service: &str,
    user: &str,
    database: &str,
    port: u16,
    script: &str,
) -> Result<()> {
    info!("Applying bootstrap script through psql in '{}'", service);

    let command = psql_command(user, database, port, script);
    engine
        .exec(profile, service, &command)
        .await?
        .check(&format!("psql in {}", service))?;
    Ok(())
}

fn psql_command(user: &str, database: &str, port: u16, script: &str) -> Vec<String> {
    let port = port.to_string();
    [
        "psql",
        "-v",
        "ON_ERROR_STOP=1",
        "-U",
        user,
        "-d",
        database,
        "-p",
        &port,
        "-c",
        script,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    #[test]
    fn test_psql_command() {
        let command = psql_command("banking", "banking_test", 5439, "SELECT 1;");
        assert_eq!(
            command,
            vec![
                "psql",
                "-v",
                "ON_ERROR_STOP=1",
                "-U",
                "banking",
                "-d",
                "banking_test",
                "-p",
                "5439",
                "-c",
                "SELECT 1;"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_psql_is_an_error() {
        let engine = FakeEngine::new().script("db", &[3]);
        let err = bootstrap_in_container(&engine, "dev", "db", "u", "d", 5432, "bogus;")
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::CommandFailed { exit_code: 3, .. }));
    }

    #[tokio::test]
    async fn test_missing_script_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = read_script(&dir.path().join("init.sql")).await.unwrap_err();
        assert!(err.to_string().contains("init.sql"));
    }
}
