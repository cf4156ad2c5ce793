//! Entry point execution
//!
//! Runs the actions of one target in order against a container engine.
//! The first failing action aborts the run.

use berth_core::VarProvider;
use berth_core::domain::compose::{ComposeTopology, DEV_PROFILE};
use berth_core::domain::entrypoint::Action;
use berth_core::domain::stack::Stack;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bootstrap::{bootstrap, bootstrap_in_container, read_script};
use crate::config::RunnerConfig;
use crate::engine::{ContainerEngine, ExecOutput};
use crate::error::{Result, RunnerError};
use crate::readiness::{DEFAULT_PG_PORT, PgEndpoint, Probe, ReadinessPolicy, wait_ready};

/// Outcome of a successful target run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub target: String,
    pub actions: usize,
    pub elapsed: Duration,
    /// Output of every `Exec` action, in order
    pub outputs: Vec<ExecOutput>,
}

/// Executes entry point targets of one stack
pub struct TargetRunner {
    stack: Stack,
    engine: Arc<dyn ContainerEngine>,
    vars: Arc<dyn VarProvider>,
    config: RunnerConfig,
    root: PathBuf,
}

impl TargetRunner {
    /// Creates a runner
    ///
    /// # Arguments
    /// * `stack` - Stack whose entry points and topology are used
    /// * `engine` - Container engine the actions are sent to
    /// * `vars` - Shell variables consumed by the topology
    /// * `root` - Directory bootstrap scripts are resolved against
    pub fn new(
        stack: Stack,
        engine: Arc<dyn ContainerEngine>,
        vars: Arc<dyn VarProvider>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stack,
            engine,
            vars,
            config: RunnerConfig::default(),
            root: root.into(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Required variables the environment does not provide
    pub fn missing_variables(&self) -> Vec<String> {
        self.stack
            .compose
            .required_variables()
            .into_iter()
            .filter(|var| var.required && self.vars.get(&var.name).is_none())
            .map(|var| var.name)
            .collect()
    }

    /// Runs the target called `name`
    pub async fn run(&self, name: &str) -> Result<RunSummary> {
        let target = self
            .stack
            .entrypoints
            .target(name)
            .ok_or_else(|| RunnerError::UnknownTarget(name.to_string()))?;

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%run_id, "Running target '{}'", name);

        let missing = self.missing_variables();
        if !missing.is_empty() {
            error!(%run_id, "Missing required variables: {}", missing.join(", "));
            return Err(RunnerError::MissingVariables(missing));
        }

        let topology = self.stack.compose.interpolate(self.vars.as_ref())?;
        let profile = target.profile().unwrap_or(DEV_PROFILE);
        let mut outputs = Vec::new();

        for (index, action) in target.actions.iter().enumerate() {
            debug!(%run_id, "Action {}/{}: {:?}", index + 1, target.actions.len(), action);

            match self.run_action(action, profile, &topology).await {
                Ok(Some(output)) => outputs.push(output),
                Ok(None) => {}
                Err(e) => {
                    error!(%run_id, "Target '{}' failed at action {}: {}", name, index + 1, e);
                    return Err(e);
                }
            }
        }

        let elapsed = started.elapsed();
        info!(%run_id, "Target '{}' completed in {:?}", name, elapsed);

        Ok(RunSummary {
            run_id,
            target: name.to_string(),
            actions: target.actions.len(),
            elapsed,
            outputs,
        })
    }

    /// Waits for one service of the stack outside of a target
    pub async fn wait_for(&self, service: &str, profile: &str) -> Result<Duration> {
        let topology = self.stack.compose.interpolate(self.vars.as_ref())?;
        self.wait_service(service, profile, &topology).await
    }

    async fn run_action(
        &self,
        action: &Action,
        profile: &str,
        topology: &ComposeTopology,
    ) -> Result<Option<ExecOutput>> {
        match action {
            Action::ComposeUp { profile, services } => {
                self.engine.up(profile, services).await?;
            }
            Action::ComposeDown { profile } => {
                self.engine.down(profile).await?;
            }
            Action::WaitReady { service } => {
                self.wait_service(service, profile, topology).await?;
            }
            Action::Bootstrap { service, script } => {
                self.bootstrap_service(service, script, profile, topology)
                    .await?;
            }
            Action::Exec { service, command } => {
                let output = self.engine.exec(profile, service, command).await?;
                if !output.success() && !output.stdout.trim().is_empty() {
                    warn!("{} output:\n{}", service, output.stdout.trim_end());
                }
                return Ok(Some(output.check(&command.join(" "))?));
            }
        }
        Ok(None)
    }

    async fn wait_service(
        &self,
        service: &str,
        profile: &str,
        topology: &ComposeTopology,
    ) -> Result<Duration> {
        let definition = topology
            .service(service)
            .ok_or_else(|| RunnerError::UnknownService(service.to_string()))?;
        let probe = Probe::for_service(service, definition, profile, &self.config.service_host);
        let policy = ReadinessPolicy::from(&self.config);

        wait_ready(service, &probe, self.engine.as_ref(), &policy).await
    }

    async fn bootstrap_service(
        &self,
        service: &str,
        script: &str,
        profile: &str,
        topology: &ComposeTopology,
    ) -> Result<()> {
        let definition = topology
            .service(service)
            .ok_or_else(|| RunnerError::UnknownService(service.to_string()))?;
        let sql = read_script(&self.root.join(script)).await?;

        match PgEndpoint::for_service(definition, &self.config.service_host) {
            Some(endpoint) => bootstrap(&endpoint, &sql).await,
            None => {
                let user = definition
                    .environment
                    .get("POSTGRES_USER")
                    .map(String::as_str)
                    .unwrap_or("postgres");
                let database = definition
                    .environment
                    .get("POSTGRES_DB")
                    .map(String::as_str)
                    .unwrap_or(user);
                let port = definition.listen_port().unwrap_or(DEFAULT_PG_PORT);
                bootstrap_in_container(
                    self.engine.as_ref(),
                    profile,
                    service,
                    user,
                    database,
                    port,
                    &sql,
                )
                .await
            }
        }
    }
}
