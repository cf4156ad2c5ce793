//! Pipeline job execution
//!
//! Runs the steps of a CI job against a local checkout and reports the
//! outcome as a commit status. The first failing step aborts the job.

use async_trait::async_trait;
use berth_client::HostingClient;
use berth_core::VarProvider;
use berth_core::domain::pipeline::{PipelineJob, StepKind, resolve_expressions};
use berth_core::dto::status::{CommitState, CommitStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::engine::{ExecOutput, run_streaming};
use crate::error::{Result, RunnerError};

/// Environment variable holding the changed folders for later steps
pub const CHANGED_FOLDERS_VAR: &str = "CHANGED_FOLDERS";

/// Pause before re-posting a status the platform failed to store
const STATUS_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Commit status context the job reports under
pub fn status_context(job: &PipelineJob) -> String {
    format!("berth/{}", job.name)
}

/// Sink for commit statuses
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, status: &CommitStatus) -> Result<()>;
}

/// Logs statuses without sending them anywhere
pub struct LogReporter;

#[async_trait]
impl StatusReporter for LogReporter {
    async fn report(&self, status: &CommitStatus) -> Result<()> {
        info!(
            "Status {}: {} {}",
            status.context,
            status.state,
            status.description.as_deref().unwrap_or("")
        );
        Ok(())
    }
}

/// Posts statuses for one commit to the hosting platform
pub struct HostingReporter {
    client: HostingClient,
    repo: String,
    sha: String,
}

impl HostingReporter {
    pub fn new(client: HostingClient, repo: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            client,
            repo: repo.into(),
            sha: sha.into(),
        }
    }
}

#[async_trait]
impl StatusReporter for HostingReporter {
    /// Posts the status, retrying once when the platform answers 5xx
    async fn report(&self, status: &CommitStatus) -> Result<()> {
        match self.client.post_status(&self.repo, &self.sha, status).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_server_error() => {
                warn!("{} failed to store the status ({}); retrying", self.client.base_url(), e);
                tokio::time::sleep(STATUS_RETRY_DELAY).await;
                self.client.post_status(&self.repo, &self.sha, status).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Inputs of one pipeline run
pub struct PipelineContext {
    /// Local checkout the job runs in
    pub workdir: PathBuf,
    /// Branch the pull request targets
    pub base: String,
    /// Source of secrets and `env.` expressions
    pub vars: Arc<dyn VarProvider>,
}

/// Result of one executed step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub elapsed: Duration,
    pub output: Option<ExecOutput>,
}

/// Result of a successful pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub changed_folders: Vec<String>,
    pub steps: Vec<StepResult>,
}

/// Executes pipeline jobs
pub struct PipelineRunner {
    reporter: Arc<dyn StatusReporter>,
}

impl PipelineRunner {
    pub fn new(reporter: Arc<dyn StatusReporter>) -> Self {
        Self { reporter }
    }

    /// Runs `job` in `ctx`, posting `pending` then `success` or `failure`
    pub async fn run(&self, job: &PipelineJob, ctx: &PipelineContext) -> Result<PipelineOutcome> {
        let status_context = status_context(job);
        info!("Running pipeline job '{}' in {}", job.name, ctx.workdir.display());

        self.send(CommitStatus::new(CommitState::Pending, &status_context).with_description(
            format!("{} steps queued", job.steps.len()),
        ))
        .await;

        match self.run_steps(job, ctx).await {
            Ok(outcome) => {
                info!("Pipeline job '{}' succeeded", job.name);
                self.send(
                    CommitStatus::new(CommitState::Success, &status_context)
                        .with_description(format!("{} steps passed", outcome.steps.len())),
                )
                .await;
                Ok(outcome)
            }
            Err((step, err)) => {
                error!("Pipeline job '{}' failed at step '{}': {}", job.name, step, err);
                self.send(
                    CommitStatus::new(CommitState::Failure, &status_context)
                        .with_description(format!("step '{}' failed: {}", step, err)),
                )
                .await;
                Err(err)
            }
        }
    }

    async fn send(&self, status: CommitStatus) {
        if let Err(e) = self.reporter.report(&status).await {
            warn!("Failed to report {} status: {}", status.state, e);
        }
    }

    async fn run_steps(
        &self,
        job: &PipelineJob,
        ctx: &PipelineContext,
    ) -> std::result::Result<PipelineOutcome, (String, RunnerError)> {
        let mut outcome = PipelineOutcome::default();

        for step in &job.steps {
            let started = Instant::now();
            debug!("Step '{}'", step.name);
            let fail = |e: RunnerError| (step.name.clone(), e);

            let output = match &step.kind {
                StepKind::Checkout { .. } => {
                    debug!("Using the local checkout");
                    None
                }
                StepKind::SetupRuntime { language, version } => {
                    check_runtime(language, version).await.map_err(fail)?;
                    None
                }
                StepKind::ChangedFiles { .. } => {
                    outcome.changed_folders = changed_folders(&ctx.workdir, &ctx.base)
                        .await
                        .map_err(fail)?;
                    info!("Changed folders: {}", outcome.changed_folders.join(", "));
                    None
                }
                StepKind::Run { command } => {
                    let separator = changed_separator(job);
                    let mut env = BTreeMap::new();
                    for (key, value) in job.env.iter().chain(step.env.iter()) {
                        let value = resolve_expressions(value, ctx.vars.as_ref())
                            .map_err(|e| fail(e.into()))?;
                        env.insert(key.clone(), value);
                    }
                    env.insert(
                        CHANGED_FOLDERS_VAR.to_string(),
                        outcome.changed_folders.join(&separator),
                    );

                    let output = run_shell(command, &ctx.workdir, &env).await.map_err(fail)?;
                    Some(output.check(command).map_err(fail)?)
                }
            };

            outcome.steps.push(StepResult {
                name: step.name.clone(),
                elapsed: started.elapsed(),
                output,
            });
        }

        Ok(outcome)
    }
}

fn changed_separator(job: &PipelineJob) -> String {
    job.steps
        .iter()
        .find_map(|s| match &s.kind {
            StepKind::ChangedFiles { separator } => Some(separator.clone()),
            _ => None,
        })
        .unwrap_or_else(|| ",".to_string())
}

/// Top-level folders touched between `base` and `HEAD`
///
/// Files at the repository root map to `.`.
pub async fn changed_folders(repo: &Path, base: &str) -> Result<Vec<String>> {
    let range = format!("{}...HEAD", base);
    let output = Command::new("git")
        .args(["diff", "--name-only", range.as_str()])
        .current_dir(repo)
        .output()
        .await
        .map_err(|source| RunnerError::Spawn {
            program: "git".to_string(),
            source,
        })?;

    let output = ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    }
    .check(&format!("git diff --name-only {}", range))?;

    Ok(top_level_folders(output.stdout.lines()))
}

fn top_level_folders<'a>(paths: impl Iterator<Item = &'a str>) -> Vec<String> {
    paths
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('/') {
            Some((folder, _)) => folder.to_string(),
            None => ".".to_string(),
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Verifies the interpreter for `language` is on PATH
async fn check_runtime(language: &str, version: &str) -> Result<()> {
    let candidates: Vec<&str> = match language {
        "python" => vec!["python3", "python"],
        "node" => vec!["node"],
        other => vec![other],
    };

    let mut last_error = None;
    for program in candidates {
        match Command::new(program).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                // Python 2 prints its version on stderr
                let reported = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                let reported = reported.trim();
                if reported.contains(version) {
                    info!("Using {} ({})", program, reported);
                } else {
                    warn!("{} reports '{}', job pins {} {}", program, reported, language, version);
                }
                return Ok(());
            }
            Ok(_) => continue,
            Err(source) => {
                last_error = Some(RunnerError::Spawn {
                    program: program.to_string(),
                    source,
                })
            }
        }
    }

    Err(last_error.unwrap_or_else(|| RunnerError::CommandFailed {
        command: format!("{} --version", language),
        exit_code: 1,
        stderr: format!("no working {} runtime found", language),
    }))
}

async fn run_shell(command: &str, workdir: &Path, env: &BTreeMap<String, String>) -> Result<ExecOutput> {
    info!("$ {}", command);

    let mut shell = Command::new("sh");
    shell.arg("-c").arg(command).current_dir(workdir).envs(env);

    run_streaming(shell, "sh", |_, line| info!("  {}", line)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::MapVarProvider;
    use berth_core::domain::pipeline::Step;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        statuses: Mutex<Vec<CommitStatus>>,
    }

    #[async_trait]
    impl StatusReporter for RecordingReporter {
        async fn report(&self, status: &CommitStatus) -> Result<()> {
            self.statuses.lock().unwrap().push(status.clone());
            Ok(())
        }
    }

    fn job(steps: Vec<Step>) -> PipelineJob {
        PipelineJob {
            steps,
            ..PipelineJob::banking()
        }
    }

    fn context(dir: &Path) -> PipelineContext {
        PipelineContext {
            workdir: dir.to_path_buf(),
            base: "main".to_string(),
            vars: Arc::new(MapVarProvider::from([("REGISTRY_TOKEN", "t0k3n")])),
        }
    }

    #[test]
    fn test_top_level_folders() {
        let folders = top_level_folders(
            ["api/app.py", "api/models/user.py", "README.md", "docs/a.md", ""].into_iter(),
        );
        assert_eq!(folders, vec![".", "api", "docs"]);
    }

    #[tokio::test]
    async fn test_successful_job_reports_pending_then_success() {
        let dir = tempfile::TempDir::new().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let runner = PipelineRunner::new(reporter.clone());

        let job = job(vec![
            Step::new("Checkout", StepKind::Checkout { fetch_depth: 0 }),
            Step::new(
                "Token",
                StepKind::Run {
                    command: "test \"$TOKEN\" = t0k3n".to_string(),
                },
            )
            .with_env("TOKEN", "${{ secrets.REGISTRY_TOKEN }}"),
        ]);

        let outcome = runner.run(&job, &context(dir.path())).await.unwrap();
        assert_eq!(outcome.steps.len(), 2);

        let states: Vec<CommitState> = reporter
            .statuses
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.state)
            .collect();
        assert_eq!(states, vec![CommitState::Pending, CommitState::Success]);
    }

    #[tokio::test]
    async fn test_failing_step_stops_the_job() {
        let dir = tempfile::TempDir::new().unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let runner = PipelineRunner::new(reporter.clone());

        let job = job(vec![
            Step::new("Checkout", StepKind::Checkout { fetch_depth: 0 }),
            Step::new(
                "Fail",
                StepKind::Run {
                    command: "exit 3".to_string(),
                },
            ),
            Step::new(
                "Never",
                StepKind::Run {
                    command: "touch never-ran".to_string(),
                },
            ),
        ]);

        let err = runner.run(&job, &context(dir.path())).await.unwrap_err();
        assert!(matches!(err, RunnerError::CommandFailed { exit_code: 3, .. }));
        assert!(!dir.path().join("never-ran").exists());

        let statuses = reporter.statuses.lock().unwrap();
        let last = statuses.last().unwrap();
        assert_eq!(last.state, CommitState::Failure);
        assert!(last.description.as_deref().unwrap().contains("'Fail'"));
    }

    #[tokio::test]
    async fn test_missing_secret_fails_the_step() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = PipelineRunner::new(Arc::new(LogReporter));

        let job = job(vec![
            Step::new("Checkout", StepKind::Checkout { fetch_depth: 0 }),
            Step::new(
                "Push",
                StepKind::Run {
                    command: "true".to_string(),
                },
            )
            .with_env("USER", "${{ secrets.REGISTRY_USERNAME }}"),
        ]);

        let err = runner.run(&job, &context(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("REGISTRY_USERNAME"));
    }

    /// Minimal status endpoint answering one connection per response
    async fn status_server(responses: Vec<(u16, &'static str)>) -> (String, tokio::task::JoinHandle<usize>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut served = 0;
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                // The JSON body ends the request
                while !request.ends_with(b"}") {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                }

                let reply = format!(
                    "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
                served += 1;
            }
            served
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_hosting_reporter_retries_server_errors() {
        let (url, server) = status_server(vec![
            (502, r#"{"message": "Bad gateway"}"#),
            (201, r#"{"id": 1, "state": "pending", "context": "berth/test"}"#),
        ])
        .await;
        let reporter = HostingReporter::new(HostingClient::new(url, "token"), "acme/banking", "abc123");

        reporter
            .report(&CommitStatus::new(CommitState::Pending, "berth/test"))
            .await
            .unwrap();
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_hosting_reporter_does_not_retry_rejected_token() {
        let (url, _server) = status_server(vec![(401, r#"{"message": "Bad credentials"}"#)]).await;
        let reporter = HostingReporter::new(HostingClient::new(url, "expired"), "acme/banking", "abc123");

        let err = reporter
            .report(&CommitStatus::new(CommitState::Pending, "berth/test"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Status(ref e) if e.is_unauthorized()));
    }
}
