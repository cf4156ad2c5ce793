//! Container engine driver
//!
//! Drives a compose-capable engine (docker or podman) through its CLI:
//! - Starting and stopping the services of a profile
//! - Executing commands inside running service containers
//! - Reporting the engine version
//!
//! Child output is read line by line while the command runs, so long
//! `up` and `exec` calls show progress in the logs.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::EngineKind;
use crate::error::{Result, RunnerError};

/// Captured result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a non-zero exit into `RunnerError::CommandFailed`
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RunnerError::CommandFailed {
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Pipe a line of child output was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Runs `command` to completion, handing every output line to `log` as
/// it arrives and collecting both streams
pub async fn run_streaming(
    mut command: Command,
    program: &str,
    log: impl Fn(OutputStream, &str),
) -> Result<ExecOutput> {
    let spawn_error = |source: std::io::Error| RunnerError::Spawn {
        program: program.to_string(),
        source,
    };

    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_error)?;

    let (stdout, stderr) = tokio::join!(
        collect_lines(child.stdout.take(), |line| log(OutputStream::Stdout, line)),
        collect_lines(child.stderr.take(), |line| log(OutputStream::Stderr, line)),
    );
    let status = child.wait().await.map_err(spawn_error)?;

    Ok(ExecOutput {
        stdout: stdout.map_err(spawn_error)?,
        stderr: stderr.map_err(spawn_error)?,
        exit_code: status.code().unwrap_or(-1),
    })
}

async fn collect_lines(
    pipe: Option<impl AsyncRead + Unpin>,
    log: impl Fn(&str),
) -> std::io::Result<String> {
    let mut collected = String::new();
    let Some(pipe) = pipe else {
        return Ok(collected);
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        log(line.trim_end_matches(['\n', '\r']));
        collected.push_str(&line);
    }

    Ok(collected)
}

/// Operations the runner needs from a container engine
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Starts `services` of `profile` detached (every service when empty)
    async fn up(&self, profile: &str, services: &[String]) -> Result<()>;

    /// Stops and removes the services of `profile`
    async fn down(&self, profile: &str) -> Result<()>;

    /// Runs `command` inside the running container of `service`
    ///
    /// A non-zero exit is returned in `ExecOutput`, not as an error.
    async fn exec(&self, profile: &str, service: &str, command: &[String]) -> Result<ExecOutput>;

    /// Engine version string
    async fn version(&self) -> Result<String>;
}

/// `docker compose` / `podman compose` driver
#[derive(Debug, Clone)]
pub struct ComposeEngine {
    kind: EngineKind,
    compose_file: Option<PathBuf>,
    project_name: Option<String>,
    project_dir: Option<PathBuf>,
    workdir: PathBuf,
}

impl ComposeEngine {
    /// Creates a driver running in `workdir`
    ///
    /// # Arguments
    /// * `kind` - Engine binary to invoke
    /// * `workdir` - Directory holding the compose file
    pub fn new(kind: EngineKind, workdir: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            compose_file: None,
            project_name: None,
            project_dir: None,
            workdir: workdir.into(),
        }
    }

    pub fn with_compose_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.compose_file = Some(path.into());
        self
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    /// Directory relative paths in the compose file resolve against, for
    /// compose files kept outside the project
    pub fn with_project_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Arguments preceding every compose subcommand
    pub fn base_args(&self, profile: Option<&str>) -> Vec<String> {
        let mut args = vec!["compose".to_string()];
        if let Some(file) = &self.compose_file {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        if let Some(dir) = &self.project_dir {
            args.push("--project-directory".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(project) = &self.project_name {
            args.push("-p".to_string());
            args.push(project.clone());
        }
        if let Some(profile) = profile {
            args.push("--profile".to_string());
            args.push(profile.to_string());
        }
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<ExecOutput> {
        let program = self.kind.program();
        let shown = format!("{} {}", program, args.join(" "));
        debug!("Running {}", shown);

        let mut command = Command::new(program);
        command.args(&args).current_dir(&self.workdir);

        run_streaming(command, program, |stream, line| {
            debug!("{} {}: {}", program, stream, line)
        })
        .await
    }

    async fn run_checked(&self, args: Vec<String>) -> Result<ExecOutput> {
        let shown = format!("{} {}", self.kind.program(), args.join(" "));
        self.run(args).await?.check(&shown)
    }
}

#[async_trait]
impl ContainerEngine for ComposeEngine {
    async fn up(&self, profile: &str, services: &[String]) -> Result<()> {
        info!("Starting profile '{}' {:?}", profile, services);

        let mut args = self.base_args(Some(profile));
        args.push("up".to_string());
        args.push("-d".to_string());
        args.extend(services.iter().cloned());

        self.run_checked(args).await?;
        Ok(())
    }

    async fn down(&self, profile: &str) -> Result<()> {
        info!("Stopping profile '{}'", profile);

        let mut args = self.base_args(Some(profile));
        args.push("down".to_string());

        self.run_checked(args).await?;
        Ok(())
    }

    async fn exec(&self, profile: &str, service: &str, command: &[String]) -> Result<ExecOutput> {
        debug!("Executing in {}: {:?}", service, command);

        let mut args = self.base_args(Some(profile));
        args.push("exec".to_string());
        args.push("-T".to_string());
        args.push(service.to_string());
        args.extend(command.iter().cloned());

        self.run(args).await
    }

    async fn version(&self) -> Result<String> {
        let mut args = self.base_args(None);
        args.push("version".to_string());

        let output = self.run_checked(args).await?;
        Ok(output.stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_args() {
        let engine = ComposeEngine::new(EngineKind::Podman, ".")
            .with_compose_file("docker-compose.yml")
            .with_project_name("banking");

        assert_eq!(
            engine.base_args(Some("test")),
            vec![
                "compose",
                "-f",
                "docker-compose.yml",
                "-p",
                "banking",
                "--profile",
                "test"
            ]
        );
        assert_eq!(
            ComposeEngine::new(EngineKind::Docker, ".").base_args(None),
            vec!["compose"]
        );

        let generated = ComposeEngine::new(EngineKind::Docker, "/srv/banking")
            .with_compose_file("/srv/banking/.berth/docker-compose.yml")
            .with_project_directory("/srv/banking");
        assert_eq!(
            generated.base_args(None),
            vec![
                "compose",
                "-f",
                "/srv/banking/.berth/docker-compose.yml",
                "--project-directory",
                "/srv/banking"
            ]
        );
    }

    #[tokio::test]
    async fn test_run_streaming_collects_lines_in_order() {
        let seen = std::sync::Mutex::new(Vec::new());
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg("echo one; echo warn >&2; echo two; printf tail; exit 4");

        let output = run_streaming(command, "sh", |stream, line| {
            seen.lock().unwrap().push(format!("{}: {}", stream, line))
        })
        .await
        .unwrap();

        assert_eq!(output.stdout, "one\ntwo\ntail");
        assert_eq!(output.stderr, "warn\n");
        assert_eq!(output.exit_code, 4);

        let seen = seen.into_inner().unwrap();
        let stdout: Vec<&String> = seen.iter().filter(|l| l.starts_with("stdout")).collect();
        assert_eq!(stdout, vec!["stdout: one", "stdout: two", "stdout: tail"]);
        assert!(seen.contains(&"stderr: warn".to_string()));
    }

    #[tokio::test]
    async fn test_run_streaming_missing_program() {
        let err = run_streaming(Command::new("berth-no-such-binary"), "berth-no-such-binary", |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[test]
    fn test_exec_output_check() {
        let ok = ExecOutput {
            stdout: "ok".to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(ok.check("true").is_ok());

        let failed = ExecOutput {
            stdout: String::new(),
            stderr: "boom\n".to_string(),
            exit_code: 2,
        };
        match failed.check("pytest") {
            Err(RunnerError::CommandFailed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
