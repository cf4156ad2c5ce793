//! Pipeline job domain types
//!
//! A pull-request-triggered CI job: checkout, runtime provisioning,
//! changed-file computation and a single test command.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CoreError, Result};
use crate::vars::VarProvider;

/// CI job definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub name: String,
    #[serde(default)]
    pub trigger: Trigger,
    #[serde(default = "default_runs_on")]
    pub runs_on: String,
    /// Job-level environment bindings
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Repository secrets the job expects to exist
    #[serde(default)]
    pub secrets: Vec<String>,
    pub steps: Vec<Step>,
}

/// When the job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub pull_request_branches: Vec<String>,
}

impl Default for Trigger {
    fn default() -> Self {
        Self {
            pull_request_branches: vec!["main".to_string()],
        }
    }
}

/// A named step with its own environment bindings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "uses", rename_all = "snake_case")]
pub enum StepKind {
    /// Check out the repository
    Checkout {
        #[serde(default)]
        fetch_depth: u32,
    },
    /// Install a pinned language runtime
    SetupRuntime { language: String, version: String },
    /// Compute the changed files of the pull request
    ChangedFiles {
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// Run a shell command
    Run { command: String },
}

fn default_runs_on() -> String {
    "ubuntu-latest".to_string()
}

fn default_separator() -> String {
    ",".to_string()
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            env: BTreeMap::new(),
            kind,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl PipelineJob {
    /// The banking service CI job
    pub fn banking() -> Self {
        Self {
            name: "test".to_string(),
            trigger: Trigger::default(),
            runs_on: default_runs_on(),
            env: BTreeMap::new(),
            secrets: vec!["REGISTRY_USERNAME".to_string(), "REGISTRY_TOKEN".to_string()],
            steps: vec![
                Step::new("Checkout", StepKind::Checkout { fetch_depth: 0 }),
                Step::new(
                    "Set up Python",
                    StepKind::SetupRuntime {
                        language: "python".to_string(),
                        version: "3.12".to_string(),
                    },
                ),
                Step::new(
                    "Changed folders",
                    StepKind::ChangedFiles {
                        separator: default_separator(),
                    },
                ),
                Step::new(
                    "Run tests",
                    StepKind::Run {
                        command: "make test".to_string(),
                    },
                )
                .with_env("REGISTRY_USERNAME", "${{ secrets.REGISTRY_USERNAME }}")
                .with_env("REGISTRY_TOKEN", "${{ secrets.REGISTRY_TOKEN }}"),
            ],
        }
    }

    /// Returns true if a pull request against `branch` triggers the job
    pub fn triggers_on(&self, branch: &str) -> bool {
        self.trigger
            .pull_request_branches
            .iter()
            .any(|b| b == branch)
    }

    /// The command of the last `Run` step
    pub fn test_command(&self) -> Option<&str> {
        self.steps.iter().rev().find_map(|step| match &step.kind {
            StepKind::Run { command } => Some(command.as_str()),
            _ => None,
        })
    }

    /// Every secret the job references or declares
    pub fn secret_refs(&self) -> BTreeSet<&str> {
        let mut refs: BTreeSet<&str> = self.secrets.iter().map(String::as_str).collect();

        let values = self
            .env
            .values()
            .chain(self.steps.iter().flat_map(|s| s.env.values()));
        for value in values {
            refs.extend(secret_names(value));
        }

        refs
    }

    /// Validates the job structure
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::invalid("pipeline", "job name cannot be empty"));
        }

        if self.trigger.pull_request_branches.is_empty() {
            return Err(CoreError::invalid(
                "pipeline",
                "trigger must name at least one branch",
            ));
        }

        let checkouts: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.kind, StepKind::Checkout { .. }))
            .map(|(i, _)| i)
            .collect();

        let checkout = match checkouts.as_slice() {
            [idx] => *idx,
            [] => return Err(CoreError::invalid("pipeline", "job has no checkout step")),
            _ => {
                return Err(CoreError::invalid(
                    "pipeline",
                    "job has more than one checkout step",
                ));
            }
        };

        let first_run = self
            .steps
            .iter()
            .position(|s| matches!(s.kind, StepKind::Run { .. }));
        match first_run {
            None => Err(CoreError::invalid("pipeline", "job has no run step")),
            Some(idx) if idx < checkout => Err(CoreError::invalid(
                "pipeline",
                format!(
                    "step '{}' runs before the repository is checked out",
                    self.steps[idx].name
                ),
            )),
            Some(_) => Ok(()),
        }
    }
}

/// Extracts `NAME` from every `secrets.NAME` occurrence in a value
fn secret_names(value: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = value;

    while let Some(pos) = rest.find("secrets.") {
        rest = &rest[pos + "secrets.".len()..];
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if end > 0 {
            names.push(&rest[..end]);
        }
        rest = &rest[end..];
    }

    names
}

/// Substitutes `${{ secrets.NAME }}` and `${{ env.NAME }}` expressions from `vars`
///
/// Other expressions are left untouched; a missing secret or variable is
/// an error.
pub fn resolve_expressions(value: &str, vars: &dyn VarProvider) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${{") {
        let Some(len) = rest[start..].find("}}") else {
            break;
        };
        let expr = rest[start + 3..start + len].trim();
        let name = expr
            .strip_prefix("secrets.")
            .or_else(|| expr.strip_prefix("env."));

        out.push_str(&rest[..start]);
        match name {
            Some(name) => {
                let resolved = vars
                    .get(name)
                    .ok_or_else(|| CoreError::MissingVariable(name.to_string()))?;
                out.push_str(&resolved);
            }
            None => out.push_str(&rest[start..start + len + 2]),
        }
        rest = &rest[start + len + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banking_job_is_valid() {
        let job = PipelineJob::banking();
        assert!(job.validate().is_ok());
        assert!(job.triggers_on("main"));
        assert!(!job.triggers_on("develop"));
        assert_eq!(job.test_command(), Some("make test"));
    }

    #[test]
    fn test_secret_refs_collects_step_env() {
        let mut job = PipelineJob::banking();
        job.secrets.clear();
        job.env
            .insert("TOKEN".to_string(), "${{ secrets.EXTRA_TOKEN }}".to_string());

        let refs = job.secret_refs();
        assert!(refs.contains("REGISTRY_USERNAME"));
        assert!(refs.contains("REGISTRY_TOKEN"));
        assert!(refs.contains("EXTRA_TOKEN"));
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn test_run_before_checkout_is_rejected() {
        let mut job = PipelineJob::banking();
        let checkout = job.steps.remove(0);
        job.steps.push(checkout);

        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("before the repository is checked out"));
    }

    #[test]
    fn test_missing_checkout_is_rejected() {
        let mut job = PipelineJob::banking();
        job.steps.remove(0);
        assert!(job.validate().unwrap_err().to_string().contains("no checkout"));
    }

    #[test]
    fn test_empty_trigger_is_rejected() {
        let mut job = PipelineJob::banking();
        job.trigger.pull_request_branches.clear();
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_step_kind_yaml_shape() {
        let yaml = r#"
name: Run tests
uses: run
command: make test
"#;
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            step.kind,
            StepKind::Run {
                command: "make test".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_expressions() {
        let vars = crate::vars::MapVarProvider::from([("REGISTRY_TOKEN", "t0k3n"), ("HOME", "/root")]);

        assert_eq!(
            resolve_expressions("${{ secrets.REGISTRY_TOKEN }}", &vars).unwrap(),
            "t0k3n"
        );
        assert_eq!(
            resolve_expressions("${{env.HOME}}/cache and ${{ github.sha }}", &vars).unwrap(),
            "/root/cache and ${{ github.sha }}"
        );
        assert!(resolve_expressions("${{ secrets.MISSING }}", &vars).is_err());
    }
}
