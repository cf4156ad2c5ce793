//! CI workflow rendering and parsing
//!
//! Maps a `PipelineJob` to a GitHub-Actions style workflow triggered by
//! pull requests, and loads such a workflow back.

use berth_core::domain::pipeline::{PipelineJob, Step, StepKind, Trigger};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{RenderError, Result};

const CHECKOUT_ACTION: &str = "actions/checkout@v4";
const CHANGED_FILES_ACTION: &str = "tj-actions/changed-files@v44";

#[derive(Debug, Serialize, Deserialize)]
struct Workflow {
    name: String,
    on: On,
    jobs: BTreeMap<String, Job>,
}

#[derive(Debug, Serialize, Deserialize)]
struct On {
    pull_request: PullRequest,
}

#[derive(Debug, Serialize, Deserialize)]
struct PullRequest {
    branches: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Job {
    runs_on: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    steps: Vec<WorkflowStep>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkflowStep {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uses: Option<String>,
    #[serde(default, rename = "with", skip_serializing_if = "Option::is_none")]
    with_args: Option<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
}

/// Renders the workflow YAML for `job`
pub fn render(job: &PipelineJob) -> Result<String> {
    let steps = job.steps.iter().map(to_workflow_step).collect();

    let workflow = Workflow {
        name: job.name.clone(),
        on: On {
            pull_request: PullRequest {
                branches: job.trigger.pull_request_branches.clone(),
            },
        },
        jobs: BTreeMap::from([(
            job.name.clone(),
            Job {
                runs_on: job.runs_on.clone(),
                env: job.env.clone(),
                steps,
            },
        )]),
    };

    Ok(serde_yaml::to_string(&workflow)?)
}

fn to_workflow_step(step: &Step) -> WorkflowStep {
    let mut out = WorkflowStep {
        name: step.name.clone(),
        env: step.env.clone(),
        ..Default::default()
    };

    match &step.kind {
        StepKind::Checkout { fetch_depth } => {
            out.uses = Some(CHECKOUT_ACTION.to_string());
            out.with_args = Some(mapping([("fetch-depth", Value::from(*fetch_depth))]));
        }
        StepKind::SetupRuntime { language, version } => {
            let major = if language == "python" { "v5" } else { "v4" };
            out.uses = Some(format!("actions/setup-{}@{}", language, major));
            let key = format!("{}-version", language);
            out.with_args = Some(mapping([(key.as_str(), Value::from(version.clone()))]));
        }
        StepKind::ChangedFiles { separator } => {
            out.id = Some("changed".to_string());
            out.uses = Some(CHANGED_FILES_ACTION.to_string());
            out.with_args = Some(mapping([
                ("dir_names", Value::from(true)),
                ("dir_names_max_depth", Value::from(1)),
                ("separator", Value::from(separator.clone())),
            ]));
        }
        StepKind::Run { command } => {
            out.run = Some(command.clone());
        }
    }

    out
}

fn mapping<const N: usize>(pairs: [(&str, Value); N]) -> Mapping {
    pairs
        .into_iter()
        .map(|(k, v)| (Value::from(k), v))
        .collect()
}

/// Loads a workflow file back into a `PipelineJob`
///
/// Uses the first job. Steps using unknown actions are skipped.
pub fn parse(yaml: &str) -> Result<PipelineJob> {
    let workflow: Workflow = serde_yaml::from_str(yaml)?;

    let (job_name, job) = workflow
        .jobs
        .into_iter()
        .next()
        .ok_or_else(|| RenderError::parse("workflow", 0, "workflow defines no jobs"))?;

    let mut steps = Vec::with_capacity(job.steps.len());
    for step in job.steps {
        match from_workflow_step(&step) {
            Some(kind) => steps.push(Step {
                name: step.name,
                env: step.env,
                kind,
            }),
            None => warn!("Skipping workflow step '{}' with unknown action", step.name),
        }
    }

    Ok(PipelineJob {
        name: job_name,
        trigger: Trigger {
            pull_request_branches: workflow.on.pull_request.branches,
        },
        runs_on: job.runs_on,
        env: job.env,
        secrets: Vec::new(),
        steps,
    })
}

fn from_workflow_step(step: &WorkflowStep) -> Option<StepKind> {
    if let Some(command) = &step.run {
        return Some(StepKind::Run {
            command: command.clone(),
        });
    }

    let uses = step.uses.as_deref()?;

    if uses.starts_with("actions/checkout@") {
        let fetch_depth = with_arg(step, "fetch-depth")
            .and_then(Value::as_u64)
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or(1);
        return Some(StepKind::Checkout { fetch_depth });
    }

    if let Some(rest) = uses.strip_prefix("actions/setup-") {
        let language = rest.split('@').next().unwrap_or(rest).to_string();
        let version = with_arg(step, &format!("{}-version", language))
            .map(yaml_scalar)
            .unwrap_or_default();
        return Some(StepKind::SetupRuntime { language, version });
    }

    if uses.contains("changed-files") {
        let separator = with_arg(step, "separator")
            .and_then(Value::as_str)
            .unwrap_or(",")
            .to_string();
        return Some(StepKind::ChangedFiles { separator });
    }

    None
}

fn with_arg<'a>(step: &'a WorkflowStep, key: &str) -> Option<&'a Value> {
    step.with_args.as_ref().and_then(|w| w.get(key))
}

fn yaml_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_banking_workflow() {
        let yaml = render(&PipelineJob::banking()).unwrap();
        let doc: Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["on"]["pull_request"]["branches"][0], "main");

        let steps = doc["jobs"]["test"]["steps"].as_sequence().unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0]["uses"], CHECKOUT_ACTION);
        assert_eq!(steps[1]["uses"], "actions/setup-python@v5");
        assert_eq!(steps[1]["with"]["python-version"], "3.12");
        assert_eq!(steps[2]["id"], "changed");
        assert_eq!(steps[3]["run"], "make test");
        assert_eq!(
            steps[3]["env"]["REGISTRY_TOKEN"],
            "${{ secrets.REGISTRY_TOKEN }}"
        );
    }

    #[test]
    fn test_parse_workflow() {
        let yaml = r#"
name: ci
on:
  pull_request:
    branches: [main, release]
jobs:
  build:
    runs-on: ubuntu-22.04
    steps:
      - name: Checkout
        uses: actions/checkout@v4
      - name: Python
        uses: actions/setup-python@v5
        with:
          python-version: 3.11
      - name: Cache
        uses: actions/cache@v4
      - name: Test
        run: make test
"#;
        let job = parse(yaml).unwrap();
        assert_eq!(job.name, "build");
        assert!(job.triggers_on("release"));
        assert_eq!(job.runs_on, "ubuntu-22.04");
        assert_eq!(job.steps.len(), 3);
        assert_eq!(
            job.steps[1].kind,
            StepKind::SetupRuntime {
                language: "python".to_string(),
                version: "3.11".to_string()
            }
        );
        assert_eq!(job.test_command(), Some("make test"));
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_parse_workflow_without_jobs() {
        let yaml = "name: ci\non:\n  pull_request:\n    branches: [main]\njobs: {}\n";
        assert!(parse(yaml).is_err());
    }
}
