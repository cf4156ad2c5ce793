//! CI command handler
//!
//! Runs the stack's pipeline job against the local checkout and posts
//! commit statuses when repository, commit and token are all known. The
//! final status is read back from the platform after the job.

use anyhow::{Context, Result};
use berth_client::HostingClient;
use berth_core::EnvVarProvider;
use berth_core::dto::status::{CommitState, StatusRecord};
use berth_runner::pipeline::{HostingReporter, LogReporter, status_context};
use berth_runner::{PipelineContext, PipelineRunner, StatusReporter};
use colored::*;
use std::sync::Arc;
use tracing::warn;

/// Commit statuses are posted for
struct StatusTarget {
    client: HostingClient,
    repo: String,
    sha: String,
}

use crate::config::Config;

/// Handle the ci command
///
/// # Arguments
/// * `base` - Branch the pull request targets
/// * `repo` - Repository as owner/name
/// * `sha` - Commit statuses are posted for
/// * `hosting_url` - Hosting platform API base URL
/// * `token` - API token
pub async fn handle_ci_command(
    base: String,
    repo: Option<String>,
    sha: Option<String>,
    hosting_url: String,
    token: Option<String>,
    config: &Config,
) -> Result<()> {
    let loaded = config.load()?;
    let job = &loaded.stack.pipeline;

    if !job.triggers_on(&base) {
        println!(
            "{}",
            format!(
                "Job '{}' does not run for pull requests into '{}'",
                job.name, base
            )
            .yellow()
        );
        return Ok(());
    }

    let target = status_target(repo, sha, hosting_url, token);
    let reporter: Arc<dyn StatusReporter> = match &target {
        Some(t) => Arc::new(HostingReporter::new(
            t.client.clone(),
            t.repo.clone(),
            t.sha.clone(),
        )),
        None => Arc::new(LogReporter),
    };
    let ctx = PipelineContext {
        workdir: loaded.root.clone(),
        base,
        vars: Arc::new(EnvVarProvider),
    };

    let result = PipelineRunner::new(reporter).run(job, &ctx).await;
    if let Some(target) = &target {
        print_posted_status(target, &status_context(job)).await;
    }
    let outcome = result.with_context(|| format!("Pipeline job '{}' failed", job.name))?;

    if !outcome.changed_folders.is_empty() {
        println!(
            "{} {}",
            "Changed folders:".bold(),
            outcome.changed_folders.join(", ")
        );
    }
    for step in &outcome.steps {
        println!(
            "  {} {} {}",
            "✓".green(),
            step.name,
            format!("({:.1?})", step.elapsed).dimmed()
        );
        if let Some(output) = &step.output {
            print!("{}", output.stdout);
        }
    }
    println!(
        "{}",
        format!("✓ Job '{}' passed", job.name).green().bold()
    );

    Ok(())
}

/// The hosting platform target when every coordinate is known; statuses
/// are only logged otherwise
fn status_target(
    repo: Option<String>,
    sha: Option<String>,
    hosting_url: String,
    token: Option<String>,
) -> Option<StatusTarget> {
    match (repo, sha, token) {
        (Some(repo), Some(sha), Some(token)) => Some(StatusTarget {
            client: HostingClient::new(hosting_url, token),
            repo,
            sha,
        }),
        (None, None, None) => None,
        _ => {
            warn!("Repository, commit and token are all needed to post statuses; logging them instead");
            None
        }
    }
}

/// Reads the job's newest status back from the platform
async fn print_posted_status(target: &StatusTarget, context: &str) {
    match target.client.list_statuses(&target.repo, &target.sha).await {
        Ok(records) => match latest(&records, context) {
            Some(record) => println!(
                "{} {} is {} on {}@{}",
                "Status".bold(),
                record.context,
                colored_state(record.state),
                target.repo,
                target.sha
            ),
            None => warn!("{} has no '{}' status on {}", target.repo, context, target.sha),
        },
        Err(e) if e.is_unauthorized() => warn!(
            "Token cannot read statuses from {}: {}",
            target.client.base_url(),
            e
        ),
        Err(e) => warn!("Failed to read back statuses: {}", e),
    }
}

/// Newest record for `context`; the platform lists statuses newest first
fn latest<'a>(records: &'a [StatusRecord], context: &str) -> Option<&'a StatusRecord> {
    records.iter().find(|r| r.context == context)
}

fn colored_state(state: CommitState) -> ColoredString {
    let text = state.to_string();
    match state {
        CommitState::Success => text.green(),
        CommitState::Pending => text.yellow(),
        CommitState::Failure | CommitState::Error => text.red(),
    }
}
