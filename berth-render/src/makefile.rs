//! Makefile rendering and parsing
//!
//! Each entry point target becomes a phony make target whose recipe lines
//! follow the target's actions in order.

use berth_core::domain::entrypoint::{Action, EntryPoints, MakeTarget, Target};
use std::fmt::Write;

use crate::error::{RenderError, Result};

/// Options for Makefile rendering
#[derive(Debug, Clone)]
pub struct MakefileOptions {
    /// Default value of the `COMPOSE` variable
    pub compose: String,
    /// Command invoking berth itself, used for readiness waits
    pub berth: String,
}

impl Default for MakefileOptions {
    fn default() -> Self {
        Self {
            compose: "docker compose".to_string(),
            berth: "berth".to_string(),
        }
    }
}

/// Renders a Makefile for `entrypoints`
pub fn render(entrypoints: &EntryPoints, options: &MakefileOptions) -> Result<String> {
    let mut out = String::new();

    writeln!(out, "COMPOSE ?= {}", options.compose).ok();
    writeln!(out, "BERTH ?= {}", options.berth).ok();
    out.push('\n');
    writeln!(out, ".PHONY: {}", entrypoints.names().join(" ")).ok();

    for target in &entrypoints.targets {
        out.push('\n');
        if let Some(description) = &target.description {
            writeln!(out, "## {}", description).ok();
        }
        writeln!(out, "{}:", target.name).ok();
        for line in recipe(target)? {
            writeln!(out, "\t{}", line).ok();
        }
    }

    Ok(out)
}

/// Recipe lines of one target
pub fn recipe(target: &Target) -> Result<Vec<String>> {
    let profile_flag = target
        .profile()
        .map(|p| format!(" --profile {}", p))
        .unwrap_or_default();

    target
        .actions
        .iter()
        .map(|action| {
            Ok(match action {
                Action::ComposeUp { profile, services } => {
                    let mut line = format!("$(COMPOSE) --profile {} up -d", profile);
                    for service in services {
                        line.push(' ');
                        line.push_str(service);
                    }
                    line
                }
                Action::ComposeDown { profile } => {
                    format!("$(COMPOSE) --profile {} down", profile)
                }
                Action::WaitReady { service } => match target.profile() {
                    Some(profile) => format!("$(BERTH) wait --profile {} {}", profile, service),
                    None => format!("$(BERTH) wait {}", service),
                },
                Action::Bootstrap { service, script } => format!(
                    "$(COMPOSE){} exec -T {} sh -c 'psql -v ON_ERROR_STOP=1 -U \"$$POSTGRES_USER\" -d \"$$POSTGRES_DB\"' < {}",
                    profile_flag, service, script
                ),
                Action::Exec { service, command } => {
                    if command.iter().any(|arg| arg.contains('\n')) {
                        return Err(RenderError::parse(
                            "Makefile",
                            0,
                            format!("target '{}' has a multi-line command", target.name),
                        ));
                    }
                    format!(
                        "$(COMPOSE){} exec -T {} {}",
                        profile_flag,
                        service,
                        command.join(" ")
                    )
                }
            })
        })
        .collect()
}

/// Parses the rules of a Makefile
///
/// Variable assignments, special targets (`.PHONY`) and pattern rules are
/// skipped. Targets declared on one line (`a b: c`) are split.
pub fn parse(src: &str) -> Result<Vec<MakeTarget>> {
    let mut targets: Vec<MakeTarget> = Vec::new();
    // Indices of the targets the current recipe belongs to
    let mut current: Vec<usize> = Vec::new();

    for (idx, line) in src.lines().enumerate() {
        if let Some(command) = line.strip_prefix('\t') {
            let command = command.trim();
            if command.is_empty() || command.starts_with('#') {
                continue;
            }
            if current.is_empty() {
                return Err(RenderError::parse(
                    "Makefile",
                    idx + 1,
                    "recipe line outside of a rule",
                ));
            }
            for &i in &current {
                targets[i].recipe.push(command.to_string());
            }
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        current.clear();
        if is_assignment(trimmed) {
            continue;
        }

        let Some((names, rest)) = trimmed.split_once(':') else {
            continue;
        };
        // "a: b ; cmd" carries an inline recipe
        let (prerequisites, inline) = match rest.split_once(';') {
            Some((p, cmd)) => (p, Some(cmd.trim())),
            None => (rest, None),
        };
        let prerequisites: Vec<String> = prerequisites
            .trim_start_matches(':')
            .split_whitespace()
            .map(str::to_string)
            .collect();

        for name in names.split_whitespace() {
            if name.starts_with('.') || name.contains('%') {
                continue;
            }
            targets.push(MakeTarget {
                name: name.to_string(),
                prerequisites: prerequisites.clone(),
                recipe: inline
                    .filter(|cmd| !cmd.is_empty())
                    .map(|cmd| vec![cmd.to_string()])
                    .unwrap_or_default(),
            });
            current.push(targets.len() - 1);
        }
    }

    Ok(targets)
}

fn is_assignment(line: &str) -> bool {
    let first_colon = line.find(':');
    let first_equals = line.find('=');

    match (first_colon, first_equals) {
        (_, None) => line.starts_with("export ") || line.starts_with("include "),
        (None, Some(_)) => true,
        // "X := y" and "X ::= y"
        (Some(c), Some(e)) => e <= c + 2 && line[c..e].chars().all(|ch| ch == ':'),
    }
}
