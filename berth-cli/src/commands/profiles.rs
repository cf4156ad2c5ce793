//! Profiles command handler
//!
//! Lists the compose profiles of the stack, their services in start
//! order and the targets that use them.

use anyhow::Result;
use berth_core::domain::compose::{ComposeService, ComposeTopology};
use berth_core::domain::entrypoint::EntryPoints;
use colored::*;

use crate::config::Config;

/// Handle the profiles command
pub fn handle_profiles_command(config: &Config) -> Result<()> {
    let loaded = config.load()?;
    let stack = &loaded.stack;
    let profiles = stack.compose.profiles();

    if profiles.is_empty() {
        println!("{}", "No profiles defined; every service is always active.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Stack '{}': {} profile(s)", stack.name, profiles.len()).bold()
    );
    println!();

    let apps = stack.app_compose_services();
    for profile in profiles {
        print_profile(&stack.compose, &stack.entrypoints, &apps, profile);
    }

    Ok(())
}

fn print_profile(
    topology: &ComposeTopology,
    entrypoints: &EntryPoints,
    apps: &[&str],
    profile: &str,
) {
    println!("  {} {}", "▸".cyan(), profile.bold());

    match topology.start_order(profile) {
        Ok(order) => {
            for name in order {
                if let Some(service) = topology.service(&name) {
                    let marker = if apps.contains(&name.as_str()) { "app" } else { "" };
                    println!(
                        "    {:<12} {}{}",
                        name,
                        format!("{:<4}", marker).green(),
                        describe(service).dimmed()
                    );
                }
            }
        }
        Err(e) => println!("    {} {}", "✗".red(), e),
    }

    let targets = targets_for(entrypoints, profile);
    if !targets.is_empty() {
        println!("    {} {}", "targets:".dimmed(), targets.join(", "));
    }
    println!();
}

fn describe(service: &ComposeService) -> String {
    let source = match (&service.image, &service.build) {
        (Some(image), _) => image.clone(),
        (None, Some(build)) => format!("build {}", build.context),
        (None, None) => "-".to_string(),
    };

    let ports: Vec<String> = service
        .ports
        .iter()
        .map(|p| match p.host {
            Some(host) => format!("{}:{}", host, p.container),
            None => p.container.to_string(),
        })
        .collect();

    if ports.is_empty() {
        source
    } else {
        format!("{} [{}]", source, ports.join(", "))
    }
}

fn targets_for<'a>(entrypoints: &'a EntryPoints, profile: &str) -> Vec<&'a str> {
    entrypoints
        .targets
        .iter()
        .filter(|t| t.profile() == Some(profile))
        .map(|t| t.name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::domain::stack::Stack;

    #[test]
    fn test_targets_for_profile() {
        let stack = Stack::banking();
        assert_eq!(targets_for(&stack.entrypoints, "test"), vec!["test"]);
    }

    #[test]
    fn test_describe_service() {
        let stack = Stack::banking();
        let redis = stack.compose.service("redis").unwrap();
        assert!(describe(redis).contains("6379"));
    }
}
