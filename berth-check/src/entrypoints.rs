//! Entry point rules: readiness ordering and Makefile variants

use berth_core::domain::compose::ComposeTopology;
use berth_core::domain::entrypoint::{Action, MakeTarget, Target};
use berth_core::domain::stack::Stack;
use berth_core::report::{Finding, RuleId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// `readiness`
///
/// Any `Exec` or `Bootstrap` must come after a `WaitReady` for every
/// database it needs: the bootstrap target itself, or the databases the
/// exec service depends on. Actions must also name services the target's
/// profile starts.
pub fn check_readiness(stack: &Stack) -> Vec<Finding> {
    let mut findings = Vec::new();

    for target in &stack.entrypoints.targets {
        findings.extend(check_target(target, &stack.compose));
    }

    findings
}

fn check_target(target: &Target, topology: &ComposeTopology) -> Vec<Finding> {
    let mut findings = Vec::new();
    let subject = format!("entrypoints/{}", target.name);
    let profile = target.profile();
    let mut waited: BTreeSet<&str> = BTreeSet::new();

    for action in &target.actions {
        let Some(service_name) = action.service() else {
            continue;
        };

        let Some(service) = topology.service(service_name) else {
            findings.push(Finding::error(
                RuleId::Readiness,
                subject.clone(),
                format!("'{}' is not a service of the topology", service_name),
            ));
            continue;
        };

        if let Some(profile) = profile
            && !service.in_profile(profile)
        {
            findings.push(Finding::error(
                RuleId::Readiness,
                subject.clone(),
                format!("'{}' is not started by profile '{}'", service_name, profile),
            ));
        }

        let needed: Vec<&str> = match action {
            Action::WaitReady { .. } => {
                waited.insert(service_name);
                continue;
            }
            Action::Bootstrap { .. } => vec![service_name],
            Action::Exec { .. } => service
                .depends_on
                .iter()
                .map(String::as_str)
                .filter(|dep| topology.service(dep).is_some_and(|d| d.is_database()))
                .collect(),
            Action::ComposeUp { .. } | Action::ComposeDown { .. } => continue,
        };

        for database in needed {
            if !waited.contains(database) {
                findings.push(Finding::error(
                    RuleId::Readiness,
                    subject.clone(),
                    format!(
                        "'{}' runs before waiting for '{}' to accept connections",
                        describe(action),
                        database
                    ),
                ));
            }
        }
    }

    findings
}

fn describe(action: &Action) -> String {
    match action {
        Action::Bootstrap { script, .. } => format!("bootstrap {}", script),
        Action::Exec { command, .. } => command.join(" "),
        _ => String::new(),
    }
}

/// `entrypoint-conflict`: a target defined by more than one Makefile variant
pub fn check_makefile_conflicts(makefiles: &[(PathBuf, Vec<MakeTarget>)]) -> Vec<Finding> {
    let mut defined_in: BTreeMap<&str, Vec<String>> = BTreeMap::new();

    for (path, targets) in makefiles {
        let file = file_name(path);
        for target in targets {
            let files = defined_in.entry(target.name.as_str()).or_default();
            if !files.contains(&file) {
                files.push(file.clone());
            }
        }
    }

    defined_in
        .into_iter()
        .filter(|(_, files)| files.len() > 1)
        .map(|(target, files)| {
            Finding::error(
                RuleId::EntrypointConflict,
                format!("make/{}", target),
                format!(
                    "target '{}' is defined by {}; keep one authoritative Makefile",
                    target,
                    files.join(" and ")
                ),
            )
        })
        .collect()
}

/// `readiness` for Makefiles: a `sleep` used to wait for a service
pub fn check_makefile_sleeps(makefiles: &[(PathBuf, Vec<MakeTarget>)]) -> Vec<Finding> {
    let mut findings = Vec::new();

    for (path, targets) in makefiles {
        for target in targets {
            for line in &target.recipe {
                let command = line.trim_start_matches(['@', '-', '+']);
                if command.split_whitespace().next() == Some("sleep") {
                    findings.push(Finding::warning(
                        RuleId::Readiness,
                        format!("{}:{}", file_name(path), target.name),
                        format!("'{}' waits a fixed time; use `berth wait <service>`", line),
                    ));
                }
            }
        }
    }

    findings
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(name: &str, recipe: &[&str]) -> MakeTarget {
        MakeTarget {
            name: name.to_string(),
            prerequisites: Vec::new(),
            recipe: recipe.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_banking_entrypoints_wait_for_databases() {
        assert!(check_readiness(&Stack::banking()).is_empty());
    }

    #[test]
    fn test_exec_without_wait() {
        let mut stack = Stack::banking();
        let test = stack
            .entrypoints
            .targets
            .iter_mut()
            .find(|t| t.name == "test")
            .unwrap();
        test.actions
            .retain(|a| !matches!(a, Action::WaitReady { service } if service == "test_db"));

        let findings = check_readiness(&stack);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subject, "entrypoints/test");
        assert!(findings[0].message.contains("'test_db'"));
    }

    #[test]
    fn test_bootstrap_before_wait() {
        let mut stack = Stack::banking();
        let setup = &mut stack.entrypoints.targets[0];
        setup.actions.swap(1, 2);

        let findings = check_readiness(&stack);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("bootstrap scripts/init.sql"));
    }

    #[test]
    fn test_action_outside_profile() {
        let mut stack = Stack::banking();
        let run = &mut stack.entrypoints.targets[1];
        run.actions.push(Action::WaitReady {
            service: "test_db".to_string(),
        });

        let findings = check_readiness(&stack);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("not started by profile 'dev'"));
    }

    #[test]
    fn test_conflicting_makefiles() {
        let makefiles = vec![
            (
                PathBuf::from("/repo/Makefile"),
                vec![make("setup", &["docker compose up -d"]), make("run", &[])],
            ),
            (
                PathBuf::from("/repo/Makefile.test"),
                vec![make("setup", &["docker compose up -d db"])],
            ),
        ];

        let findings = check_makefile_conflicts(&makefiles);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subject, "make/setup");
        assert!(findings[0].message.contains("Makefile and Makefile.test"));
    }

    #[test]
    fn test_sleep_is_flagged() {
        let makefiles = vec![(
            PathBuf::from("Makefile"),
            vec![make("setup", &["docker compose up -d db", "@sleep 5", "psql -f init.sql"])],
        )];

        let findings = check_makefile_sleeps(&makefiles);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subject, "Makefile:setup");
    }
}
