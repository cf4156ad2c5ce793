//! Build entry point domain types
//!
//! Named shortcuts (`setup`, `run`, `test`) expressed as ordered actions
//! against the compose topology. Readiness is an explicit `WaitReady`
//! action rather than a fixed sleep.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::compose::{DEV_PROFILE, TEST_PROFILE};
use crate::error::{CoreError, Result};

/// The set of entry point targets for one repository
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPoints {
    pub targets: Vec<Target>,
}

/// A named target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub actions: Vec<Action>,
}

/// One step of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Start services of a profile (all of them when `services` is empty)
    ComposeUp {
        profile: String,
        #[serde(default)]
        services: Vec<String>,
    },
    /// Stop and remove the services of a profile
    ComposeDown { profile: String },
    /// Block until the service accepts connections
    WaitReady { service: String },
    /// Apply a SQL script to a database service
    Bootstrap { service: String, script: String },
    /// Run a command inside a running service container
    Exec { service: String, command: Vec<String> },
}

impl Action {
    /// Service this action talks to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            Action::WaitReady { service }
            | Action::Bootstrap { service, .. }
            | Action::Exec { service, .. } => Some(service.as_str()),
            Action::ComposeUp { .. } | Action::ComposeDown { .. } => None,
        }
    }
}

/// A target parsed from a Makefile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeTarget {
    pub name: String,
    pub prerequisites: Vec<String>,
    pub recipe: Vec<String>,
}

impl Target {
    pub fn new(name: impl Into<String>, description: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            actions,
        }
    }

    /// Profile started by the first `ComposeUp`, if any
    pub fn profile(&self) -> Option<&str> {
        self.actions.iter().find_map(|a| match a {
            Action::ComposeUp { profile, .. } => Some(profile.as_str()),
            _ => None,
        })
    }
}

impl EntryPoints {
    /// Entry points of the banking service
    ///
    /// `setup` bootstraps the database from a SQL script, `test` runs the
    /// suite inside the running application container.
    pub fn banking() -> Self {
        Self {
            targets: vec![
                Target::new(
                    "setup",
                    "Start the database and apply the bootstrap script",
                    vec![
                        Action::ComposeUp {
                            profile: DEV_PROFILE.to_string(),
                            services: vec!["db".to_string()],
                        },
                        Action::WaitReady {
                            service: "db".to_string(),
                        },
                        Action::Bootstrap {
                            service: "db".to_string(),
                            script: "scripts/init.sql".to_string(),
                        },
                    ],
                ),
                Target::new(
                    "run",
                    "Start the development stack",
                    vec![
                        Action::ComposeUp {
                            profile: DEV_PROFILE.to_string(),
                            services: Vec::new(),
                        },
                        Action::WaitReady {
                            service: "db".to_string(),
                        },
                        Action::WaitReady {
                            service: "redis".to_string(),
                        },
                    ],
                ),
                Target::new(
                    "test",
                    "Start the test stack and run the test suite",
                    vec![
                        Action::ComposeUp {
                            profile: TEST_PROFILE.to_string(),
                            services: Vec::new(),
                        },
                        Action::WaitReady {
                            service: "test_db".to_string(),
                        },
                        Action::WaitReady {
                            service: "redis".to_string(),
                        },
                        Action::Exec {
                            service: "app_test".to_string(),
                            command: vec!["pytest".to_string(), "-v".to_string()],
                        },
                    ],
                ),
            ],
        }
    }

    /// Entry points of the frontend
    pub fn frontend() -> Self {
        Self {
            targets: vec![
                Target::new(
                    "run",
                    "Start the frontend",
                    vec![Action::ComposeUp {
                        profile: DEV_PROFILE.to_string(),
                        services: Vec::new(),
                    }],
                ),
                Target::new(
                    "test",
                    "Run the frontend test suite",
                    vec![
                        Action::ComposeUp {
                            profile: TEST_PROFILE.to_string(),
                            services: Vec::new(),
                        },
                        Action::Exec {
                            service: "frontend".to_string(),
                            command: vec!["npm".to_string(), "test".to_string()],
                        },
                    ],
                ),
            ],
        }
    }

    pub fn target(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();

        for target in &self.targets {
            if !seen.insert(target.name.as_str()) {
                return Err(CoreError::invalid(
                    "entrypoints",
                    format!("target '{}' is defined more than once", target.name),
                ));
            }

            if target.actions.is_empty() {
                return Err(CoreError::invalid(
                    "entrypoints",
                    format!("target '{}' has no actions", target.name),
                ));
            }

            for action in &target.actions {
                if let Action::Exec { command, .. } = action
                    && command.is_empty()
                {
                    return Err(CoreError::invalid(
                        "entrypoints",
                        format!("target '{}' has an empty exec command", target.name),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banking_targets() {
        let entrypoints = EntryPoints::banking();
        assert!(entrypoints.validate().is_ok());
        assert_eq!(entrypoints.names(), vec!["setup", "run", "test"]);

        let test = entrypoints.target("test").unwrap();
        assert_eq!(test.profile(), Some("test"));
        assert!(matches!(test.actions.last(), Some(Action::Exec { .. })));
    }

    #[test]
    fn test_duplicate_target_is_rejected() {
        let mut entrypoints = EntryPoints::banking();
        let run = entrypoints.target("run").unwrap().clone();
        entrypoints.targets.push(run);

        let err = entrypoints.validate().unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_action_service() {
        let wait = Action::WaitReady {
            service: "db".to_string(),
        };
        assert_eq!(wait.service(), Some("db"));

        let up = Action::ComposeDown {
            profile: "dev".to_string(),
        };
        assert_eq!(up.service(), None);
    }

    #[test]
    fn test_action_yaml_shape() {
        let yaml = r#"
- action: wait_ready
  service: db
- action: exec
  service: app_test
  command: [pytest, -v]
"#;
        let actions: Vec<Action> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].service(), Some("db"));
    }
}
