//! Host, port and dependency rules over the compose topology

use berth_core::CoreError;
use berth_core::domain::compose::ComposeTopology;
use berth_core::report::{Finding, RuleId};
use std::collections::BTreeSet;
use tracing::debug;

/// Profiles to evaluate: every named profile, or the untagged set when none exist
fn profiles(topology: &ComposeTopology) -> Vec<&str> {
    let profiles: Vec<&str> = topology.profiles().into_iter().collect();
    if profiles.is_empty() { vec![""] } else { profiles }
}

fn profile_label(profile: &str) -> &str {
    if profile.is_empty() { "default" } else { profile }
}

/// `host-reference` and `port-reference`
///
/// Every hostname an active service reads from its environment must
/// resolve to a service active in the same profile, and a port given next
/// to it must be one the target service listens on.
pub fn check_host_references(topology: &ComposeTopology) -> Vec<Finding> {
    let mut findings = Vec::new();

    for profile in profiles(topology) {
        let label = profile_label(profile);

        for (name, service) in topology.services_for_profile(profile) {
            for reference in service.host_references() {
                let subject = format!("compose/{}/{}:{}", label, name, reference.key);

                let Some((target_name, target)) = topology.resolve_host(profile, &reference.host)
                else {
                    let message = if topology.services.contains_key(&reference.host) {
                        format!(
                            "host '{}' is not started by profile '{}'",
                            reference.host, label
                        )
                    } else {
                        format!("host '{}' is not a service of the topology", reference.host)
                    };
                    findings.push(Finding::error(RuleId::HostReference, subject, message));
                    continue;
                };

                let Some(port) = reference.port else {
                    continue;
                };
                let ports = target.container_ports();
                if ports.is_empty() || ports.contains(&port) {
                    continue;
                }

                let subject = match &reference.port_key {
                    Some(key) => format!("compose/{}/{}:{}", label, name, key),
                    None => subject,
                };
                let host_side = target.ports.iter().find(|p| p.host == Some(port));
                let message = match host_side {
                    Some(mapping) => format!(
                        "port {} is the host side of '{}'; siblings connect on {}",
                        port, target_name, mapping.container
                    ),
                    None => format!(
                        "'{}' listens on {}, not {}",
                        target_name,
                        join_ports(&ports),
                        port
                    ),
                };
                findings.push(Finding::error(RuleId::PortReference, subject, message));
            }
        }
    }

    debug!("host-reference: {} findings", findings.len());
    findings
}

/// `dependency-edge`
///
/// Every `depends_on` entry names a service active in the same profile and
/// the dependency graph of each profile is acyclic.
pub fn check_dependency_edges(topology: &ComposeTopology) -> Vec<Finding> {
    let mut findings = Vec::new();

    for profile in profiles(topology) {
        let label = profile_label(profile);
        let active: BTreeSet<&str> = topology
            .services_for_profile(profile)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let mut dangling = false;

        for (name, service) in topology.services_for_profile(profile) {
            for dependency in &service.depends_on {
                if active.contains(dependency.as_str()) {
                    continue;
                }
                dangling = true;
                let message = if topology.services.contains_key(dependency) {
                    format!(
                        "depends on '{}', which profile '{}' does not start",
                        dependency, label
                    )
                } else {
                    format!("depends on unknown service '{}'", dependency)
                };
                findings.push(Finding::error(
                    RuleId::DependencyEdge,
                    format!("compose/{}/{}", label, name),
                    message,
                ));
            }
        }

        // Dangling edges are already reported; ordering only adds cycles
        if dangling {
            continue;
        }
        if let Err(CoreError::DependencyCycle { services, .. }) = topology.start_order(profile) {
            findings.push(Finding::error(
                RuleId::DependencyEdge,
                format!("compose/{}", label),
                format!("dependency cycle between {}", services.join(", ")),
            ));
        }
    }

    debug!("dependency-edge: {} findings", findings.len());
    findings
}

fn join_ports(ports: &BTreeSet<u16>) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::domain::compose::PortMapping;

    #[test]
    fn test_banking_topology_is_consistent() {
        let topology = ComposeTopology::banking();
        assert!(check_host_references(&topology).is_empty());
        assert!(check_dependency_edges(&topology).is_empty());
    }

    #[test]
    fn test_host_from_other_profile() {
        let mut topology = ComposeTopology::banking();
        let app_test = topology.services.get_mut("app_test").unwrap();
        app_test.environment.insert("DB_HOST".to_string(), "db".to_string());

        let findings = check_host_references(&topology);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, RuleId::HostReference);
        assert_eq!(findings[0].subject, "compose/test/app_test:DB_HOST");
        assert!(findings[0].message.contains("not started by profile 'test'"));
    }

    #[test]
    fn test_host_port_instead_of_container_port() {
        let mut topology = ComposeTopology::banking();
        let test_db = topology.services.get_mut("test_db").unwrap();
        test_db.command.clear();
        test_db.ports = vec![PortMapping::new(5439, 5432)];

        let findings = check_host_references(&topology);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, RuleId::PortReference);
        assert_eq!(findings[0].subject, "compose/test/app_test:TEST_DB_PORT");
        assert!(findings[0].message.contains("siblings connect on 5432"));
    }

    #[test]
    fn test_url_reference_to_unknown_host() {
        let mut topology = ComposeTopology::banking();
        let app = topology.services.get_mut("app").unwrap();
        app.environment.insert(
            "CACHE_URL".to_string(),
            "redis://cache:6379/0".to_string(),
        );

        let findings = check_host_references(&topology);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].message.contains("not a service"));
    }

    #[test]
    fn test_dependency_on_inactive_service() {
        let mut topology = ComposeTopology::banking();
        let app_test = topology.services.get_mut("app_test").unwrap();
        app_test.depends_on.push("db".to_string());

        let findings = check_dependency_edges(&topology);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subject, "compose/test/app_test");
    }

    #[test]
    fn test_dependency_cycle() {
        let mut topology = ComposeTopology::banking();
        let redis = topology.services.get_mut("redis").unwrap();
        redis.profiles = vec!["dev".to_string()];
        redis.depends_on.push("app".to_string());

        let findings = check_dependency_edges(&topology);
        // app_test loses redis in the test profile, dev gets a cycle
        assert!(findings.iter().any(|f| f.message.contains("cycle")));
        assert!(findings.iter().any(|f| f.subject == "compose/test/app_test"));
    }
}
