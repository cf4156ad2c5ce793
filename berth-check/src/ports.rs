//! `container-port`: image, compose and values agree on the application port

use berth_core::domain::stack::Stack;
use berth_core::report::{Finding, RuleId};

/// The image's `EXPOSE`, the container port of every app service and
/// `containerPort` in the values record must be the same number.
pub fn check_container_ports(stack: &Stack) -> Vec<Finding> {
    let mut findings = Vec::new();
    let exposed = stack.image.exposed_port();

    if stack.values.container_port != exposed {
        findings.push(Finding::error(
            RuleId::ContainerPort,
            "values:containerPort",
            format!(
                "containerPort is {} but the image exposes {}",
                stack.values.container_port, exposed
            ),
        ));
    }

    for name in &stack.app_services {
        let Some(service) = stack.compose.service(name) else {
            findings.push(Finding::warning(
                RuleId::ContainerPort,
                format!("compose/{}", name),
                "app service is not part of the topology",
            ));
            continue;
        };

        let ports = service.container_ports();
        if !ports.contains(&exposed) {
            let declared = if ports.is_empty() {
                "no ports".to_string()
            } else {
                ports
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            findings.push(Finding::error(
                RuleId::ContainerPort,
                format!("compose/{}", name),
                format!("image exposes {} but the service maps {}", exposed, declared),
            ));
        }
    }

    findings
}
