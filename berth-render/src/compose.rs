//! Compose file rendering and parsing
//!
//! Rendering emits the short syntax only. Parsing accepts the variants
//! hand-written compose files use: environment as a map or a `KEY=value`
//! list, long-form ports, `depends_on` with conditions, and so on.

use berth_core::domain::compose::{
    BuildContext, ComposeService, ComposeTopology, PortMapping, RestartPolicy,
};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::{RenderError, Result};

#[derive(Serialize)]
struct ComposeFile<'a> {
    services: &'a BTreeMap<String, ComposeService>,
}

/// Renders the compose YAML for `topology`
pub fn render(topology: &ComposeTopology) -> Result<String> {
    Ok(serde_yaml::to_string(&ComposeFile {
        services: &topology.services,
    })?)
}

#[derive(Debug, Deserialize)]
struct RawCompose {
    #[serde(default)]
    services: BTreeMap<String, RawService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawService {
    image: Option<String>,
    build: Option<RawBuild>,
    hostname: Option<String>,
    command: Option<RawCommand>,
    ports: Vec<RawPort>,
    expose: Vec<Value>,
    volumes: Vec<Value>,
    environment: Option<RawEnvironment>,
    depends_on: Option<RawDependsOn>,
    profiles: Vec<String>,
    restart: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Context(String),
    Full {
        context: Option<String>,
        dockerfile: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Shell(String),
    Exec(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Short(String),
    Long {
        target: u16,
        published: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvironment {
    Map(BTreeMap<String, Option<Value>>),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependsOn {
    List(Vec<String>),
    Map(BTreeMap<String, Value>),
}

/// Parses a compose file into a `ComposeTopology`
pub fn parse(yaml: &str) -> Result<ComposeTopology> {
    let raw: RawCompose = serde_yaml::from_str(yaml)?;

    let services = raw
        .services
        .into_iter()
        .map(|(name, svc)| {
            let service = convert_service(&name, svc)?;
            Ok((name, service))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(ComposeTopology { services })
}

fn convert_service(name: &str, raw: RawService) -> Result<ComposeService> {
    let build = raw.build.map(|b| match b {
        RawBuild::Context(context) => BuildContext {
            context,
            dockerfile: None,
        },
        RawBuild::Full {
            context,
            dockerfile,
        } => BuildContext {
            context: context.unwrap_or_else(|| ".".to_string()),
            dockerfile,
        },
    });

    let command = match raw.command {
        Some(RawCommand::Shell(line)) => line.split_whitespace().map(str::to_string).collect(),
        Some(RawCommand::Exec(args)) => args,
        None => Vec::new(),
    };

    let ports = raw
        .ports
        .into_iter()
        .map(|p| convert_port(name, p))
        .collect::<Result<Vec<_>>>()?;

    let expose = raw
        .expose
        .iter()
        .map(|v| {
            scalar(v)
                .and_then(|s| s.split('/').next().and_then(|p| p.parse::<u16>().ok()))
                .ok_or_else(|| {
                    RenderError::parse(
                        "compose file",
                        0,
                        format!("service '{}' has an invalid expose entry", name),
                    )
                })
        })
        .collect::<Result<Vec<_>>>()?;

    // Long-form volumes keep only source:target
    let volumes = raw
        .volumes
        .iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Mapping(m) => {
                let source = m.get("source").and_then(Value::as_str);
                let target = m.get("target").and_then(Value::as_str)?;
                Some(match source {
                    Some(source) => format!("{}:{}", source, target),
                    None => target.to_string(),
                })
            }
            _ => None,
        })
        .collect();

    let environment = match raw.environment {
        Some(RawEnvironment::Map(map)) => map
            .into_iter()
            .map(|(k, v)| (k, v.as_ref().and_then(scalar).unwrap_or_default()))
            .collect(),
        Some(RawEnvironment::List(list)) => list
            .into_iter()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry, String::new()),
            })
            .collect(),
        None => BTreeMap::new(),
    };

    let depends_on = match raw.depends_on {
        Some(RawDependsOn::List(list)) => list,
        Some(RawDependsOn::Map(map)) => map.into_keys().collect(),
        None => Vec::new(),
    };

    let restart = raw.restart.as_deref().and_then(|policy| {
        let parsed = match policy {
            "no" => Some(RestartPolicy::No),
            "always" => Some(RestartPolicy::Always),
            "unless-stopped" => Some(RestartPolicy::UnlessStopped),
            p if p.starts_with("on-failure") => Some(RestartPolicy::OnFailure),
            _ => None,
        };
        if parsed.is_none() {
            warn!("Service '{}' has unknown restart policy '{}'", name, policy);
        }
        parsed
    });

    Ok(ComposeService {
        image: raw.image,
        build,
        hostname: raw.hostname,
        command,
        ports,
        expose,
        volumes,
        environment,
        depends_on,
        profiles: raw.profiles,
        restart,
    })
}

fn convert_port(service: &str, raw: RawPort) -> Result<PortMapping> {
    match raw {
        RawPort::Number(container) => Ok(PortMapping {
            host: None,
            container,
        }),
        RawPort::Short(spec) => spec.parse::<PortMapping>().map_err(|_| {
            RenderError::parse(
                "compose file",
                0,
                format!("service '{}' has an invalid port '{}'", service, spec),
            )
        }),
        RawPort::Long { target, published } => Ok(PortMapping {
            host: published
                .as_ref()
                .and_then(scalar)
                .and_then(|p| p.parse::<u16>().ok()),
            container: target,
        }),
    }
}

/// Renders a YAML scalar as compose sees it
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
