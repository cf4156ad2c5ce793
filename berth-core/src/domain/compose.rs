//! Compose topology domain types
//!
//! Named services with ports, volumes, environment bindings, dependency
//! edges and profile tags. A profile selects which services start for
//! one invocation; services without profile tags are always active.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::vars::VarProvider;

pub const DEV_PROFILE: &str = "dev";
pub const TEST_PROFILE: &str = "test";

/// Multi-service local topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeTopology {
    pub services: BTreeMap<String, ComposeService>,
}

/// One service of the topology
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeService {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    /// Ports reachable by siblings without a host mapping
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContext {
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
}

/// Container restart policy, left to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

/// `host:container` port mapping
///
/// Serialized in the compose short form (`"8000:8000"` or `"6379"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortMapping {
    pub host: Option<u16>,
    pub container: u16,
}

impl PortMapping {
    pub fn new(host: u16, container: u16) -> Self {
        Self {
            host: Some(host),
            container,
        }
    }
}

impl FromStr for PortMapping {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let spec = s.trim();
        // Drop the protocol suffix ("5432/tcp")
        let spec = spec.split('/').next().unwrap_or(spec);
        let parts: Vec<&str> = spec.split(':').collect();

        let parse = |p: &str| {
            p.parse::<u16>()
                .map_err(|_| CoreError::parse("port mapping", s))
        };

        match parts.as_slice() {
            [container] => Ok(Self {
                host: None,
                container: parse(container)?,
            }),
            [host, container] => Ok(Self {
                host: Some(parse(host)?),
                container: parse(container)?,
            }),
            // "ip:host:container"
            [_, host, container] => Ok(Self {
                host: Some(parse(host)?),
                container: parse(container)?,
            }),
            _ => Err(CoreError::parse("port mapping", s)),
        }
    }
}

impl TryFrom<String> for PortMapping {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PortMapping> for String {
    fn from(mapping: PortMapping) -> Self {
        mapping.to_string()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            Some(host) => write!(f, "{}:{}", host, self.container),
            None => write!(f, "{}", self.container),
        }
    }
}

/// A sibling service referenced by hostname from an environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReference {
    /// Env key holding the hostname (or the URL)
    pub key: String,
    pub host: String,
    /// Port referenced next to the host, if any
    pub port: Option<u16>,
    /// Env key holding the port, when it is separate from `key`
    pub port_key: Option<String>,
}

/// A `${VAR}` reference found in the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    pub name: String,
    /// False when the reference carries a default (`${VAR:-x}`)
    pub required: bool,
}

impl ComposeService {
    /// Returns true if the service starts under `profile`
    pub fn in_profile(&self, profile: &str) -> bool {
        self.profiles.is_empty() || self.profiles.iter().any(|p| p == profile)
    }

    /// Returns true if the service answers to `host`
    pub fn answers_to(&self, name: &str, host: &str) -> bool {
        name == host || self.hostname.as_deref() == Some(host)
    }

    /// Ports siblings can reach on this service
    ///
    /// Falls back to the image's well-known port when the service declares
    /// neither mappings nor `expose`.
    pub fn container_ports(&self) -> BTreeSet<u16> {
        let mut ports: BTreeSet<u16> = self.ports.iter().map(|p| p.container).collect();
        ports.extend(self.expose.iter().copied());

        if ports.is_empty()
            && let Some(port) = self.image.as_deref().and_then(well_known_port)
        {
            ports.insert(port);
        }

        ports
    }

    /// Port the server listens on inside its container
    ///
    /// A `-p`/`--port` flag or `-c port=` setting in `command` wins over the
    /// declared container ports.
    pub fn listen_port(&self) -> Option<u16> {
        let mut args = self.command.iter().map(String::as_str);
        while let Some(arg) = args.next() {
            let value = match arg {
                "-p" | "--port" => args.next(),
                "-c" => args.next().and_then(|setting| setting.strip_prefix("port=")),
                _ => arg
                    .strip_prefix("--port=")
                    .or_else(|| arg.strip_prefix("-p").filter(|v| !v.is_empty())),
            };
            if let Some(port) = value.and_then(|v| v.parse().ok()) {
                return Some(port);
            }
        }

        self.container_ports().into_iter().next()
    }

    /// Returns true if the service runs a Postgres image
    pub fn is_database(&self) -> bool {
        self.image
            .as_deref()
            .is_some_and(|image| image_name(image) == "postgres")
    }

    /// Sibling hostnames referenced from the environment
    ///
    /// Recognises `X_HOST` keys (with an optional `X_PORT` sibling) and
    /// URL values (`scheme://user:pw@host:port/path`). Dotted names,
    /// `localhost` and unresolved `${...}` values are external and skipped.
    pub fn host_references(&self) -> Vec<HostReference> {
        let mut refs = Vec::new();

        for (key, value) in &self.environment {
            if let Some(prefix) = key.strip_suffix("_HOST") {
                if !is_sibling_host(value) {
                    continue;
                }
                let port_key = format!("{}_PORT", prefix);
                let port = self
                    .environment
                    .get(&port_key)
                    .and_then(|p| p.trim().parse::<u16>().ok());
                refs.push(HostReference {
                    key: key.clone(),
                    host: value.trim().to_string(),
                    port,
                    port_key: port.map(|_| port_key),
                });
            } else if let Some((host, port)) = parse_url_authority(value)
                && is_sibling_host(host)
            {
                refs.push(HostReference {
                    key: key.clone(),
                    host: host.to_string(),
                    port,
                    port_key: None,
                });
            }
        }

        refs
    }
}

impl ComposeTopology {
    /// Services started by `profile`, in name order
    pub fn services_for_profile(&self, profile: &str) -> Vec<(&str, &ComposeService)> {
        self.services
            .iter()
            .filter(|(_, svc)| svc.in_profile(profile))
            .map(|(name, svc)| (name.as_str(), svc))
            .collect()
    }

    /// Every profile named by at least one service
    pub fn profiles(&self) -> BTreeSet<&str> {
        self.services
            .values()
            .flat_map(|svc| svc.profiles.iter().map(String::as_str))
            .collect()
    }

    pub fn service(&self, name: &str) -> Option<&ComposeService> {
        self.services.get(name)
    }

    /// The active service answering to `host` under `profile`
    pub fn resolve_host(&self, profile: &str, host: &str) -> Option<(&str, &ComposeService)> {
        self.services_for_profile(profile)
            .into_iter()
            .find(|(name, svc)| svc.answers_to(name, host))
    }

    /// Active services ordered so every dependency starts first
    ///
    /// Ties are broken by service name so the order is stable.
    pub fn start_order(&self, profile: &str) -> Result<Vec<String>> {
        let active: BTreeMap<&str, &ComposeService> =
            self.services_for_profile(profile).into_iter().collect();

        let mut in_degree: BTreeMap<&str, usize> = active.keys().map(|k| (*k, 0)).collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (name, svc) in &active {
            for dep in &svc.depends_on {
                if !active.contains_key(dep.as_str()) {
                    return Err(CoreError::UnknownDependency {
                        service: name.to_string(),
                        dependency: dep.clone(),
                        profile: profile.to_string(),
                    });
                }
                *in_degree.entry(*name).or_default() += 1;
                dependents.entry(dep.as_str()).or_default().push(*name);
            }
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(active.len());

        while let Some(name) = ready.pop_front() {
            order.push(name.to_string());
            if let Some(children) = dependents.get(name) {
                let mut unlocked = Vec::new();
                for child in children {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg -= 1;
                        if *deg == 0 {
                            unlocked.push(*child);
                        }
                    }
                }
                unlocked.sort_unstable();
                ready.extend(unlocked);
            }
        }

        if order.len() != active.len() {
            let services = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(name, _)| name.to_string())
                .collect();
            return Err(CoreError::DependencyCycle {
                profile: profile.to_string(),
                services,
            });
        }

        Ok(order)
    }

    /// Every `${VAR}` the topology consumes from the invoking shell
    pub fn required_variables(&self) -> Vec<VariableRef> {
        let mut found: BTreeMap<String, bool> = BTreeMap::new();

        for svc in self.services.values() {
            for text in service_strings(svc) {
                for var in variable_refs(text) {
                    let required = found.entry(var.name).or_insert(false);
                    *required |= var.required;
                }
            }
        }

        found
            .into_iter()
            .map(|(name, required)| VariableRef { name, required })
            .collect()
    }

    /// Substitutes `${VAR}` references from `vars`
    pub fn interpolate(&self, vars: &dyn VarProvider) -> Result<ComposeTopology> {
        let mut out = self.clone();

        for svc in out.services.values_mut() {
            if let Some(image) = svc.image.as_mut() {
                *image = interpolate_str(image, vars)?;
            }
            for arg in svc.command.iter_mut() {
                *arg = interpolate_str(arg, vars)?;
            }
            for volume in svc.volumes.iter_mut() {
                *volume = interpolate_str(volume, vars)?;
            }
            for value in svc.environment.values_mut() {
                *value = interpolate_str(value, vars)?;
            }
        }

        Ok(out)
    }

    /// Local topology of the banking service
    pub fn banking() -> Self {
        let db_credentials = [
            ("POSTGRES_USER", "${PG_USER}"),
            ("POSTGRES_PASSWORD", "${PG_PASSWORD}"),
        ];

        let redis = ComposeService {
            image: Some("redis:7-alpine".to_string()),
            hostname: Some("redis".to_string()),
            ports: vec![PortMapping::new(6379, 6379)],
            profiles: vec![DEV_PROFILE.to_string(), TEST_PROFILE.to_string()],
            restart: Some(RestartPolicy::UnlessStopped),
            ..Default::default()
        };

        let db = ComposeService {
            image: Some("postgres:15".to_string()),
            hostname: Some("db".to_string()),
            ports: vec![PortMapping::new(5432, 5432)],
            volumes: vec!["pgdata:/var/lib/postgresql/data".to_string()],
            environment: env(&db_credentials, &[("POSTGRES_DB", "banking")]),
            profiles: vec![DEV_PROFILE.to_string()],
            restart: Some(RestartPolicy::UnlessStopped),
            ..Default::default()
        };

        let test_db = ComposeService {
            image: Some("postgres:15".to_string()),
            hostname: Some("test_db".to_string()),
            command: vec!["postgres".to_string(), "-p".to_string(), "5439".to_string()],
            ports: vec![PortMapping::new(5439, 5439)],
            environment: env(&db_credentials, &[("POSTGRES_DB", "banking_test")]),
            profiles: vec![TEST_PROFILE.to_string()],
            ..Default::default()
        };

        let app_env = [
            ("DB_USER", "${PG_USER}"),
            ("DB_PASSWORD", "${PG_PASSWORD}"),
            ("SECRET_KEY", "${SECRET_KEY}"),
            ("REDIS_HOST", "redis"),
            ("REDIS_PORT", "6379"),
        ];

        let app = ComposeService {
            build: Some(BuildContext {
                context: ".".to_string(),
                dockerfile: None,
            }),
            ports: vec![PortMapping::new(8000, 8000)],
            volumes: vec![".:/app".to_string()],
            environment: env(
                &app_env,
                &[
                    ("DB_HOST", "db"),
                    ("DB_PORT", "5432"),
                    ("DATABASE", "banking"),
                    ("ENVIRONMENT", "development"),
                ],
            ),
            depends_on: vec!["db".to_string(), "redis".to_string()],
            profiles: vec![DEV_PROFILE.to_string()],
            restart: Some(RestartPolicy::UnlessStopped),
            ..Default::default()
        };

        let app_test = ComposeService {
            build: Some(BuildContext {
                context: ".".to_string(),
                dockerfile: None,
            }),
            ports: vec![PortMapping::new(8000, 8000)],
            environment: env(
                &app_env,
                &[
                    ("TEST_DB_HOST", "test_db"),
                    ("TEST_DB_PORT", "5439"),
                    ("DATABASE", "banking_test"),
                    ("ENVIRONMENT", "testing"),
                ],
            ),
            depends_on: vec!["redis".to_string(), "test_db".to_string()],
            profiles: vec![TEST_PROFILE.to_string()],
            ..Default::default()
        };

        Self {
            services: BTreeMap::from([
                ("app".to_string(), app),
                ("app_test".to_string(), app_test),
                ("db".to_string(), db),
                ("redis".to_string(), redis),
                ("test_db".to_string(), test_db),
            ]),
        }
    }

    /// Local topology of the frontend
    pub fn frontend() -> Self {
        let frontend = ComposeService {
            build: Some(BuildContext {
                context: ".".to_string(),
                dockerfile: None,
            }),
            ports: vec![PortMapping::new(4000, 4000)],
            environment: env(&[("NODE_ENV", "development")], &[]),
            profiles: vec![DEV_PROFILE.to_string(), TEST_PROFILE.to_string()],
            restart: Some(RestartPolicy::UnlessStopped),
            ..Default::default()
        };

        Self {
            services: BTreeMap::from([("frontend".to_string(), frontend)]),
        }
    }
}

fn env(common: &[(&str, &str)], extra: &[(&str, &str)]) -> BTreeMap<String, String> {
    common
        .iter()
        .chain(extra.iter())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Image name without registry, namespace and tag (`docker.io/library/postgres:15` -> `postgres`)
fn image_name(image: &str) -> &str {
    let last = image.rsplit('/').next().unwrap_or(image);
    let last = last.split('@').next().unwrap_or(last);
    last.split(':').next().unwrap_or(last)
}

fn well_known_port(image: &str) -> Option<u16> {
    match image_name(image) {
        "postgres" => Some(5432),
        "redis" => Some(6379),
        "mysql" | "mariadb" => Some(3306),
        "mongo" => Some(27017),
        _ => None,
    }
}

fn is_sibling_host(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && value != "localhost"
        && !value.contains('.')
        && !value.contains("${")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extracts host and port from `scheme://[user[:pw]@]host[:port][/...]`
fn parse_url_authority(value: &str) -> Option<(&str, Option<u16>)> {
    let (_, rest) = value.split_once("://")?;
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);

    match host_port.rsplit_once(':') {
        Some((host, port)) => Some((host, port.parse::<u16>().ok())),
        None => Some((host_port, None)),
    }
}

fn service_strings(svc: &ComposeService) -> impl Iterator<Item = &str> {
    svc.image
        .iter()
        .map(String::as_str)
        .chain(svc.command.iter().map(String::as_str))
        .chain(svc.volumes.iter().map(String::as_str))
        .chain(svc.environment.values().map(String::as_str))
}

/// Finds `${VAR}`, `${VAR:-default}`, `${VAR-default}` and `${VAR:?err}` references
fn variable_refs(text: &str) -> Vec<VariableRef> {
    let mut refs = Vec::new();
    let mut rest = text;

    while let Some(pos) = rest.find("${") {
        // "$${" is an escaped literal
        let escaped = pos > 0 && rest.as_bytes()[pos - 1] == b'$';
        rest = &rest[pos + 2..];
        let Some(end) = rest.find('}') else {
            break;
        };
        let expr = &rest[..end];
        rest = &rest[end + 1..];

        if escaped {
            continue;
        }

        let name_end = expr
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(expr.len());
        let name = &expr[..name_end];
        let modifier = &expr[name_end..];
        if name.is_empty() {
            continue;
        }

        let required = !(modifier.starts_with(":-") || modifier.starts_with('-'));
        refs.push(VariableRef {
            name: name.to_string(),
            required,
        });
    }

    refs
}

/// Substitutes `${VAR}` forms in `text`
pub fn interpolate_str(text: &str, vars: &dyn VarProvider) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find("${") {
        if pos > 0 && rest.as_bytes()[pos - 1] == b'$' {
            // "$${" -> literal "${"
            out.push_str(&rest[..pos - 1]);
            out.push_str("${");
            rest = &rest[pos + 2..];
            continue;
        }

        out.push_str(&rest[..pos]);
        let after = &rest[pos + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[pos..]);
            rest = "";
            break;
        };
        let expr = &after[..end];
        rest = &after[end + 1..];

        out.push_str(&resolve_expr(expr, vars)?);
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve_expr(expr: &str, vars: &dyn VarProvider) -> Result<String> {
    if let Some((name, default)) = expr.split_once(":-") {
        return Ok(vars
            .get(name)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()));
    }

    if let Some((name, message)) = expr.split_once(":?") {
        return vars.get(name).filter(|v| !v.is_empty()).ok_or_else(|| {
            if message.is_empty() {
                CoreError::MissingVariable(name.to_string())
            } else {
                CoreError::MissingVariable(format!("{} ({})", name, message))
            }
        });
    }

    if let Some((name, default)) = expr.split_once('-') {
        return Ok(vars.get(name).unwrap_or_else(|| default.to_string()));
    }

    vars.get(expr)
        .ok_or_else(|| CoreError::MissingVariable(expr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::MapVarProvider;

    #[test]
    fn test_port_mapping_parse() {
        assert_eq!("8000:8000".parse::<PortMapping>().unwrap(), PortMapping::new(8000, 8000));
        assert_eq!(
            "6379".parse::<PortMapping>().unwrap(),
            PortMapping {
                host: None,
                container: 6379
            }
        );
        assert_eq!(
            "127.0.0.1:5439:5432/tcp".parse::<PortMapping>().unwrap(),
            PortMapping::new(5439, 5432)
        );
        assert!("abc:80".parse::<PortMapping>().is_err());
        assert_eq!(PortMapping::new(5439, 5432).to_string(), "5439:5432");
    }

    #[test]
    fn test_profiles_select_services() {
        let topology = ComposeTopology::banking();

        let dev: Vec<&str> = topology
            .services_for_profile(DEV_PROFILE)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(dev, vec!["app", "db", "redis"]);

        let test: Vec<&str> = topology
            .services_for_profile(TEST_PROFILE)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(test, vec!["app_test", "redis", "test_db"]);

        assert_eq!(
            topology.profiles().into_iter().collect::<Vec<_>>(),
            vec!["dev", "test"]
        );
    }

    #[test]
    fn test_listen_port() {
        let topology = ComposeTopology::banking();
        assert_eq!(topology.service("test_db").unwrap().listen_port(), Some(5439));
        assert_eq!(topology.service("db").unwrap().listen_port(), Some(5432));

        let mut test_db = topology.service("test_db").unwrap().clone();
        test_db.ports.clear();
        assert_eq!(test_db.listen_port(), Some(5439));

        test_db.command = vec!["postgres".to_string(), "-c".to_string(), "port=6543".to_string()];
        assert_eq!(test_db.listen_port(), Some(6543));

        test_db.command.clear();
        // Image default
        assert_eq!(test_db.listen_port(), Some(5432));
    }

    #[test]
    fn test_untagged_service_is_always_active() {
        let mut topology = ComposeTopology::banking();
        topology
            .services
            .insert("mailhog".to_string(), ComposeService::default());

        assert!(topology.resolve_host(DEV_PROFILE, "mailhog").is_some());
        assert!(topology.resolve_host(TEST_PROFILE, "mailhog").is_some());
    }

    #[test]
    fn test_resolve_host_respects_profile() {
        let topology = ComposeTopology::banking();
        assert!(topology.resolve_host(DEV_PROFILE, "db").is_some());
        assert!(topology.resolve_host(TEST_PROFILE, "db").is_none());
        assert!(topology.resolve_host(TEST_PROFILE, "test_db").is_some());
    }

    #[test]
    fn test_start_order_puts_dependencies_first() {
        let topology = ComposeTopology::banking();
        let order = topology.start_order(DEV_PROFILE).unwrap();
        assert_eq!(order, vec!["db", "redis", "app"]);

        let order = topology.start_order(TEST_PROFILE).unwrap();
        assert_eq!(order, vec!["redis", "test_db", "app_test"]);
    }

    #[test]
    fn test_start_order_detects_cycles() {
        let mut topology = ComposeTopology::banking();
        topology
            .services
            .get_mut("db")
            .unwrap()
            .depends_on
            .push("app".to_string());

        let err = topology.start_order(DEV_PROFILE).unwrap_err();
        assert!(matches!(err, CoreError::DependencyCycle { .. }));
    }

    #[test]
    fn test_start_order_rejects_inactive_dependency() {
        let mut topology = ComposeTopology::banking();
        topology
            .services
            .get_mut("app_test")
            .unwrap()
            .depends_on
            .push("db".to_string());

        let err = topology.start_order(TEST_PROFILE).unwrap_err();
        assert!(matches!(err, CoreError::UnknownDependency { .. }));
    }

    #[test]
    fn test_host_references() {
        let topology = ComposeTopology::banking();
        let app = topology.service("app").unwrap();
        let refs = app.host_references();

        let db = refs.iter().find(|r| r.key == "DB_HOST").unwrap();
        assert_eq!(db.host, "db");
        assert_eq!(db.port, Some(5432));
        assert_eq!(db.port_key.as_deref(), Some("DB_PORT"));

        let redis = refs.iter().find(|r| r.key == "REDIS_HOST").unwrap();
        assert_eq!(redis.host, "redis");
        assert_eq!(redis.port, Some(6379));
    }

    #[test]
    fn test_url_host_references() {
        let svc = ComposeService {
            environment: BTreeMap::from([
                (
                    "DATABASE_URL".to_string(),
                    "postgres://u:p@db:5432/banking".to_string(),
                ),
                ("CACHE_URL".to_string(), "redis://redis/0".to_string()),
                ("API_URL".to_string(), "https://api.example.com".to_string()),
            ]),
            ..Default::default()
        };

        let refs = svc.host_references();
        assert_eq!(refs.len(), 2);
        let db = refs.iter().find(|r| r.key == "DATABASE_URL").unwrap();
        assert_eq!((db.host.as_str(), db.port), ("db", Some(5432)));
        let cache = refs.iter().find(|r| r.key == "CACHE_URL").unwrap();
        assert_eq!((cache.host.as_str(), cache.port), ("redis", None));
    }

    #[test]
    fn test_container_ports_fallback() {
        let svc = ComposeService {
            image: Some("docker.io/library/postgres:15".to_string()),
            ..Default::default()
        };
        assert_eq!(svc.container_ports().into_iter().collect::<Vec<_>>(), vec![5432]);
        assert!(svc.is_database());

        let topology = ComposeTopology::banking();
        let test_db = topology.service("test_db").unwrap();
        assert!(test_db.container_ports().contains(&5439));
        assert!(!test_db.container_ports().contains(&5432));
    }

    #[test]
    fn test_required_variables() {
        let topology = ComposeTopology::banking();
        let names: Vec<String> = topology
            .required_variables()
            .into_iter()
            .filter(|v| v.required)
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["PG_PASSWORD", "PG_USER", "SECRET_KEY"]);
    }

    #[test]
    fn test_defaulted_variable_is_optional() {
        let refs = variable_refs("${A:-x} ${B} $${C} ${D-y}");
        assert_eq!(refs.len(), 3);
        assert!(!refs[0].required);
        assert!(refs[1].required);
        assert!(!refs[2].required);
    }

    #[test]
    fn test_interpolate() {
        let vars = MapVarProvider::from([
            ("PG_USER", "bank"),
            ("PG_PASSWORD", "secret"),
            ("SECRET_KEY", "k"),
        ]);

        let topology = ComposeTopology::banking().interpolate(&vars).unwrap();
        let app = topology.service("app").unwrap();
        assert_eq!(app.environment["DB_USER"], "bank");
        assert_eq!(app.environment["DB_PASSWORD"], "secret");
    }

    #[test]
    fn test_interpolate_missing_variable() {
        let vars = MapVarProvider::from([("PG_USER", "bank")]);
        let err = ComposeTopology::banking().interpolate(&vars).unwrap_err();
        assert!(matches!(err, CoreError::MissingVariable(_)));
    }

    #[test]
    fn test_interpolate_forms() {
        let vars = MapVarProvider::from([("SET", "v"), ("EMPTY", "")]);
        assert_eq!(interpolate_str("${SET}", &vars).unwrap(), "v");
        assert_eq!(interpolate_str("${UNSET:-d}", &vars).unwrap(), "d");
        assert_eq!(interpolate_str("${EMPTY:-d}", &vars).unwrap(), "d");
        assert_eq!(interpolate_str("${EMPTY-d}", &vars).unwrap(), "");
        assert_eq!(interpolate_str("$${SET}", &vars).unwrap(), "${SET}");
        assert!(interpolate_str("${UNSET:?needed}", &vars).is_err());
    }
}
