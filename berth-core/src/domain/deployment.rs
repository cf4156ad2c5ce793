//! Deployment spec domain types
//!
//! The values record substituted into the Helm deployment template.
//! Field names follow Helm's camelCase convention so a `values.yaml`
//! deserializes directly into `ValuesRecord`.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Values record for the deployment template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValuesRecord {
    pub replica_count: u32,
    pub revision_history_limit: u32,
    pub container_port: u16,
    pub namespace: String,
    pub app_name: String,
    pub image: ImageValues,
    pub resources: Resources,
    pub autoscaling: Autoscaling,
    pub service: ServiceValues,
    pub volume: VolumeValues,
    pub security_context: SecurityContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageValues {
    pub repository: String,
    #[serde(default)]
    pub pull_policy: PullPolicy,
    #[serde(default = "default_tag")]
    pub tag: String,
}

/// Kubernetes image pull policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: ResourceBounds,
    #[serde(default)]
    pub limits: ResourceBounds,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceBounds {
    pub memory: String,
    pub cpu: String,
}

/// Horizontal autoscaling settings
///
/// Declared but disabled by default; the chart only renders an
/// autoscaler when `enabled` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Autoscaling {
    pub enabled: bool,
    pub min_replicas: u32,
    pub max_replicas: u32,
    #[serde(rename = "targetCPUUtilizationPercentage")]
    pub target_cpu_utilization_percentage: u32,
}

impl Default for Autoscaling {
    fn default() -> Self {
        Self {
            enabled: false,
            min_replicas: 1,
            max_replicas: 3,
            target_cpu_utilization_percentage: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceValues {
    #[serde(rename = "type")]
    pub service_type: String,
    pub port: u16,
}

impl Default for ServiceValues {
    fn default() -> Self {
        Self {
            service_type: "ClusterIP".to_string(),
            port: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeValues {
    pub claim_name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityContext {
    pub run_as_non_root: bool,
    pub run_as_user: u32,
    pub read_only_root_filesystem: bool,
    pub allow_privilege_escalation: bool,
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self {
            run_as_non_root: true,
            run_as_user: 1000,
            read_only_root_filesystem: false,
            allow_privilege_escalation: false,
        }
    }
}

fn default_tag() -> String {
    "latest".to_string()
}

impl Default for ValuesRecord {
    fn default() -> Self {
        Self::banking()
    }
}

impl ValuesRecord {
    /// Values for the banking API deployment
    pub fn banking() -> Self {
        Self {
            replica_count: 2,
            revision_history_limit: 3,
            container_port: 8000,
            namespace: "banking".to_string(),
            app_name: "banking".to_string(),
            image: ImageValues {
                repository: "registry.example.com/banking".to_string(),
                pull_policy: PullPolicy::IfNotPresent,
                tag: default_tag(),
            },
            resources: Resources {
                requests: ResourceBounds {
                    memory: "256Mi".to_string(),
                    cpu: "250m".to_string(),
                },
                limits: ResourceBounds {
                    memory: "512Mi".to_string(),
                    cpu: "500m".to_string(),
                },
            },
            autoscaling: Autoscaling::default(),
            service: ServiceValues::default(),
            volume: VolumeValues {
                claim_name: "banking-data".to_string(),
                mount_path: "/app/data".to_string(),
            },
            security_context: SecurityContext::default(),
        }
    }

    /// Values for the frontend deployment
    pub fn frontend() -> Self {
        Self {
            container_port: 4000,
            namespace: "frontend".to_string(),
            app_name: "frontend".to_string(),
            image: ImageValues {
                repository: "registry.example.com/frontend".to_string(),
                pull_policy: PullPolicy::IfNotPresent,
                tag: default_tag(),
            },
            volume: VolumeValues {
                claim_name: "frontend-data".to_string(),
                mount_path: "/app/data".to_string(),
            },
            ..Self::banking()
        }
    }

    /// Full image reference (`repository:tag`)
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image.repository, self.image.tag)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replica_count == 0 {
            return Err(CoreError::invalid("values", "replicaCount must be at least 1"));
        }

        if self.container_port == 0 {
            return Err(CoreError::invalid("values", "containerPort must be non-zero"));
        }

        if self.app_name.trim().is_empty() {
            return Err(CoreError::invalid("values", "appName cannot be empty"));
        }

        if self.image.repository.trim().is_empty() {
            return Err(CoreError::invalid("values", "image.repository cannot be empty"));
        }

        let requests = &self.resources.requests;
        let limits = &self.resources.limits;

        if let (Some(req), Some(lim)) = (
            quantity(parse_cpu_millis, &requests.cpu)?,
            quantity(parse_cpu_millis, &limits.cpu)?,
        ) && req > lim
        {
            return Err(CoreError::invalid(
                "values",
                format!("cpu request {} exceeds limit {}", requests.cpu, limits.cpu),
            ));
        }

        if let (Some(req), Some(lim)) = (
            quantity(parse_memory_bytes, &requests.memory)?,
            quantity(parse_memory_bytes, &limits.memory)?,
        ) && req > lim
        {
            return Err(CoreError::invalid(
                "values",
                format!(
                    "memory request {} exceeds limit {}",
                    requests.memory, limits.memory
                ),
            ));
        }

        let scaling = &self.autoscaling;
        if scaling.enabled && scaling.min_replicas > scaling.max_replicas {
            return Err(CoreError::invalid(
                "values",
                "autoscaling.minReplicas exceeds maxReplicas",
            ));
        }

        Ok(())
    }
}

/// Parses an optional quantity; empty strings mean "not set"
fn quantity(parse: fn(&str) -> Result<u64>, value: &str) -> Result<Option<u64>> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse(value).map(Some)
    }
}

/// Parses a Kubernetes CPU quantity (`500m`, `1`, `0.5`) into millicores
pub fn parse_cpu_millis(value: &str) -> Result<u64> {
    let value = value.trim();

    if let Some(millis) = value.strip_suffix('m') {
        return millis
            .parse::<u64>()
            .map_err(|_| CoreError::parse("cpu quantity", value));
    }

    value
        .parse::<f64>()
        .ok()
        .filter(|cores| *cores >= 0.0)
        .map(|cores| (cores * 1000.0).round() as u64)
        .ok_or_else(|| CoreError::parse("cpu quantity", value))
}

/// Parses a Kubernetes memory quantity (`512Mi`, `1Gi`, `128M`, `1000`) into bytes
pub fn parse_memory_bytes(value: &str) -> Result<u64> {
    const SUFFIXES: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
        ("k", 1_000),
        ("K", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];

    let value = value.trim();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| value.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((value, 1));

    number
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| CoreError::parse("memory quantity", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banking_values() {
        let values = ValuesRecord::banking();
        assert!(values.validate().is_ok());
        assert_eq!(values.container_port, 8000);
        assert_eq!(values.service.port, 80);
        assert_eq!(values.service.service_type, "ClusterIP");
        assert_eq!(values.image_ref(), "registry.example.com/banking:latest");
        assert!(!values.autoscaling.enabled);
    }

    #[test]
    fn test_frontend_values_port() {
        assert_eq!(ValuesRecord::frontend().container_port, 4000);
    }

    #[test]
    fn test_enabled_autoscaling_bounds() {
        let mut values = ValuesRecord::banking();
        values.autoscaling.enabled = true;
        values.autoscaling.min_replicas = 5;
        assert!(values.validate().is_err());

        // Disabled settings are not checked
        values.autoscaling.enabled = false;
        assert!(values.validate().is_ok());
    }

    #[test]
    fn test_request_above_limit_is_rejected() {
        let mut values = ValuesRecord::banking();
        values.resources.requests.cpu = "1".to_string();
        values.resources.limits.cpu = "500m".to_string();
        assert!(values.validate().unwrap_err().to_string().contains("cpu"));

        let mut values = ValuesRecord::banking();
        values.resources.requests.memory = "1Gi".to_string();
        values.resources.limits.memory = "512Mi".to_string();
        assert!(values.validate().unwrap_err().to_string().contains("memory"));
    }

    #[test]
    fn test_zero_replicas_is_rejected() {
        let mut values = ValuesRecord::banking();
        values.replica_count = 0;
        assert!(values.validate().is_err());
    }

    #[test]
    fn test_parse_quantities() {
        assert_eq!(parse_cpu_millis("250m").unwrap(), 250);
        assert_eq!(parse_cpu_millis("0.5").unwrap(), 500);
        assert_eq!(parse_cpu_millis("2").unwrap(), 2000);
        assert!(parse_cpu_millis("fast").is_err());

        assert_eq!(parse_memory_bytes("512Mi").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_bytes("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_memory_bytes("1024").unwrap(), 1024);
        assert_eq!(parse_memory_bytes("2Pi").unwrap(), 2 << 50);
        assert_eq!(parse_memory_bytes("1Ei").unwrap(), 1 << 60);
        assert_eq!(parse_memory_bytes("3P").unwrap(), 3_000_000_000_000_000);
        assert_eq!(parse_memory_bytes("1E").unwrap(), 1_000_000_000_000_000_000);
        // Past u64
        assert!(parse_memory_bytes("16Ei").is_err());
        assert!(parse_memory_bytes("lots").is_err());
    }

    #[test]
    fn test_values_yaml_camel_case() {
        let yaml = r#"
replicaCount: 1
containerPort: 4000
appName: frontend
image:
  repository: example/frontend
  pullPolicy: Always
"#;
        let values: ValuesRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(values.replica_count, 1);
        assert_eq!(values.container_port, 4000);
        assert_eq!(values.image.pull_policy, PullPolicy::Always);
        assert_eq!(values.image.tag, "latest");
        // Unspecified keys fall back to the defaults
        assert_eq!(values.revision_history_limit, 3);
    }
}
