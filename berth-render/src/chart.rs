//! Deployment spec rendering
//!
//! Renders the Deployment, Service and (when enabled) autoscaler manifests
//! for a values record. The bundled templates pin the rolling update to
//! one unavailable and one surge replica and mount a single claim.

use berth_core::domain::deployment::ValuesRecord;
use tracing::debug;

use crate::error::Result;
use crate::template::{TemplateContext, TemplateEngine};

const DEPLOYMENT_TEMPLATE: &str = include_str!("templates/deployment.yaml");
const SERVICE_TEMPLATE: &str = include_str!("templates/service.yaml");
const HPA_TEMPLATE: &str = include_str!("templates/hpa.yaml");

/// Template sources for one chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartTemplates {
    pub deployment: String,
    pub service: String,
    pub hpa: String,
}

impl Default for ChartTemplates {
    fn default() -> Self {
        Self {
            deployment: DEPLOYMENT_TEMPLATE.to_string(),
            service: SERVICE_TEMPLATE.to_string(),
            hpa: HPA_TEMPLATE.to_string(),
        }
    }
}

/// Rendered manifests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChart {
    pub deployment: String,
    pub service: String,
    /// Present only when autoscaling is enabled
    pub hpa: Option<String>,
}

impl RenderedChart {
    /// All manifests as one multi-document YAML stream
    pub fn to_multi_document(&self) -> String {
        let mut docs = vec![self.deployment.trim_end(), self.service.trim_end()];
        if let Some(hpa) = &self.hpa {
            docs.push(hpa.trim_end());
        }
        let mut out = docs.join("\n---\n");
        out.push('\n');
        out
    }
}

/// Renders the bundled chart
pub fn render_chart(values: &ValuesRecord, release: &str) -> Result<RenderedChart> {
    render_chart_with(&ChartTemplates::default(), values, release)
}

/// Renders user-supplied chart templates
pub fn render_chart_with(
    templates: &ChartTemplates,
    values: &ValuesRecord,
    release: &str,
) -> Result<RenderedChart> {
    let engine = TemplateEngine::new();
    let ctx = TemplateContext::new(values, release)?;

    debug!("Rendering chart for release {}", release);

    let deployment = engine.render("deployment.yaml", &templates.deployment, &ctx)?;
    let service = engine.render("service.yaml", &templates.service, &ctx)?;
    let hpa = engine.render("hpa.yaml", &templates.hpa, &ctx)?;
    let hpa = (!hpa.trim().is_empty()).then(|| hpa.trim_start().to_string());

    Ok(RenderedChart {
        deployment,
        service,
        hpa,
    })
}

/// Renders the values record as a `values.yaml` file
pub fn values_yaml(values: &ValuesRecord) -> Result<String> {
    Ok(serde_yaml::to_string(values)?)
}

/// Parses a `values.yaml` file; missing keys take their defaults
pub fn parse_values(yaml: &str) -> Result<ValuesRecord> {
    if yaml.trim().is_empty() {
        return Ok(ValuesRecord::default());
    }
    Ok(serde_yaml::from_str(yaml)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn parse(doc: &str) -> Value {
        serde_yaml::from_str(doc).unwrap()
    }

    #[test]
    fn test_render_banking_deployment() {
        let chart = render_chart(&ValuesRecord::banking(), "banking").unwrap();
        let deployment = parse(&chart.deployment);

        assert_eq!(deployment["kind"], "Deployment");
        assert_eq!(deployment["metadata"]["namespace"], "banking");
        assert_eq!(deployment["spec"]["replicas"], 2);
        assert_eq!(deployment["spec"]["revisionHistoryLimit"], 3);

        let rolling = &deployment["spec"]["strategy"]["rollingUpdate"];
        assert_eq!(rolling["maxUnavailable"], 1);
        assert_eq!(rolling["maxSurge"], 1);

        let containers = deployment["spec"]["template"]["spec"]["containers"]
            .as_sequence()
            .unwrap();
        assert_eq!(containers.len(), 1);
        let container = &containers[0];
        assert_eq!(container["image"], "registry.example.com/banking:latest");
        assert_eq!(container["imagePullPolicy"], "IfNotPresent");
        assert_eq!(container["ports"][0]["containerPort"], 8000);
        assert_eq!(container["resources"]["limits"]["cpu"], "500m");
        assert_eq!(container["resources"]["requests"]["memory"], "256Mi");
        assert_eq!(container["volumeMounts"][0]["mountPath"], "/app/data");

        let volumes = &deployment["spec"]["template"]["spec"]["volumes"];
        assert_eq!(volumes[0]["persistentVolumeClaim"]["claimName"], "banking-data");
        assert_eq!(
            deployment["spec"]["template"]["spec"]["securityContext"]["runAsNonRoot"],
            true
        );
    }

    #[test]
    fn test_service_maps_port_80_to_container_port() {
        let chart = render_chart(&ValuesRecord::frontend(), "frontend").unwrap();
        let service = parse(&chart.service);

        assert_eq!(service["spec"]["type"], "ClusterIP");
        assert_eq!(service["spec"]["ports"][0]["port"], 80);
        assert_eq!(service["spec"]["ports"][0]["targetPort"], 4000);
    }

    #[test]
    fn test_autoscaler_only_when_enabled() {
        let chart = render_chart(&ValuesRecord::banking(), "banking").unwrap();
        assert!(chart.hpa.is_none());

        let mut values = ValuesRecord::banking();
        values.autoscaling.enabled = true;
        let chart = render_chart(&values, "banking").unwrap();
        let hpa = parse(chart.hpa.as_deref().unwrap());
        assert_eq!(hpa["kind"], "HorizontalPodAutoscaler");
        assert_eq!(hpa["spec"]["maxReplicas"], 3);
        assert_eq!(
            hpa["spec"]["metrics"][0]["resource"]["target"]["averageUtilization"],
            80
        );
    }

    #[test]
    fn test_default_values_leave_no_placeholders() {
        let chart = render_chart(&ValuesRecord::banking(), "banking").unwrap();
        let all = chart.to_multi_document();
        assert!(!all.contains("{{"));
        assert!(!all.contains("}}"));
        assert_eq!(all.matches("\n---\n").count(), 1);
    }

    #[test]
    fn test_custom_template_with_unknown_value_fails() {
        let templates = ChartTemplates {
            deployment: "replicas: {{ .Values.replicas }}\n".to_string(),
            ..ChartTemplates::default()
        };
        assert!(render_chart_with(&templates, &ValuesRecord::banking(), "banking").is_err());
    }

    #[test]
    fn test_helm_chart_in_go_template_syntax() {
        let templates = ChartTemplates {
            deployment: "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ .Release.Name }}
spec:
  {{- if not .Values.autoscaling.enabled }}
  replicas: {{ .Values.replicaCount }}
  {{- end }}
  template:
    spec:
      containers:
        - name: {{ .Chart.Name }}
          resources:
            {{- toYaml .Values.resources | nindent 12 }}
"
            .to_string(),
            hpa: "{{- if .Values.autoscaling.enabled }}\nkind: HorizontalPodAutoscaler\n{{- end }}\n"
                .to_string(),
            ..ChartTemplates::default()
        };

        let chart = render_chart_with(&templates, &ValuesRecord::banking(), "banking").unwrap();
        let deployment = parse(&chart.deployment);
        assert_eq!(deployment["spec"]["replicas"], 2);
        let container = &deployment["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["name"], "banking");
        assert_eq!(container["resources"]["limits"]["cpu"], "500m");
        assert!(chart.hpa.is_none());

        let mut values = ValuesRecord::banking();
        values.autoscaling.enabled = true;
        let chart = render_chart_with(&templates, &values, "banking").unwrap();
        assert!(parse(&chart.deployment)["spec"].get("replicas").is_none());
        assert_eq!(chart.hpa.as_deref(), Some("kind: HorizontalPodAutoscaler\n"));
    }

    #[test]
    fn test_values_yaml_is_camel_case() {
        let yaml = values_yaml(&ValuesRecord::banking()).unwrap();
        assert!(yaml.contains("replicaCount: 2"));
        assert!(yaml.contains("containerPort: 8000"));
        assert!(yaml.contains("targetCPUUtilizationPercentage: 80"));
    }

    #[test]
    fn test_parse_partial_values() {
        let values = parse_values("replicaCount: 4\ncontainerPort: 9000\nimage:\n  repository: registry.example.com/api\n  tag: v1.2.0\n").unwrap();
        assert_eq!(values.replica_count, 4);
        assert_eq!(values.container_port, 9000);
        assert_eq!(values.image.tag, "v1.2.0");
        // Untouched keys keep the defaults
        assert_eq!(values.namespace, "banking");
        assert_eq!(values.service.port, 80);
    }
}
