//! Consistency check findings

use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Identifier of the rule that produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    HostReference,
    PortReference,
    ContainerPort,
    UnresolvedPlaceholder,
    DependencyEdge,
    EntrypointConflict,
    Readiness,
    Values,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::HostReference => "host-reference",
            RuleId::PortReference => "port-reference",
            RuleId::ContainerPort => "container-port",
            RuleId::UnresolvedPlaceholder => "unresolved-placeholder",
            RuleId::DependencyEdge => "dependency-edge",
            RuleId::EntrypointConflict => "entrypoint-conflict",
            RuleId::Readiness => "readiness",
            RuleId::Values => "values",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single consistency violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: RuleId,
    pub severity: Severity,
    /// What the finding is about (e.g. "compose/app:DB_HOST")
    pub subject: String,
    pub message: String,
}

impl Finding {
    pub fn error(rule: RuleId, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity: Severity::Error,
            subject: subject.into(),
            message: message.into(),
        }
    }

    pub fn warning(rule: RuleId, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity: Severity::Warning,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

/// Result of checking one stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub stack: String,
    pub checked_at: chrono::DateTime<chrono::Utc>,
    pub findings: Vec<Finding>,
}

impl Report {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            checked_at: chrono::Utc::now(),
            findings: Vec::new(),
        }
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.findings.extend(findings);
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Findings produced by `rule`
    pub fn by_rule(&self, rule: RuleId) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.rule == rule).collect()
    }

    /// Orders findings by severity (errors first), then rule and subject
    pub fn sort(&mut self) {
        self.findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.rule.cmp(&b.rule))
                .then_with(|| a.subject.cmp(&b.subject))
        });
    }
}
