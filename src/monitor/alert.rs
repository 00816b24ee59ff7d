//! Alert, breach and remediation types flowing through the monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How serious a finding is. Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action needed.
    #[default]
    Info,
    /// Unusual but within tolerance.
    Warning,
    /// A limit or policy was crossed.
    Error,
    /// Needs immediate containment.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// What produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A usage sample crossed a threshold.
    ResourceViolation,
    /// A detector reported a breach.
    SecurityBreach,
    /// Unexpected network behaviour.
    NetworkAnomaly,
    /// Unexpected process behaviour.
    ProcessAnomaly,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResourceViolation => write!(f, "resource_violation"),
            Self::SecurityBreach => write!(f, "security_breach"),
            Self::NetworkAnomaly => write!(f, "network_anomaly"),
            Self::ProcessAnomaly => write!(f, "process_anomaly"),
        }
    }
}

/// Notification emitted for violations and breaches alike.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    /// Unique per alert.
    pub id: Uuid,
    /// What produced the alert.
    pub kind: AlertKind,
    /// Workspace the alert concerns.
    pub workspace_id: String,
    /// How serious the alert is.
    pub severity: Severity,
    /// Human-readable summary.
    pub message: String,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// Structured detail; shape depends on `kind`.
    #[serde(default)]
    pub payload: Value,
}

impl SecurityAlert {
    /// Builds an alert stamped with a fresh id and the current time.
    pub fn new(
        kind: AlertKind,
        workspace_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            workspace_id: workspace_id.into(),
            severity,
            message: message.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Known breach categories, with a catch-all for anything a detector invents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BreachKind {
    /// A process gained privileges it should not have.
    PrivilegeEscalation,
    /// Traffic to unexpected destinations or at odd volume.
    SuspiciousNetworkActivity,
    /// Access to paths outside the workspace.
    UnauthorizedFileAccess,
    /// A container is starving its host.
    ResourceExhaustion,
    /// Anything else, kept verbatim.
    Other(String),
}

impl From<String> for BreachKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "privilege_escalation" => Self::PrivilegeEscalation,
            "suspicious_network_activity" => Self::SuspiciousNetworkActivity,
            "unauthorized_file_access" => Self::UnauthorizedFileAccess,
            "resource_exhaustion" => Self::ResourceExhaustion,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for BreachKind {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<BreachKind> for String {
    fn from(value: BreachKind) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for BreachKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrivilegeEscalation => write!(f, "privilege_escalation"),
            Self::SuspiciousNetworkActivity => write!(f, "suspicious_network_activity"),
            Self::UnauthorizedFileAccess => write!(f, "unauthorized_file_access"),
            Self::ResourceExhaustion => write!(f, "resource_exhaustion"),
            Self::Other(kind) => write!(f, "{kind}"),
        }
    }
}

/// A behavioural security incident reported by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityBreach {
    /// Category used to pick the remediation plan.
    pub kind: BreachKind,
    /// What the detector saw.
    pub description: String,
    /// Raw detector output.
    #[serde(default)]
    pub evidence: Value,
    /// How dangerous the breach is.
    pub risk_level: Severity,
    /// When the breach was detected.
    pub timestamp: DateTime<Utc>,
}

impl SecurityBreach {
    /// Builds a breach stamped with the current time.
    pub fn new(
        kind: impl Into<BreachKind>,
        description: impl Into<String>,
        risk_level: Severity,
        evidence: Value,
    ) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            evidence,
            risk_level,
            timestamp: Utc::now(),
        }
    }
}

/// Policy change requested in response to a breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    /// Freeze every process in the container.
    PauseContainer,
    /// Record the breach in the audit log.
    AuditLog,
    /// Narrow the workspace network policy.
    RestrictNetworkTraffic,
    /// Sample network usage more often.
    IncreaseNetworkMonitoring,
    /// Audit more filesystem activity.
    IncreaseFilesystemAuditing,
    /// Tighten CPU and memory ceilings.
    ApplyStricterResourceLimits,
    /// Sample the process table more often.
    IncreaseProcessMonitoring,
    /// Raise the general check rate.
    IncreaseMonitoring,
}

impl std::fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PauseContainer => "pause_container",
            Self::AuditLog => "audit_log",
            Self::RestrictNetworkTraffic => "restrict_network_traffic",
            Self::IncreaseNetworkMonitoring => "increase_network_monitoring",
            Self::IncreaseFilesystemAuditing => "increase_filesystem_auditing",
            Self::ApplyStricterResourceLimits => "apply_stricter_resource_limits",
            Self::IncreaseProcessMonitoring => "increase_process_monitoring",
            Self::IncreaseMonitoring => "increase_monitoring",
        };
        write!(f, "{name}")
    }
}

/// Remediation steps for a breach category.
pub fn remediation_plan(kind: &BreachKind) -> Vec<RemediationAction> {
    use RemediationAction as A;

    match kind {
        BreachKind::PrivilegeEscalation => vec![A::PauseContainer, A::AuditLog],
        BreachKind::SuspiciousNetworkActivity => {
            vec![A::RestrictNetworkTraffic, A::IncreaseNetworkMonitoring]
        }
        BreachKind::UnauthorizedFileAccess => vec![A::IncreaseFilesystemAuditing],
        BreachKind::ResourceExhaustion => {
            vec![A::ApplyStricterResourceLimits, A::IncreaseProcessMonitoring]
        }
        BreachKind::Other(_) => vec![A::AuditLog, A::IncreaseMonitoring],
    }
}
