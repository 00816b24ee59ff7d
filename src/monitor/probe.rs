//! Collaborators the monitor samples from and delegates enforcement to.
//!
//! Real sampling (cgroup stats, conntrack, audit logs) and real enforcement
//! (pausing containers, tightening limits) belong to the caller, which owns
//! the container runtime connection. No-op implementations ship for tests
//! and for running the monitor without a runtime.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::alert::{RemediationAction, SecurityBreach};
use crate::sandbox::ResourceMetrics;

/// Source of usage samples and anomaly findings for running workspaces.
#[async_trait]
pub trait WorkspaceProbe: Send + Sync {
    /// Workspaces currently worth checking.
    async fn tracked_workspaces(&self) -> Result<Vec<String>>;

    /// Latest usage sample, if one is available.
    async fn resource_usage(&self, _workspace_id: &str) -> Result<Option<ResourceMetrics>> {
        Ok(None)
    }

    /// Suspicious network findings since the last call.
    async fn network_anomalies(&self, _workspace_id: &str) -> Result<Vec<SecurityBreach>> {
        Ok(Vec::new())
    }

    /// Suspicious process findings since the last call.
    async fn process_anomalies(&self, _workspace_id: &str) -> Result<Vec<SecurityBreach>> {
        Ok(Vec::new())
    }

    /// Only consulted when audit logging is enabled.
    async fn filesystem_access(&self, _workspace_id: &str) -> Result<Vec<SecurityBreach>> {
        Ok(Vec::new())
    }
}

/// Carries out remediation against the container runtime.
#[async_trait]
pub trait Remediator: Send + Sync {
    /// Applies `action` to the workspace's container.
    async fn remediate(
        &self,
        workspace_id: &str,
        action: RemediationAction,
        breach: &SecurityBreach,
    ) -> Result<()>;
}

/// A probe that tracks nothing.
#[derive(Debug, Default, Clone)]
pub struct NoopProbe;

#[async_trait]
impl WorkspaceProbe for NoopProbe {
    async fn tracked_workspaces(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Records the requested action in the log without enforcing anything.
#[derive(Debug, Default, Clone)]
pub struct LoggingRemediator;

#[async_trait]
impl Remediator for LoggingRemediator {
    async fn remediate(
        &self,
        workspace_id: &str,
        action: RemediationAction,
        breach: &SecurityBreach,
    ) -> Result<()> {
        warn!(
            "Remediation for workspace {} ({}): {} requested, no enforcer attached",
            workspace_id, breach.kind, action
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Severity;

    #[tokio::test]
    async fn test_noop_probe_tracks_nothing() {
        let probe = NoopProbe;
        assert!(probe.tracked_workspaces().await.unwrap().is_empty());
        assert!(probe.resource_usage("ws-1").await.unwrap().is_none());
        assert!(probe.network_anomalies("ws-1").await.unwrap().is_empty());
        assert!(probe.process_anomalies("ws-1").await.unwrap().is_empty());
        assert!(probe.filesystem_access("ws-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logging_remediator_succeeds() {
        let breach = SecurityBreach::new(
            "privilege_escalation",
            "setuid binary executed",
            Severity::Critical,
            serde_json::Value::Null,
        );
        let result = LoggingRemediator
            .remediate("ws-1", RemediationAction::PauseContainer, &breach)
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_noop_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopProbe>();
        assert_send_sync::<LoggingRemediator>();
    }
}
