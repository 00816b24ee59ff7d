//! Continuous security monitoring for running workspaces.
//!
//! A single background task wakes on a fixed interval and runs, in order,
//! resource, network, process and (with audit logging) filesystem checks.
//! Findings become alerts on a bounded channel and are fanned out to
//! subscribers; breaches are additionally routed through a remediation plan.

mod alert;
mod probe;

pub use alert::{
    remediation_plan, AlertKind, BreachKind, RemediationAction, SecurityAlert, SecurityBreach,
    Severity,
};
pub use probe::{LoggingRemediator, NoopProbe, Remediator, WorkspaceProbe};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{IsolationConfig, MonitorSettings};
use crate::sandbox::{IsolationError, ResourceManager, ResourceViolation};

/// Subscription key that receives alerts for every workspace.
pub const WILDCARD: &str = "*";

/// Callback invoked for each alert delivered to a subscription.
pub type AlertHandler = Arc<dyn Fn(SecurityAlert) -> BoxFuture<'static, ()> + Send + Sync>;

/// Operator view of the monitor's state.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityDashboard {
    /// The monitoring loop is running.
    pub monitoring_active: bool,
    /// Alerts queued on the channel since construction.
    pub total_alerts: u64,
    /// Alerts lost to a full or closed channel.
    pub dropped_alerts: u64,
    /// Breaches routed through a remediation plan.
    pub breaches_handled: u64,
    /// Violations currently held across all workspaces.
    pub total_violations: usize,
    /// Held violations counted per severity.
    pub violations_by_severity: BTreeMap<Severity, usize>,
    /// Workspaces with at least one held violation, sorted.
    pub workspaces_with_violations: Vec<String>,
    /// Registered alert callbacks.
    pub subscriptions: usize,
    /// When this snapshot was taken.
    pub generated_at: DateTime<Utc>,
}

/// Builds a `SecurityMonitor` with custom collaborators.
pub struct MonitorBuilder {
    config: IsolationConfig,
    settings: MonitorSettings,
    check_interval: Option<Duration>,
    probe: Arc<dyn WorkspaceProbe>,
    remediator: Arc<dyn Remediator>,
}

impl MonitorBuilder {
    /// Channel capacity, history cap, interval and dispatch bound.
    #[must_use]
    pub fn settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the tick interval from the settings.
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = Some(interval);
        self
    }

    /// Where samples and anomaly findings come from.
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn WorkspaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Who carries out remediation actions.
    #[must_use]
    pub fn remediator(mut self, remediator: Arc<dyn Remediator>) -> Self {
        self.remediator = remediator;
        self
    }

    /// Create the monitor and its alert channel. The loop is not started.
    pub fn build(self) -> SecurityMonitor {
        let interval = self
            .check_interval
            .unwrap_or(Duration::from_secs(self.settings.check_interval_secs))
            .max(Duration::from_millis(1));
        let capacity = self.settings.alert_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        SecurityMonitor {
            inner: Arc::new(Inner {
                resources: ResourceManager::new(self.config.clone()),
                config: self.config,
                interval,
                capacity,
                history_cap: self.settings.max_violations_per_workspace.max(1),
                probe: self.probe,
                remediator: self.remediator,
                violations: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(HashMap::new()),
                alert_tx: Mutex::new(Some(tx)),
                alert_rx: Mutex::new(Some(rx)),
                stop: Mutex::new(None),
                dispatch_permits: Arc::new(Semaphore::new(
                    self.settings.dispatch_concurrency.max(1),
                )),
                alerts_sent: AtomicU64::new(0),
                alerts_dropped: AtomicU64::new(0),
                breaches_handled: AtomicU64::new(0),
            }),
        }
    }
}

/// Supervises workspaces and turns findings into alerts and remediation.
#[derive(Clone)]
pub struct SecurityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    config: IsolationConfig,
    resources: ResourceManager,
    interval: Duration,
    capacity: usize,
    history_cap: usize,
    probe: Arc<dyn WorkspaceProbe>,
    remediator: Arc<dyn Remediator>,
    violations: RwLock<HashMap<String, VecDeque<ResourceViolation>>>,
    subscribers: RwLock<HashMap<String, Vec<AlertHandler>>>,
    alert_tx: Mutex<Option<mpsc::Sender<SecurityAlert>>>,
    alert_rx: Mutex<Option<mpsc::Receiver<SecurityAlert>>>,
    /// Present while the loop runs.
    stop: Mutex<Option<watch::Sender<bool>>>,
    dispatch_permits: Arc<Semaphore>,
    alerts_sent: AtomicU64,
    alerts_dropped: AtomicU64,
    breaches_handled: AtomicU64,
}

impl SecurityMonitor {
    /// Monitor with no probe and log-only remediation.
    pub fn new(config: IsolationConfig, settings: MonitorSettings) -> Self {
        Self::builder(config).settings(settings).build()
    }

    /// Builder with default settings, no probe and log-only remediation.
    pub fn builder(config: IsolationConfig) -> MonitorBuilder {
        MonitorBuilder {
            config,
            settings: MonitorSettings::default(),
            check_interval: None,
            probe: Arc::new(NoopProbe),
            remediator: Arc::new(LoggingRemediator),
        }
    }

    /// Take the receiving end of the alert channel.
    ///
    /// Returns `None` if it was already taken. After a stop/start cycle a
    /// fresh receiver is available.
    pub fn take_alert_receiver(&self) -> Option<mpsc::Receiver<SecurityAlert>> {
        self.inner
            .alert_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether the monitoring loop is running.
    pub fn is_running(&self) -> bool {
        self.inner
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start the monitoring loop. Does nothing if it is already running.
    ///
    /// Fails with `NoRuntime` outside a tokio runtime, leaving the monitor
    /// stopped.
    pub fn start_monitoring(&self) -> Result<(), IsolationError> {
        let mut stop = self.inner.stop.lock().unwrap_or_else(PoisonError::into_inner);
        if stop.is_some() {
            debug!("Security monitor already running");
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| IsolationError::no_runtime("start security monitoring"))?;

        {
            let mut tx = self.inner.alert_tx.lock().unwrap_or_else(PoisonError::into_inner);
            if tx.is_none() {
                let (new_tx, new_rx) = mpsc::channel(self.inner.capacity);
                *tx = Some(new_tx);
                *self
                    .inner
                    .alert_rx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(new_rx);
            }
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *stop = Some(stop_tx);
        runtime.spawn(run_loop(Arc::clone(&self.inner), stop_rx));
        info!(
            "Security monitor started (interval {:?})",
            self.inner.interval
        );
        Ok(())
    }

    /// Stop the loop and close the alert channel. Does nothing if stopped.
    pub fn stop_monitoring(&self) {
        let Some(stop) = self
            .inner
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            debug!("Security monitor already stopped");
            return;
        };

        let _ = stop.send(true);
        // Dropping the only sender closes the channel for the receiver.
        self.inner
            .alert_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!("Security monitor stopped");
    }

    /// Record a violation and emit a `resource_violation` alert.
    pub fn report_violation(&self, workspace_id: &str, violation: ResourceViolation) {
        self.inner.report_violation(workspace_id, violation);
    }

    /// Emit a `security_breach` alert and run the remediation plan.
    pub async fn report_security_breach(&self, workspace_id: &str, breach: SecurityBreach) {
        self.inner
            .report_breach(AlertKind::SecurityBreach, workspace_id, breach)
            .await;
    }

    /// Run the remediation plan for a breach, returning the actions taken.
    pub async fn handle_security_breach(
        &self,
        workspace_id: &str,
        breach: &SecurityBreach,
    ) -> Vec<RemediationAction> {
        self.inner.handle_security_breach(workspace_id, breach).await
    }

    /// Queue an alert and fan it out to subscribers. Returns false if dropped.
    pub fn send_alert(&self, alert: SecurityAlert) -> bool {
        self.inner.send_alert(alert)
    }

    /// Register a callback for a workspace, or for all with `WILDCARD`.
    pub fn subscribe<F, Fut>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(SecurityAlert) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: AlertHandler = Arc::new(move |alert| handler(alert).boxed());
        let key = key.into();
        debug!("Subscribing to alerts for {}", key);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .push(handler);
    }

    /// Drop every callback registered under `key`.
    pub fn unsubscribe(&self, key: &str) {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Snapshot of counters, held violations and subscriptions.
    pub fn security_dashboard(&self) -> SecurityDashboard {
        let inner = &self.inner;
        let mut by_severity = BTreeMap::new();
        let mut total = 0;
        let mut workspaces = Vec::new();

        {
            let violations = inner.violations.read().unwrap_or_else(PoisonError::into_inner);
            for (workspace_id, history) in violations.iter() {
                if history.is_empty() {
                    continue;
                }
                workspaces.push(workspace_id.clone());
                total += history.len();
                for violation in history {
                    *by_severity.entry(violation.severity).or_insert(0) += 1;
                }
            }
        }
        workspaces.sort();

        SecurityDashboard {
            monitoring_active: self.is_running(),
            total_alerts: inner.alerts_sent.load(Ordering::Relaxed),
            dropped_alerts: inner.alerts_dropped.load(Ordering::Relaxed),
            breaches_handled: inner.breaches_handled.load(Ordering::Relaxed),
            total_violations: total,
            violations_by_severity: by_severity,
            workspaces_with_violations: workspaces,
            subscriptions: inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .map(Vec::len)
                .sum(),
            generated_at: Utc::now(),
        }
    }

    /// Recorded violations for a workspace, oldest first.
    pub fn workspace_violations(&self, workspace_id: &str) -> Vec<ResourceViolation> {
        self.inner
            .violations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workspace_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget violations for one workspace, or for all when `workspace_id` is empty.
    pub fn clear_violations(&self, workspace_id: &str) {
        let mut violations = self
            .inner
            .violations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if workspace_id.is_empty() {
            violations.clear();
        } else {
            violations.remove(workspace_id);
        }
    }
}

async fn run_loop(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // interval fires immediately; the first check is one period out
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => inner.run_checks().await,
        }
    }
    debug!("Security monitor loop exited");
}

impl Inner {
    async fn run_checks(&self) {
        let tracked = self.probe.tracked_workspaces().await;
        let workspaces = match tracked {
            Ok(workspaces) => workspaces,
            Err(e) => {
                warn!("Failed to list tracked workspaces: {:#}", e);
                return;
            }
        };
        debug!("Running security checks for {} workspaces", workspaces.len());

        self.check_resource_usage(&workspaces).await;
        self.check_network_anomalies(&workspaces).await;
        self.check_process_anomalies(&workspaces).await;
        if self.config.enable_audit_logging {
            self.check_filesystem_access(&workspaces).await;
        }
    }

    async fn check_resource_usage(&self, workspaces: &[String]) {
        for workspace_id in workspaces {
            let usage = self.probe.resource_usage(workspace_id).await;
            match usage {
                Ok(Some(metrics)) => {
                    for violation in self.resources.validate_resource_usage(&metrics) {
                        self.report_violation(workspace_id, violation);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Resource check failed for {}: {:#}", workspace_id, e),
            }
        }
    }

    async fn check_network_anomalies(&self, workspaces: &[String]) {
        for workspace_id in workspaces {
            let found = self.probe.network_anomalies(workspace_id).await;
            match found {
                Ok(breaches) => {
                    for breach in breaches {
                        self.report_breach(AlertKind::NetworkAnomaly, workspace_id, breach)
                            .await;
                    }
                }
                Err(e) => warn!("Network check failed for {}: {:#}", workspace_id, e),
            }
        }
    }

    async fn check_process_anomalies(&self, workspaces: &[String]) {
        for workspace_id in workspaces {
            let found = self.probe.process_anomalies(workspace_id).await;
            match found {
                Ok(breaches) => {
                    for breach in breaches {
                        self.report_breach(AlertKind::ProcessAnomaly, workspace_id, breach)
                            .await;
                    }
                }
                Err(e) => warn!("Process check failed for {}: {:#}", workspace_id, e),
            }
        }
    }

    async fn check_filesystem_access(&self, workspaces: &[String]) {
        for workspace_id in workspaces {
            let found = self.probe.filesystem_access(workspace_id).await;
            match found {
                Ok(breaches) => {
                    for breach in breaches {
                        self.report_breach(AlertKind::SecurityBreach, workspace_id, breach)
                            .await;
                    }
                }
                Err(e) => warn!("Filesystem check failed for {}: {:#}", workspace_id, e),
            }
        }
    }

    fn report_violation(&self, workspace_id: &str, violation: ResourceViolation) {
        let alert = SecurityAlert::new(
            AlertKind::ResourceViolation,
            workspace_id,
            violation.severity,
            format!("{}: {}", violation.kind, violation.description),
            serde_json::to_value(&violation).unwrap_or(Value::Null),
        );

        {
            let mut violations = self.violations.write().unwrap_or_else(PoisonError::into_inner);
            let history = violations.entry(workspace_id.to_string()).or_default();
            history.push_back(violation);
            while history.len() > self.history_cap {
                history.pop_front();
            }
        }

        self.send_alert(alert);
    }

    async fn report_breach(&self, kind: AlertKind, workspace_id: &str, breach: SecurityBreach) {
        let alert = SecurityAlert::new(
            kind,
            workspace_id,
            breach.risk_level,
            format!("{}: {}", breach.kind, breach.description),
            json!({
                "breach_type": breach.kind,
                "evidence": breach.evidence,
            }),
        );
        self.send_alert(alert);
        self.handle_security_breach(workspace_id, &breach).await;
    }

    async fn handle_security_breach(
        &self,
        workspace_id: &str,
        breach: &SecurityBreach,
    ) -> Vec<RemediationAction> {
        self.breaches_handled.fetch_add(1, Ordering::Relaxed);
        let actions = remediation_plan(&breach.kind);

        match &breach.kind {
            BreachKind::PrivilegeEscalation => error!(
                "Privilege escalation in workspace {}: {}",
                workspace_id, breach.description
            ),
            BreachKind::SuspiciousNetworkActivity
            | BreachKind::UnauthorizedFileAccess
            | BreachKind::ResourceExhaustion => warn!(
                "{} in workspace {}: {}",
                breach.kind, workspace_id, breach.description
            ),
            BreachKind::Other(kind) => warn!(
                "Unhandled breach type '{}' in workspace {}: {}",
                kind, workspace_id, breach.description
            ),
        }

        let mut pause_error = None;
        for action in &actions {
            if *action == RemediationAction::AuditLog {
                info!(
                    target: "aicli_isolation::audit",
                    workspace_id,
                    breach_type = %breach.kind,
                    risk = %breach.risk_level,
                    "{}",
                    breach.description
                );
            }
            let outcome = self.remediator.remediate(workspace_id, *action, breach).await;
            if let Err(e) = outcome {
                warn!(
                    "Remediation {} failed for workspace {}: {:#}",
                    action, workspace_id, e
                );
                if *action == RemediationAction::PauseContainer {
                    pause_error = Some(format!("{e:#}"));
                }
            }
        }

        if breach.kind == BreachKind::PrivilegeEscalation {
            let message = match &pause_error {
                None => format!(
                    "Container paused after privilege escalation: {}",
                    breach.description
                ),
                Some(e) => format!(
                    "Privilege escalation, container NOT paused ({e}): {}",
                    breach.description
                ),
            };
            self.send_alert(SecurityAlert::new(
                AlertKind::SecurityBreach,
                workspace_id,
                Severity::Critical,
                message,
                json!({
                    "actions": actions,
                    "paused": pause_error.is_none(),
                    "pause_error": pause_error,
                    "evidence": breach.evidence,
                }),
            ));
        }

        actions
    }

    fn send_alert(&self, alert: SecurityAlert) -> bool {
        let queued = {
            let tx = self.alert_tx.lock().unwrap_or_else(PoisonError::into_inner);
            match tx.as_ref() {
                Some(tx) => match tx.try_send(alert.clone()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Alert channel full, dropping {} alert for workspace {}",
                            alert.kind, alert.workspace_id
                        );
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("Alert receiver dropped, discarding {} alert", alert.kind);
                        false
                    }
                },
                None => {
                    debug!("Monitor stopped, discarding {} alert", alert.kind);
                    false
                }
            }
        };

        if !queued {
            self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
        self.dispatch(&alert);
        true
    }

    fn dispatch(&self, alert: &SecurityAlert) {
        let handlers: Vec<AlertHandler> = {
            let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            let direct = (alert.workspace_id != WILDCARD)
                .then(|| subscribers.get(&alert.workspace_id))
                .flatten();
            direct
                .into_iter()
                .chain(subscribers.get(WILDCARD))
                .flatten()
                .cloned()
                .collect()
        };
        if handlers.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "No async runtime, skipping {} alert subscribers",
                handlers.len()
            );
            return;
        };

        for handler in handlers {
            let permits = Arc::clone(&self.dispatch_permits);
            let alert = alert.clone();
            runtime.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                handler(alert).await;
            });
        }
    }
}
