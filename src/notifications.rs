//! Alert delivery to operators.
//!
//! Supports webhook POST and desktop notifications for alerts at or above
//! a configured severity. The notifier attaches to a `SecurityMonitor` as a
//! wildcard subscriber.

use anyhow::{bail, Result};
use futures_util::future::join_all;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::monitor::{SecurityAlert, SecurityMonitor, Severity, WILDCARD};

/// Where a notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Webhook(String),
    Desktop,
    Disabled,
}

impl Target {
    /// Parse a target string.
    ///
    /// Supports:
    /// - `"webhook:<url>"` - POST to webhook
    /// - `"desktop"` - Desktop notification
    /// - `"none"` - Explicitly disabled
    /// - Bare URL - Treated as webhook
    fn parse(value: &str) -> Option<Self> {
        if let Some(url) = value.strip_prefix("webhook:") {
            return (!url.is_empty()).then(|| Self::Webhook(url.to_string()));
        }
        match value {
            "desktop" => Some(Self::Desktop),
            "none" => Some(Self::Disabled),
            _ if value.starts_with("http://") || value.starts_with("https://") => {
                Some(Self::Webhook(value.to_string()))
            }
            _ => None,
        }
    }
}

/// Forwards alerts to the configured targets.
pub struct AlertNotifier {
    targets: Vec<Target>,
    min_severity: Severity,
    client: reqwest::Client,
}

impl AlertNotifier {
    /// Notifier for the configured targets. Unknown targets are logged and skipped.
    pub fn new(config: NotificationConfig) -> Self {
        let targets = config
            .targets
            .iter()
            .filter_map(|value| {
                let target = Target::parse(value);
                if target.is_none() {
                    warn!("Ignoring unrecognized notification target: {}", value);
                }
                target
            })
            .collect();
        Self {
            targets,
            min_severity: config.min_severity,
            client: reqwest::Client::new(),
        }
    }

    /// Subscribe to every alert the monitor emits.
    pub fn attach(self, monitor: &SecurityMonitor) {
        let notifier = Arc::new(self);
        monitor.subscribe(WILDCARD, move |alert| {
            let notifier = Arc::clone(&notifier);
            async move {
                notifier.notify(&alert).await;
            }
        });
    }

    /// Targets an alert would be sent to, after the severity floor.
    fn targets_for(&self, alert: &SecurityAlert) -> Vec<&Target> {
        if alert.severity < self.min_severity {
            debug!(
                "Skipping {} alert below {} threshold",
                alert.severity, self.min_severity
            );
            return Vec::new();
        }
        self.targets
            .iter()
            .filter(|target| **target != Target::Disabled)
            .collect()
    }

    /// Send an alert to every target and return how many accepted it.
    ///
    /// Failures are logged, never propagated.
    pub async fn notify(&self, alert: &SecurityAlert) -> usize {
        let targets = self.targets_for(alert);
        let delivered = join_all(targets.into_iter().map(|target| self.send(target, alert))).await;
        delivered.into_iter().filter(|ok| *ok).count()
    }

    async fn send(&self, target: &Target, alert: &SecurityAlert) -> bool {
        let result = match target {
            Target::Webhook(url) => self.send_webhook(url, alert).await,
            Target::Desktop => {
                let title = format!("Workspace {} {} alert", alert.workspace_id, alert.severity);
                send_desktop_notification(&title, &alert.message)
            }
            Target::Disabled => return false,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to deliver alert {} via {:?}: {}", alert.id, target, e);
                false
            }
        }
    }

    /// POST the alert to a webhook, retrying transient failures.
    ///
    /// Server errors, 429 responses and transport errors are retried with
    /// a doubling delay starting at `WEBHOOK_BASE_DELAY`.
    async fn send_webhook(&self, url: &str, alert: &SecurityAlert) -> Result<()> {
        let body = webhook_body(alert);
        let mut delay = WEBHOOK_BASE_DELAY;
        let mut failure = String::from("no attempt made");

        for attempt in 1..=WEBHOOK_ATTEMPTS {
            match self.client.post(url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Alert {} delivered to {}", alert.id, url);
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    if !is_retryable(status) {
                        bail!("webhook rejected alert with {status}: {text}");
                    }
                    failure = format!("{status}: {text}");
                }
                Err(e) => failure = e.to_string(),
            }

            if attempt < WEBHOOK_ATTEMPTS {
                debug!(
                    "Webhook attempt {}/{} failed ({}), retrying in {:?}",
                    attempt, WEBHOOK_ATTEMPTS, failure, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        bail!("webhook gave up after {WEBHOOK_ATTEMPTS} attempts: {failure}")
    }
}

const WEBHOOK_ATTEMPTS: u32 = 3;
const WEBHOOK_BASE_DELAY: Duration = Duration::from_secs(2);

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn webhook_body(alert: &SecurityAlert) -> Value {
    json!({
        "event": alert.kind,
        "alert_id": alert.id,
        "workspace_id": alert.workspace_id,
        "severity": alert.severity,
        "message": alert.message,
        "timestamp": alert.timestamp.to_rfc3339(),
        "payload": alert.payload,
    })
}

/// Pop a desktop notification with whichever notifier the host has.
fn send_desktop_notification(title: &str, body: &str) -> Result<()> {
    let escape = |text: &str| text.replace('"', "\\\"");
    let script = format!(
        "display notification \"{}\" with title \"{}\"",
        escape(body),
        escape(title)
    );

    let attempts: [(&str, Vec<&str>); 2] = [
        ("notify-send", vec!["--urgency=critical", title, body]),
        ("osascript", vec!["-e", &script]),
    ];
    for (program, args) in &attempts {
        if Command::new(program).args(args).output().is_ok() {
            return Ok(());
        }
    }

    bail!("no desktop notifier found (tried notify-send and osascript)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::AlertKind;

    fn alert(severity: Severity) -> SecurityAlert {
        SecurityAlert::new(
            AlertKind::SecurityBreach,
            "ws-1",
            severity,
            "test alert",
            Value::Null,
        )
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(
            Target::parse("webhook:https://example.com/hook"),
            Some(Target::Webhook("https://example.com/hook".to_string()))
        );
        assert_eq!(
            Target::parse("https://example.com/hook"),
            Some(Target::Webhook("https://example.com/hook".to_string()))
        );
        assert_eq!(Target::parse("desktop"), Some(Target::Desktop));
        assert_eq!(Target::parse("none"), Some(Target::Disabled));
        assert_eq!(Target::parse("webhook:"), None);
        assert_eq!(Target::parse("carrier-pigeon"), None);
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_webhook_body_carries_alert_fields() {
        let alert = alert(Severity::Error);
        let body = webhook_body(&alert);
        assert_eq!(body["event"], "security_breach");
        assert_eq!(body["workspace_id"], "ws-1");
        assert_eq!(body["severity"], "error");
        assert_eq!(body["alert_id"], alert.id.to_string());
    }

    fn notifier(targets: &[&str], min_severity: Severity) -> AlertNotifier {
        AlertNotifier::new(NotificationConfig {
            targets: targets.iter().map(ToString::to_string).collect(),
            min_severity,
        })
    }

    #[tokio::test]
    async fn test_notify_without_targets() {
        let notifier = notifier(&[], Severity::Info);
        assert!(notifier.targets_for(&alert(Severity::Critical)).is_empty());
        assert_eq!(notifier.notify(&alert(Severity::Critical)).await, 0);
    }

    #[test]
    fn test_severity_floor_selects_targets() {
        let notifier = notifier(&["desktop", "webhook:https://example.com/hook"], Severity::Error);
        assert!(notifier.targets_for(&alert(Severity::Warning)).is_empty());
        assert_eq!(
            notifier.targets_for(&alert(Severity::Error)),
            vec![
                &Target::Desktop,
                &Target::Webhook("https://example.com/hook".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_notify_below_threshold_sends_nothing() {
        let notifier = notifier(&["webhook:http://127.0.0.1:9/hook"], Severity::Critical);
        assert_eq!(notifier.notify(&alert(Severity::Warning)).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_targets_are_dropped() {
        let notifier = notifier(&["none", "bogus", "webhook:"], Severity::Info);
        assert!(notifier.targets.contains(&Target::Disabled));
        assert!(notifier.targets_for(&alert(Severity::Error)).is_empty());
        assert_eq!(notifier.notify(&alert(Severity::Error)).await, 0);
    }

    #[tokio::test]
    async fn test_attach_registers_wildcard_subscriber() {
        let monitor = SecurityMonitor::new(Default::default(), Default::default());
        AlertNotifier::new(NotificationConfig::default()).attach(&monitor);
        assert_eq!(monitor.security_dashboard().subscriptions, 1);
    }
}
