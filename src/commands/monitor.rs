//! Foreground security monitor.

use aicli_isolation::notifications::AlertNotifier;
use aicli_isolation::{SecurityMonitor, Settings, Severity};
use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use std::time::Duration;
use tracing::info;

use super::print_json;

/// Run the monitor until the duration elapses or Ctrl-C, printing alerts.
pub async fn run(settings: Settings, duration: u64, interval: Option<u64>) -> Result<()> {
    let mut monitor_settings = settings.monitor.clone();
    if let Some(secs) = interval {
        monitor_settings.check_interval_secs = secs.max(1);
    }

    let monitor = SecurityMonitor::new(settings.isolation.clone(), monitor_settings);
    if !settings.notifications.targets.is_empty() {
        AlertNotifier::new(settings.notifications.clone()).attach(&monitor);
    }

    let mut alerts = monitor
        .take_alert_receiver()
        .context("Alert receiver already taken")?;
    monitor.start_monitoring()?;

    let deadline = async {
        if duration == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(duration)).await;
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, stopping monitor");
                break;
            }
            alert = alerts.recv() => match alert {
                Some(alert) => println!(
                    "{} [{}] {} {}",
                    alert.timestamp.format("%H:%M:%S"),
                    paint(alert.severity),
                    alert.workspace_id.cyan(),
                    alert.message
                ),
                None => break,
            },
        }
    }

    monitor.stop_monitoring();
    print_json(&monitor.security_dashboard())
}

fn paint(severity: Severity) -> ColoredString {
    let label = severity.to_string();
    match severity {
        Severity::Info => label.normal(),
        Severity::Warning => label.yellow(),
        Severity::Error => label.red(),
        Severity::Critical => label.red().bold(),
    }
}
