//! Configuration for the isolation subsystem.
//!
//! Everything is loaded once at startup from TOML. `IsolationConfig` is the
//! process-wide policy shared by every manager; the monitor and notifier
//! sections tune the supervisory loop.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::monitor::Severity;
use crate::sandbox::IsolationError;

const CONFIG_FILE: &str = "aicli-isolation.toml";

const MIB: i64 = 1024 * 1024;

/// Everything read from `aicli-isolation.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Isolation policy shared by every manager.
    #[serde(default)]
    pub isolation: IsolationConfig,
    /// Supervisory loop tuning.
    #[serde(default)]
    pub monitor: MonitorSettings,
    /// Where alerts are forwarded.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Process-wide isolation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Give each workspace its own bridge network
    #[serde(default = "default_true")]
    pub enable_network_isolation: bool,

    /// Networks a workspace may be attached to besides its own
    #[serde(default = "default_allowed_networks")]
    pub allowed_networks: Vec<String>,

    /// Host ports that may never be published
    #[serde(default = "default_blocked_ports")]
    pub blocked_ports: Vec<u16>,

    /// Default CPU limit in cores (e.g. 1.5)
    #[serde(default = "default_cpu_limit")]
    pub default_cpu_limit: f64,

    /// Default memory limit in bytes
    #[serde(default = "default_memory_limit")]
    pub default_memory_limit: i64,

    /// Default disk quota (e.g. "10G")
    #[serde(default = "default_disk_quota")]
    pub default_disk_quota: String,

    /// Apply the runtime's default seccomp profile
    #[serde(default = "default_true")]
    pub enable_seccomp: bool,

    /// Confine containers with the `docker-default` AppArmor profile
    #[serde(default = "default_true")]
    pub enable_apparmor: bool,

    /// When false, containers are never privileged and get `no-new-privileges`
    #[serde(default)]
    pub allow_privilege_escalation: bool,

    /// Mount the container root filesystem read-only
    #[serde(default)]
    pub read_only_root_fs: bool,

    /// Enables filesystem-access checks in the monitor
    #[serde(default = "default_true")]
    pub enable_audit_logging: bool,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            enable_network_isolation: true,
            allowed_networks: default_allowed_networks(),
            blocked_ports: default_blocked_ports(),
            default_cpu_limit: default_cpu_limit(),
            default_memory_limit: default_memory_limit(),
            default_disk_quota: default_disk_quota(),
            enable_seccomp: true,
            enable_apparmor: true,
            allow_privilege_escalation: false,
            read_only_root_fs: false,
            enable_audit_logging: true,
        }
    }
}

impl IsolationConfig {
    /// Checks that the policy is usable before it replaces the current one.
    pub fn validate(&self) -> Result<(), IsolationError> {
        if !self.default_cpu_limit.is_finite() || self.default_cpu_limit <= 0.0 {
            return Err(IsolationError::invalid_input(format!(
                "default CPU limit must be positive, got {}",
                self.default_cpu_limit
            )));
        }
        if self.default_memory_limit < 4 * MIB {
            return Err(IsolationError::policy_violation(format!(
                "default memory limit must be at least 4MiB, got {} bytes",
                self.default_memory_limit
            )));
        }
        if self.blocked_ports.contains(&0) {
            return Err(IsolationError::invalid_input(
                "blocked ports must be in range 1-65535",
            ));
        }
        Ok(())
    }
}

/// Monitor loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Seconds between monitor ticks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Capacity of the buffered alert channel
    #[serde(default = "default_alert_capacity")]
    pub alert_capacity: usize,

    /// Oldest violations are rotated out past this many per workspace
    #[serde(default = "default_history_cap")]
    pub max_violations_per_workspace: usize,

    /// Upper bound on concurrently running subscriber callbacks
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            alert_capacity: default_alert_capacity(),
            max_violations_per_workspace: default_history_cap(),
            dispatch_concurrency: default_dispatch_concurrency(),
        }
    }
}

/// Alert forwarding settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Notification targets: "webhook:<url>", bare http(s) URL, "desktop" or "none"
    #[serde(default)]
    pub targets: Vec<String>,

    /// Alerts below this severity are not forwarded
    #[serde(default)]
    pub min_severity: Severity,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_allowed_networks() -> Vec<String> {
    vec!["bridge".to_string()]
}

fn default_blocked_ports() -> Vec<u16> {
    vec![22, 23, 135, 139, 445, 3389]
}

fn default_cpu_limit() -> f64 {
    1.0
}

fn default_memory_limit() -> i64 {
    512 * MIB
}

fn default_disk_quota() -> String {
    "10G".to_string()
}

fn default_check_interval() -> u64 {
    30
}

fn default_alert_capacity() -> usize {
    100
}

fn default_history_cap() -> usize {
    1000
}

fn default_dispatch_concurrency() -> usize {
    16
}

impl Settings {
    /// Load settings from an explicit path, or from the first standard
    /// location that exists, falling back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => match Self::discover() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        settings
            .isolation
            .validate()
            .with_context(|| format!("Invalid isolation policy in {}", path.display()))?;

        Ok(settings)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        let user = dirs::config_dir()?.join("aicli").join("isolation.toml");
        user.exists().then_some(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IsolationConfig::default();
        assert!(config.enable_network_isolation);
        assert!(config.blocked_ports.contains(&22));
        assert!(!config.allow_privilege_escalation);
        assert_eq!(config.default_memory_limit, 512 * MIB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_settings() {
        let toml = r#"
[isolation]
blocked_ports = [22, 2375]
default_cpu_limit = 2.0
read_only_root_fs = true

[monitor]
check_interval_secs = 5

[notifications]
targets = ["desktop"]
min_severity = "critical"
"#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.isolation.blocked_ports, vec![22, 2375]);
        assert!((settings.isolation.default_cpu_limit - 2.0).abs() < f64::EPSILON);
        assert!(settings.isolation.read_only_root_fs);
        assert!(settings.isolation.enable_seccomp);
        assert_eq!(settings.monitor.check_interval_secs, 5);
        assert_eq!(settings.monitor.alert_capacity, 100);
        assert_eq!(settings.notifications.min_severity, Severity::Critical);
    }

    #[test]
    fn test_validate_rejects_bad_policy() {
        let config = IsolationConfig {
            default_cpu_limit: 0.0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_invalid_input());

        let config = IsolationConfig {
            default_memory_limit: MIB,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_policy_violation());
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load(Some(&dir.path().join("nope.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("isolation.toml");
        fs::write(&path, "[isolation]\nenable_audit_logging = false\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert!(!settings.isolation.enable_audit_logging);
    }
}
