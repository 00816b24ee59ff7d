//! Per-workspace isolation and resource governance for sandboxed CLI tools.
//!
//! - [`sandbox`]: resource limits, workspace networks and isolation profiles
//!   rendered into Docker container configuration
//! - [`monitor`]: background security monitoring, alerts and remediation
//! - [`notifications`]: webhook and desktop delivery of alerts
//! - [`config`]: TOML-backed policy and monitor settings

pub mod config;
pub mod monitor;
pub mod notifications;
pub mod sandbox;

pub use config::{IsolationConfig, MonitorSettings, NotificationConfig, Settings};
pub use monitor::{SecurityAlert, SecurityBreach, SecurityMonitor, Severity};
pub use sandbox::{IsolationError, IsolationManager, NetworkManager, ResourceManager};
