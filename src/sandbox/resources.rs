//! CPU, memory, process and I/O limits for workspace containers.
//!
//! Limits are computed from the isolation policy, tuned per workload, and
//! rendered into the Docker resource vocabulary. Live usage samples are
//! evaluated here too, against fixed hard-violation thresholds.

use bollard::service::Resources;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::IsolationError;
use crate::config::IsolationConfig;
use crate::monitor::Severity;

const MIB: i64 = 1024 * 1024;

/// CFS scheduling period used for every quota we compute.
pub const DEFAULT_CPU_PERIOD: i64 = 100_000;

/// Relative CPU weight given to workspace containers.
pub const DEFAULT_CPU_SHARES: i64 = 1024;

/// Block-I/O weight written into every container.
pub const BLKIO_WEIGHT: u16 = 500;

/// Smallest memory ceiling Docker accepts.
pub const MIN_MEMORY_BYTES: i64 = 4 * MIB;

/// Sentinel for unlimited swap.
pub const UNLIMITED_SWAP: i64 = -1;

/// Devices every workspace may use: null, zero, urandom, ptmx and the pts range.
const DEVICE_CGROUP_RULES: &[&str] = &[
    "c 1:3 rwm",
    "c 1:5 rwm",
    "c 1:9 rwm",
    "c 5:2 rwm",
    "c 136:* rwm",
];

// Hard-violation band for live samples.
const CPU_USAGE_THRESHOLD: f64 = 90.0;
const MEMORY_USAGE_THRESHOLD: f64 = 85.0;
const NETWORK_IO_THRESHOLD: u64 = 100 * 1024 * 1024;
const DISK_IO_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Resource ceilings for one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Relative CPU weight.
    pub cpu_shares: i64,
    /// Microseconds of CPU time per `cpu_period`.
    pub cpu_quota: i64,
    /// CFS period in microseconds.
    pub cpu_period: i64,
    /// Bytes.
    pub memory: i64,
    /// Memory plus swap in bytes, or `UNLIMITED_SWAP`.
    pub memory_swap: i64,
    /// Maximum number of processes.
    pub pids_limit: i64,
    /// Docker-style rate string such as "100m".
    pub io_max_bandwidth: String,
    /// Maximum I/O operations per second.
    pub io_max_iops: i64,
}

impl ResourceLimits {
    fn with_cores(cores: f64, memory: i64, pids_limit: i64, iops: i64) -> Self {
        Self {
            cpu_shares: DEFAULT_CPU_SHARES,
            cpu_quota: cores_to_quota(cores),
            cpu_period: DEFAULT_CPU_PERIOD,
            memory,
            memory_swap: memory,
            pids_limit,
            io_max_bandwidth: "100m".to_string(),
            io_max_iops: iops,
        }
    }

    /// CPU ceiling expressed in cores.
    #[allow(clippy::cast_precision_loss)]
    pub fn cpu_cores(&self) -> f64 {
        if self.cpu_period <= 0 {
            return 0.0;
        }
        self.cpu_quota as f64 / self.cpu_period as f64
    }
}

#[allow(clippy::cast_possible_truncation)]
fn cores_to_quota(cores: f64) -> i64 {
    (cores * DEFAULT_CPU_PERIOD as f64).round() as i64
}

/// Caller overrides for custom limits. Zero or empty fields keep the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// CPU ceiling in cores.
    #[serde(default)]
    pub cpu_cores: f64,
    /// Memory ceiling in bytes.
    #[serde(default)]
    pub memory_bytes: i64,
    /// Maximum number of processes.
    #[serde(default)]
    pub pids_limit: i64,
    /// Docker-style rate string such as "200m".
    #[serde(default)]
    pub io_bandwidth: String,
    /// Maximum I/O operations per second.
    #[serde(default)]
    pub io_iops: i64,
}

/// A single live usage sample for one container.
///
/// Network and disk figures are rates in bytes per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// CPU use as a percentage of the ceiling.
    pub cpu_percent: f64,
    /// Resident memory in bytes.
    pub memory_usage: u64,
    /// Zero when the container has no memory ceiling.
    pub memory_limit: u64,
    /// Network receive rate.
    pub network_rx_bytes: u64,
    /// Network transmit rate.
    pub network_tx_bytes: u64,
    /// Disk read rate.
    pub disk_read_bytes: u64,
    /// Disk write rate.
    pub disk_write_bytes: u64,
    /// Number of live processes.
    pub pids: u64,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl Default for ResourceMetrics {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            memory_usage: 0,
            memory_limit: 0,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            pids: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Which threshold a sample crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// CPU above the hard threshold.
    CpuHighUsage,
    /// Memory above the hard threshold.
    MemoryHighUsage,
    /// Network traffic above the hard threshold.
    NetworkHighIo,
    /// Disk traffic above the hard threshold.
    DiskHighIo,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CpuHighUsage => write!(f, "cpu_high_usage"),
            Self::MemoryHighUsage => write!(f, "memory_high_usage"),
            Self::NetworkHighIo => write!(f, "network_high_io"),
            Self::DiskHighIo => write!(f, "disk_high_io"),
        }
    }
}

/// A threshold breach found in a usage sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceViolation {
    /// Which threshold was crossed.
    pub kind: ViolationKind,
    /// The threshold in the sample's unit.
    pub threshold: f64,
    /// The measured value.
    pub actual: f64,
    /// Human-readable summary.
    pub description: String,
    /// How serious the breach is.
    pub severity: Severity,
    /// When the violation was found.
    pub timestamp: DateTime<Utc>,
}

/// Workload classes with their own baseline limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    /// Interactive editing and small builds.
    #[default]
    Development,
    /// Compilers and bundlers.
    Build,
    /// Test suites.
    Test,
    /// Long-running services.
    Production,
}

impl WorkloadType {
    fn baseline(self) -> ResourceLimits {
        match self {
            Self::Development => ResourceLimits::with_cores(2.0, 1024 * MIB, 200, 1000),
            Self::Build => ResourceLimits::with_cores(4.0, 2048 * MIB, 500, 2000),
            Self::Test => ResourceLimits::with_cores(1.0, 512 * MIB, 100, 1000),
            Self::Production => ResourceLimits::with_cores(1.5, 1024 * MIB, 300, 1500),
        }
    }
}

impl std::fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Build => write!(f, "build"),
            Self::Test => write!(f, "test"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for WorkloadType {
    type Err = IsolationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "build" => Ok(Self::Build),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(IsolationError::invalid_input(format!(
                "unknown workload type '{s}'. Supported: development, build, test, production"
            ))),
        }
    }
}

/// Names accepted by `ResourceManager::get_resource_limit_preset`.
pub const PRESET_NAMES: &[&str] = &["minimal", "small", "medium", "large"];

/// Computes and checks resource limits under one isolation policy.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    config: IsolationConfig,
}

impl ResourceManager {
    /// Manager bound to `config`.
    pub fn new(config: IsolationConfig) -> Self {
        Self { config }
    }

    /// Limits straight from the policy defaults.
    pub fn create_resource_limits(&self) -> ResourceLimits {
        ResourceLimits::with_cores(
            self.config.default_cpu_limit,
            self.config.default_memory_limit,
            100,
            1000,
        )
    }

    /// Default limits with every positive field of `request` applied on top.
    pub fn create_custom_resource_limits(&self, request: &ResourceRequest) -> ResourceLimits {
        let mut limits = self.create_resource_limits();

        if request.cpu_cores > 0.0 {
            limits.cpu_quota = cores_to_quota(request.cpu_cores);
        }
        if request.memory_bytes > 0 {
            limits.memory = request.memory_bytes;
            limits.memory_swap = request.memory_bytes;
        }
        if request.pids_limit > 0 {
            limits.pids_limit = request.pids_limit;
        }
        if !request.io_bandwidth.is_empty() {
            limits.io_max_bandwidth.clone_from(&request.io_bandwidth);
        }
        if request.io_iops > 0 {
            limits.io_max_iops = request.io_iops;
        }

        limits
    }

    /// Render limits as Docker resource constraints.
    pub fn to_runtime_resources(&self, limits: &ResourceLimits) -> Resources {
        Resources {
            cpu_shares: Some(limits.cpu_shares),
            cpu_quota: Some(limits.cpu_quota),
            cpu_period: Some(limits.cpu_period),
            memory: Some(limits.memory),
            memory_swap: Some(limits.memory_swap),
            pids_limit: (limits.pids_limit > 0).then_some(limits.pids_limit),
            blkio_weight: Some(BLKIO_WEIGHT),
            device_cgroup_rules: Some(device_cgroup_rules()),
            ..Default::default()
        }
    }

    /// Check limits against the invariants Docker and the policy impose.
    pub fn validate_resource_limits(&self, limits: &ResourceLimits) -> Result<(), IsolationError> {
        if limits.cpu_shares < 0 {
            return Err(IsolationError::invalid_input(format!(
                "CPU shares cannot be negative: {}",
                limits.cpu_shares
            )));
        }
        if limits.cpu_quota < 0 {
            return Err(IsolationError::invalid_input(format!(
                "CPU quota cannot be negative: {}",
                limits.cpu_quota
            )));
        }
        if limits.cpu_period <= 0 {
            return Err(IsolationError::invalid_input(format!(
                "CPU period must be positive: {}",
                limits.cpu_period
            )));
        }
        if limits.memory < 0 {
            return Err(IsolationError::invalid_input(format!(
                "memory limit cannot be negative: {}",
                limits.memory
            )));
        }
        if limits.memory > 0 && limits.memory < MIN_MEMORY_BYTES {
            return Err(IsolationError::policy_violation(format!(
                "memory limit must be at least 4MiB, got {} bytes",
                limits.memory
            )));
        }
        if limits.memory_swap != UNLIMITED_SWAP && limits.memory_swap < limits.memory {
            return Err(IsolationError::policy_violation(format!(
                "memory+swap limit ({}) must not be below memory limit ({})",
                limits.memory_swap, limits.memory
            )));
        }
        if limits.pids_limit < 0 {
            return Err(IsolationError::invalid_input(format!(
                "PIDs limit cannot be negative: {}",
                limits.pids_limit
            )));
        }
        if limits.io_max_iops < 0 {
            return Err(IsolationError::invalid_input(format!(
                "IOPS limit cannot be negative: {}",
                limits.io_max_iops
            )));
        }
        Ok(())
    }

    /// Evaluate one usage sample against the hard-violation thresholds.
    #[allow(clippy::cast_precision_loss)]
    pub fn validate_resource_usage(&self, metrics: &ResourceMetrics) -> Vec<ResourceViolation> {
        let mut violations = Vec::new();
        let now = Utc::now();

        if metrics.cpu_percent > CPU_USAGE_THRESHOLD {
            violations.push(ResourceViolation {
                kind: ViolationKind::CpuHighUsage,
                threshold: CPU_USAGE_THRESHOLD,
                actual: metrics.cpu_percent,
                description: format!("CPU usage is {:.1}%", metrics.cpu_percent),
                severity: Severity::Warning,
                timestamp: now,
            });
        }

        if metrics.memory_limit > 0 {
            let percent = metrics.memory_usage as f64 / metrics.memory_limit as f64 * 100.0;
            if percent > MEMORY_USAGE_THRESHOLD {
                violations.push(ResourceViolation {
                    kind: ViolationKind::MemoryHighUsage,
                    threshold: MEMORY_USAGE_THRESHOLD,
                    actual: percent,
                    description: format!("Memory usage is {percent:.1}% of limit"),
                    severity: Severity::Warning,
                    timestamp: now,
                });
            }
        }

        let network = metrics
            .network_rx_bytes
            .saturating_add(metrics.network_tx_bytes);
        if network > NETWORK_IO_THRESHOLD {
            violations.push(ResourceViolation {
                kind: ViolationKind::NetworkHighIo,
                threshold: NETWORK_IO_THRESHOLD as f64,
                actual: network as f64,
                description: format!("Network I/O is {} bytes/s", network),
                severity: Severity::Info,
                timestamp: now,
            });
        }

        let disk = metrics
            .disk_read_bytes
            .saturating_add(metrics.disk_write_bytes);
        if disk > DISK_IO_THRESHOLD {
            violations.push(ResourceViolation {
                kind: ViolationKind::DiskHighIo,
                threshold: DISK_IO_THRESHOLD as f64,
                actual: disk as f64,
                description: format!("Disk I/O is {} bytes/s", disk),
                severity: Severity::Info,
                timestamp: now,
            });
        }

        violations
    }

    /// Baseline limits for a workload, raised (never lowered) to fit the
    /// observed history.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn calculate_optimal_limits(
        &self,
        workload: WorkloadType,
        history: &[ResourceMetrics],
    ) -> ResourceLimits {
        let mut limits = workload.baseline();
        if history.is_empty() {
            return limits;
        }

        let samples = history.len() as f64;
        let avg_cores = history.iter().map(|m| m.cpu_percent / 100.0).sum::<f64>() / samples;
        let avg_memory = history.iter().map(|m| m.memory_usage as f64).sum::<f64>() / samples;

        let cpu_quota = (avg_cores * 1.5 * limits.cpu_period as f64).round() as i64;
        if cpu_quota > limits.cpu_quota {
            debug!(
                "Raising {} CPU quota from {} to {} based on {} samples",
                workload,
                limits.cpu_quota,
                cpu_quota,
                history.len()
            );
            limits.cpu_quota = cpu_quota;
        }

        let memory = (avg_memory * 1.2).round() as i64;
        if memory > limits.memory {
            debug!(
                "Raising {} memory from {} to {} based on {} samples",
                workload,
                limits.memory,
                memory,
                history.len()
            );
            limits.memory = memory;
            limits.memory_swap = memory;
        }

        limits
    }

    /// Named tier of hand-tuned limits. Unknown names get the policy defaults.
    pub fn get_resource_limit_preset(&self, name: &str) -> ResourceLimits {
        match name.to_lowercase().as_str() {
            "minimal" => ResourceLimits {
                io_max_bandwidth: "50m".to_string(),
                ..ResourceLimits::with_cores(0.5, 256 * MIB, 50, 500)
            },
            "small" => ResourceLimits::with_cores(1.0, 512 * MIB, 100, 1000),
            "medium" => ResourceLimits {
                io_max_bandwidth: "200m".to_string(),
                ..ResourceLimits::with_cores(2.0, 1024 * MIB, 200, 1500)
            },
            "large" => ResourceLimits {
                io_max_bandwidth: "500m".to_string(),
                ..ResourceLimits::with_cores(4.0, 2048 * MIB, 500, 2000)
            },
            other => {
                debug!("Unknown preset '{}', using policy defaults", other);
                self.create_resource_limits()
            }
        }
    }
}

/// Device cgroup allow-list written into every container.
pub fn device_cgroup_rules() -> Vec<String> {
    DEVICE_CGROUP_RULES.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ResourceManager {
        ResourceManager::new(IsolationConfig::default())
    }

    fn sample(cpu: f64, memory_usage: u64, memory_limit: u64, net: u64, disk: u64) -> ResourceMetrics {
        ResourceMetrics {
            cpu_percent: cpu,
            memory_usage,
            memory_limit,
            network_rx_bytes: net / 2,
            network_tx_bytes: net - net / 2,
            disk_read_bytes: disk / 2,
            disk_write_bytes: disk - disk / 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_resource_limits_from_defaults() {
        let limits = manager().create_resource_limits();
        assert_eq!(limits.cpu_quota, 100_000);
        assert_eq!(limits.cpu_period, DEFAULT_CPU_PERIOD);
        assert_eq!(limits.memory, 512 * MIB);
        assert_eq!(limits.pids_limit, 100);
        assert_eq!(limits.io_max_iops, 1000);
        assert_eq!(limits.io_max_bandwidth, "100m");
        assert!(manager().validate_resource_limits(&limits).is_ok());
    }

    #[test]
    fn test_custom_limits_override_only_set_fields() {
        let request = ResourceRequest {
            cpu_cores: 2.5,
            memory_bytes: 1024 * MIB,
            ..Default::default()
        };
        let limits = manager().create_custom_resource_limits(&request);
        assert_eq!(limits.cpu_quota, 250_000);
        assert_eq!(limits.memory, 1024 * MIB);
        assert_eq!(limits.memory_swap, 1024 * MIB);
        assert_eq!(limits.pids_limit, 100);
        assert_eq!(limits.io_max_bandwidth, "100m");
    }

    #[test]
    fn test_to_runtime_resources() {
        let rm = manager();
        let resources = rm.to_runtime_resources(&rm.create_resource_limits());
        assert_eq!(resources.cpu_quota, Some(100_000));
        assert_eq!(resources.memory, Some(512 * MIB));
        assert_eq!(resources.pids_limit, Some(100));
        assert_eq!(resources.blkio_weight, Some(BLKIO_WEIGHT));
        let rules = resources.device_cgroup_rules.unwrap();
        assert!(rules.contains(&"c 1:3 rwm".to_string()));
        assert!(rules.contains(&"c 136:* rwm".to_string()));
    }

    #[test]
    fn test_to_runtime_resources_omits_zero_pids() {
        let rm = manager();
        let limits = ResourceLimits {
            pids_limit: 0,
            ..rm.create_resource_limits()
        };
        assert_eq!(rm.to_runtime_resources(&limits).pids_limit, None);
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let rm = manager();
        let base = rm.create_resource_limits();

        let cases = [
            ResourceLimits { memory: -1, ..base.clone() },
            ResourceLimits { cpu_period: 0, ..base.clone() },
            ResourceLimits { cpu_shares: -5, ..base.clone() },
            ResourceLimits { pids_limit: -1, ..base.clone() },
            ResourceLimits { cpu_quota: -1, ..base.clone() },
            ResourceLimits { memory: MIB, memory_swap: MIB, ..base.clone() },
            ResourceLimits { memory_swap: base.memory - 1, ..base.clone() },
        ];
        for limits in &cases {
            assert!(rm.validate_resource_limits(limits).is_err(), "{limits:?}");
        }
    }

    #[test]
    fn test_validate_accepts_floor_and_unlimited_swap() {
        let rm = manager();
        let base = rm.create_resource_limits();
        let floor = ResourceLimits {
            memory: MIN_MEMORY_BYTES,
            memory_swap: MIN_MEMORY_BYTES,
            ..base.clone()
        };
        assert!(rm.validate_resource_limits(&floor).is_ok());

        let unlimited = ResourceLimits {
            memory_swap: UNLIMITED_SWAP,
            ..base
        };
        assert!(rm.validate_resource_limits(&unlimited).is_ok());
    }

    #[test]
    fn test_usage_over_every_threshold() {
        let limit = 1024 * 1024 * 1024;
        let metrics = sample(95.0, limit * 9 / 10, limit, 110 * 1024 * 1024, 55 * 1024 * 1024);
        let violations = manager().validate_resource_usage(&metrics);
        let kinds: Vec<_> = violations.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ViolationKind::CpuHighUsage,
                ViolationKind::MemoryHighUsage,
                ViolationKind::NetworkHighIo,
                ViolationKind::DiskHighIo,
            ]
        );
        assert_eq!(violations[0].severity, Severity::Warning);
        assert_eq!(violations[2].severity, Severity::Info);
    }

    #[test]
    fn test_usage_at_half_thresholds_is_clean() {
        let limit = 1024 * 1024 * 1024;
        let metrics = sample(45.0, limit * 425 / 1000, limit, 50 * 1024 * 1024, 25 * 1024 * 1024);
        assert!(manager().validate_resource_usage(&metrics).is_empty());
    }

    #[test]
    fn test_memory_check_skipped_without_limit() {
        let metrics = sample(10.0, u64::MAX / 2, 0, 0, 0);
        assert!(manager().validate_resource_usage(&metrics).is_empty());
    }

    #[test]
    fn test_optimal_limits_baseline_without_history() {
        let limits = manager().calculate_optimal_limits(WorkloadType::Build, &[]);
        assert_eq!(limits.cpu_quota, 400_000);
        assert_eq!(limits.memory, 2048 * MIB);
        assert_eq!(limits.pids_limit, 500);
        assert_eq!(limits.io_max_iops, 2000);
    }

    #[test]
    fn test_optimal_limits_raise_above_baseline() {
        let heavy = ResourceMetrics {
            cpu_percent: 200.0,
            memory_usage: 1024 * 1024 * 1024,
            ..Default::default()
        };
        let limits = manager().calculate_optimal_limits(WorkloadType::Test, &[heavy.clone(), heavy]);
        // 2 cores * 1.5
        assert_eq!(limits.cpu_quota, 300_000);
        assert_eq!(limits.memory, (1024.0 * 1024.0 * 1024.0 * 1.2_f64).round() as i64);
    }

    #[test]
    fn test_optimal_limits_never_lower() {
        let idle = ResourceMetrics {
            cpu_percent: 1.0,
            memory_usage: 1024,
            ..Default::default()
        };
        let limits = manager().calculate_optimal_limits(WorkloadType::Production, &[idle]);
        assert_eq!(limits.cpu_quota, 150_000);
        assert_eq!(limits.memory, 1024 * MIB);
    }

    #[test]
    fn test_presets() {
        let rm = manager();
        let small = rm.get_resource_limit_preset("small");
        assert_eq!(small.cpu_quota, 100_000);
        assert_eq!(small.memory, 512 * MIB);
        assert_eq!(small.pids_limit, 100);

        let large = rm.get_resource_limit_preset("large");
        assert_eq!(large.cpu_quota, 400_000);
        assert_eq!(large.memory, 2048 * MIB);
        assert_eq!(large.pids_limit, 500);

        assert_eq!(rm.get_resource_limit_preset("bogus"), rm.create_resource_limits());

        for name in PRESET_NAMES {
            assert!(rm.validate_resource_limits(&rm.get_resource_limit_preset(name)).is_ok());
        }
    }

    #[test]
    fn test_workload_type_from_str() {
        assert_eq!("build".parse::<WorkloadType>().unwrap(), WorkloadType::Build);
        assert_eq!("Prod".parse::<WorkloadType>().unwrap(), WorkloadType::Production);
        assert!("batch".parse::<WorkloadType>().is_err());
    }
}
