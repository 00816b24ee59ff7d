//! Container sandbox configuration for workspaces.
//!
//! Computes isolation profiles with resource limits, dedicated networks
//! and capability/MAC settings, and renders them into Docker create-time
//! configuration.

mod error;
mod isolation;
mod network;
mod resources;

pub use error::IsolationError;
pub use isolation::{
    IsolationLevel, IsolationManager, MonitoringConfig, NetworkMode, SecurityOptions, Workspace,
    WorkspaceHandle, WorkspaceIsolation, ISOLATION_LEVEL_LABEL, RUNTIME_DEFAULT_SECCOMP,
    WORKSPACE_ID_LABEL,
};
pub use network::{
    allocate_subnet, gateway_ip, network_name, try_gateway_ip, ExposedPorts, FirewallRule,
    NetworkInfo, NetworkManager, NetworkSampler, NetworkSecurityPolicy, NetworkStats,
    NoopNetworkSampler, PortBindings, PortMappingRequest, TrafficCounters, NETWORK_PREFIX,
    NETWORK_SAMPLE_INTERVAL, WORKSPACE_LABEL,
};
pub use resources::{
    device_cgroup_rules, ResourceLimits, ResourceManager, ResourceMetrics, ResourceRequest,
    ResourceViolation, ViolationKind, WorkloadType, BLKIO_WEIGHT, DEFAULT_CPU_PERIOD,
    DEFAULT_CPU_SHARES, MIN_MEMORY_BYTES, PRESET_NAMES, UNLIMITED_SWAP,
};
