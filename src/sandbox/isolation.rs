//! Isolation profiles and their translation into Docker create-time config.
//!
//! A `WorkspaceIsolation` bundles the resource limits, security options,
//! network binding and monitoring thresholds for one workspace. Callers
//! apply it to the `Config`/`HostConfig` pair they pass to
//! `create_container`; this module never talks to the daemon itself.

use bollard::container::Config as ContainerConfig;
use bollard::service::HostConfig;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use super::network::{network_name, NetworkManager};
use super::resources::{device_cgroup_rules, ResourceLimits, ResourceManager, BLKIO_WEIGHT};
use super::IsolationError;
use crate::config::IsolationConfig;

/// Container label carrying the workspace ID.
pub const WORKSPACE_ID_LABEL: &str = "aicli.workspace.id";

/// Container label carrying the isolation level.
pub const ISOLATION_LEVEL_LABEL: &str = "aicli.isolation.level";

/// Seccomp profile name meaning "whatever the runtime applies by default".
pub const RUNTIME_DEFAULT_SECCOMP: &str = "default";

const DEFAULT_APPARMOR_PROFILE: &str = "docker-default";
const UNCONFINED: &str = "unconfined";

const MIB: i64 = 1024 * 1024;

/// Anything that identifies a workspace.
pub trait WorkspaceHandle {
    /// Stable, non-empty workspace identifier.
    fn workspace_id(&self) -> &str;
}

impl WorkspaceHandle for String {
    fn workspace_id(&self) -> &str {
        self
    }
}

/// Minimal workspace record for callers without their own type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Stable identifier.
    pub id: String,
    /// Display name, defaulting to the ID.
    #[serde(default)]
    pub name: String,
}

impl Workspace {
    /// Workspace named after its ID.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }
}

impl WorkspaceHandle for Workspace {
    fn workspace_id(&self) -> &str {
        &self.id
    }
}

/// How strongly a workspace is locked down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Standard capabilities plus binding low ports and signalling.
    Basic,
    /// Only the file-ownership and identity capabilities.
    #[default]
    Standard,
    /// `CHOWN` only, read-only root, `small` preset ceiling.
    Strict,
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Standard => write!(f, "standard"),
            Self::Strict => write!(f, "strict"),
        }
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = IsolationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "standard" => Ok(Self::Standard),
            "strict" => Ok(Self::Strict),
            _ => Err(IsolationError::invalid_input(format!(
                "unknown isolation level '{s}'. Supported: basic, standard, strict"
            ))),
        }
    }
}

/// Which network a workspace container joins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// The workspace's dedicated network.
    #[default]
    Custom,
    /// Docker's default bridge.
    Bridge,
    /// No networking at all.
    None,
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Custom => write!(f, "custom"),
            Self::Bridge => write!(f, "bridge"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Capability and MAC settings for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityOptions {
    /// Seccomp profile name, `RUNTIME_DEFAULT_SECCOMP` or "unconfined".
    pub seccomp_profile: String,
    /// AppArmor profile name or "unconfined".
    pub apparmor_profile: String,
    /// Capabilities granted back after the drop.
    pub capabilities_add: Vec<String>,
    /// Always `["ALL"]`.
    pub capabilities_drop: Vec<String>,
    /// Forbid setuid-style privilege gain.
    pub no_new_privileges: bool,
    /// Mount the root filesystem read-only.
    pub read_only_root_fs: bool,
}

impl SecurityOptions {
    /// Docker `security_opt` entries for these options.
    pub fn security_opts(&self) -> Vec<String> {
        let mut opts = Vec::new();
        if self.no_new_privileges {
            opts.push("no-new-privileges:true".to_string());
        }
        if !self.seccomp_profile.is_empty() && self.seccomp_profile != RUNTIME_DEFAULT_SECCOMP {
            opts.push(format!("seccomp={}", self.seccomp_profile));
        }
        if !self.apparmor_profile.is_empty() {
            opts.push(format!("apparmor={}", self.apparmor_profile));
        }
        opts
    }
}

/// Pre-warning thresholds for a workspace.
///
/// These sit below the hard-violation band used when evaluating live
/// samples, so operators see a warning before a violation is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Whether the workspace is watched at all.
    pub enabled: bool,
    /// Percent of one core's worth of quota.
    pub cpu_threshold: f64,
    /// Percent of the memory limit.
    pub memory_threshold: f64,
    /// Bytes per second.
    pub network_threshold: u64,
    /// Bytes per second.
    pub disk_threshold: u64,
    /// Serialized as whole seconds.
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: 85.0,
            memory_threshold: 90.0,
            network_threshold: 100 * 1024 * 1024,
            disk_threshold: 50 * 1024 * 1024,
            check_interval: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Complete isolation profile for one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceIsolation {
    /// Workspace the profile belongs to.
    pub workspace_id: String,
    /// Which network the container joins.
    pub network_mode: NetworkMode,
    /// Dedicated network, registered with the `NetworkManager`.
    pub network_name: String,
    /// Level the profile was built for.
    pub isolation_level: IsolationLevel,
    /// cgroup ceilings.
    pub resource_limits: ResourceLimits,
    /// Capability and MAC settings.
    pub security_options: SecurityOptions,
    /// Pre-warning thresholds.
    pub monitoring: MonitoringConfig,
}

/// Builds isolation profiles under the current process-wide policy.
///
/// Dedicated networks are allocated through a `NetworkManager`, so a
/// workspace whose subnet is taken gets no profile.
#[derive(Debug)]
pub struct IsolationManager {
    config: RwLock<Arc<IsolationConfig>>,
    networks: Arc<NetworkManager>,
}

impl IsolationManager {
    /// Manager with its own network registry.
    pub fn new(config: IsolationConfig) -> Self {
        let networks = Arc::new(NetworkManager::new(config.clone()));
        Self::with_network_manager(config, networks)
    }

    /// Manager allocating networks from a registry shared with the caller.
    pub fn with_network_manager(config: IsolationConfig, networks: Arc<NetworkManager>) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            networks,
        }
    }

    /// The registry workspace networks are allocated from.
    pub fn network_manager(&self) -> Arc<NetworkManager> {
        Arc::clone(&self.networks)
    }

    fn snapshot(&self) -> Arc<IsolationConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Copy of the current policy.
    pub fn config(&self) -> IsolationConfig {
        self.snapshot().as_ref().clone()
    }

    /// Replace the whole policy. Profiles already handed out are unaffected.
    pub fn update_config(&self, config: IsolationConfig) -> Result<(), IsolationError> {
        config.validate()?;
        self.networks.update_config(config.clone());
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
        info!("Isolation policy updated");
        Ok(())
    }

    /// A resource manager bound to the current policy.
    pub fn resource_manager(&self) -> ResourceManager {
        ResourceManager::new(self.config())
    }

    /// Standard-level profile for a workspace.
    pub fn create_workspace_isolation(
        &self,
        workspace: Option<&dyn WorkspaceHandle>,
    ) -> Result<WorkspaceIsolation, IsolationError> {
        self.create_workspace_isolation_with_level(workspace, IsolationLevel::Standard)
    }

    /// Profile for a workspace at the given level.
    ///
    /// With network isolation enabled the workspace network is allocated
    /// first; a `SubnetConflict` from the registry fails the whole call.
    pub fn create_workspace_isolation_with_level(
        &self,
        workspace: Option<&dyn WorkspaceHandle>,
        level: IsolationLevel,
    ) -> Result<WorkspaceIsolation, IsolationError> {
        let workspace =
            workspace.ok_or_else(|| IsolationError::invalid_input("workspace cannot be nil"))?;
        let workspace_id = workspace.workspace_id();
        if workspace_id.trim().is_empty() {
            return Err(IsolationError::empty_workspace_id());
        }

        let config = self.snapshot();
        let resources = ResourceManager::new(config.as_ref().clone());
        let mut resource_limits = resources.create_resource_limits();
        if level == IsolationLevel::Strict {
            clamp_to(&mut resource_limits, &resources.get_resource_limit_preset("small"));
        }

        let (network_mode, network) = if config.enable_network_isolation {
            let info = self.networks.create_workspace_network(workspace_id)?;
            (NetworkMode::Custom, info.name)
        } else {
            (NetworkMode::Bridge, network_name(workspace_id))
        };

        let isolation = WorkspaceIsolation {
            workspace_id: workspace_id.to_string(),
            network_mode,
            network_name: network,
            isolation_level: level,
            resource_limits,
            security_options: security_options(&config, level),
            monitoring: MonitoringConfig::default(),
        };

        debug!(
            "Created {} isolation profile for workspace {}",
            level, workspace_id
        );
        Ok(isolation)
    }

    /// Gate a profile before it reaches the runtime.
    pub fn validate_isolation(
        &self,
        isolation: Option<&WorkspaceIsolation>,
    ) -> Result<(), IsolationError> {
        let isolation =
            isolation.ok_or_else(|| IsolationError::invalid_input("isolation config cannot be nil"))?;

        if isolation.workspace_id.trim().is_empty() {
            return Err(IsolationError::empty_workspace_id());
        }
        if isolation.network_mode == NetworkMode::Custom && isolation.network_name.is_empty() {
            return Err(IsolationError::invalid_input(
                "custom network mode requires a network name",
            ));
        }
        if isolation.resource_limits.memory <= 0 {
            return Err(IsolationError::invalid_input("memory limit must be positive"));
        }

        self.resource_manager()
            .validate_resource_limits(&isolation.resource_limits)
    }

    /// Write a profile into the container and host configuration.
    ///
    /// Nothing is written unless the profile validates.
    pub fn apply_to_container(
        &self,
        isolation: Option<&WorkspaceIsolation>,
        container: Option<&mut ContainerConfig<String>>,
        host: Option<&mut HostConfig>,
    ) -> Result<(), IsolationError> {
        let isolation =
            isolation.ok_or_else(|| IsolationError::invalid_input("isolation config cannot be nil"))?;
        let container =
            container.ok_or_else(|| IsolationError::invalid_input("container config cannot be nil"))?;
        let host = host.ok_or_else(|| IsolationError::invalid_input("host config cannot be nil"))?;

        self.validate_isolation(Some(isolation))?;
        let config = self.snapshot();

        // Resources
        let limits = &isolation.resource_limits;
        host.cpu_shares = Some(limits.cpu_shares);
        host.cpu_quota = Some(limits.cpu_quota);
        host.cpu_period = Some(limits.cpu_period);
        host.memory = Some(limits.memory);
        host.memory_swap = Some(limits.memory_swap);
        if limits.pids_limit > 0 {
            host.pids_limit = Some(limits.pids_limit);
        }
        host.blkio_weight = Some(BLKIO_WEIGHT);
        host.device_cgroup_rules = Some(device_cgroup_rules());

        // Security
        let security = &isolation.security_options;
        host.security_opt
            .get_or_insert_with(Vec::new)
            .extend(security.security_opts());
        host.readonly_rootfs = Some(security.read_only_root_fs);
        host.cap_add = Some(security.capabilities_add.clone());
        host.cap_drop = Some(security.capabilities_drop.clone());
        if !config.allow_privilege_escalation {
            host.privileged = Some(false);
        }

        // Network
        match isolation.network_mode {
            NetworkMode::Custom => host.network_mode = Some(isolation.network_name.clone()),
            NetworkMode::None => {
                host.network_mode = Some("none".to_string());
                container.network_disabled = Some(true);
            }
            NetworkMode::Bridge => {}
        }

        let labels = container.labels.get_or_insert_with(Default::default);
        labels.insert(
            WORKSPACE_ID_LABEL.to_string(),
            isolation.workspace_id.clone(),
        );
        labels.insert(
            ISOLATION_LEVEL_LABEL.to_string(),
            isolation.isolation_level.to_string(),
        );

        debug!(
            "Applied isolation to container for workspace {} (memory {} MiB, network {})",
            isolation.workspace_id,
            limits.memory / MIB,
            isolation.network_mode
        );
        Ok(())
    }
}

fn security_options(config: &IsolationConfig, level: IsolationLevel) -> SecurityOptions {
    let capabilities_add: &[&str] = match level {
        IsolationLevel::Strict => &["CHOWN"],
        IsolationLevel::Standard => &["CHOWN", "DAC_OVERRIDE", "FOWNER", "SETGID", "SETUID"],
        IsolationLevel::Basic => &[
            "CHOWN",
            "DAC_OVERRIDE",
            "FOWNER",
            "SETGID",
            "SETUID",
            "NET_BIND_SERVICE",
            "KILL",
        ],
    };

    SecurityOptions {
        seccomp_profile: if config.enable_seccomp {
            RUNTIME_DEFAULT_SECCOMP.to_string()
        } else {
            UNCONFINED.to_string()
        },
        apparmor_profile: if config.enable_apparmor {
            DEFAULT_APPARMOR_PROFILE.to_string()
        } else {
            UNCONFINED.to_string()
        },
        capabilities_add: capabilities_add.iter().map(ToString::to_string).collect(),
        capabilities_drop: vec!["ALL".to_string()],
        no_new_privileges: !config.allow_privilege_escalation,
        read_only_root_fs: config.read_only_root_fs || level == IsolationLevel::Strict,
    }
}

fn clamp_to(limits: &mut ResourceLimits, ceiling: &ResourceLimits) {
    limits.cpu_quota = limits.cpu_quota.min(ceiling.cpu_quota);
    if limits.memory > ceiling.memory {
        limits.memory = ceiling.memory;
        limits.memory_swap = ceiling.memory_swap;
    }
    limits.pids_limit = limits.pids_limit.min(ceiling.pids_limit);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::allocate_subnet;

    fn manager() -> IsolationManager {
        IsolationManager::new(IsolationConfig::default())
    }

    fn profile(id: &str) -> WorkspaceIsolation {
        let ws = Workspace::new(id);
        manager().create_workspace_isolation(Some(&ws)).unwrap()
    }

    #[test]
    fn test_create_rejects_missing_workspace() {
        let err = manager().create_workspace_isolation(None).unwrap_err();
        assert!(err.is_invalid_input());

        let blank = Workspace::new("");
        assert!(manager().create_workspace_isolation(Some(&blank)).is_err());
    }

    #[test]
    fn test_create_standard_profile() {
        let isolation = profile("ws-1");
        assert_eq!(isolation.workspace_id, "ws-1");
        assert_eq!(isolation.network_mode, NetworkMode::Custom);
        assert_eq!(isolation.network_name, "aicli-workspace-ws-1");
        assert_eq!(isolation.isolation_level, IsolationLevel::Standard);
        assert!(isolation.security_options.no_new_privileges);
        assert_eq!(isolation.security_options.capabilities_drop, vec!["ALL"]);
        assert!((isolation.monitoring.cpu_threshold - 85.0).abs() < f64::EPSILON);
        assert!((isolation.monitoring.memory_threshold - 90.0).abs() < f64::EPSILON);
        assert_eq!(isolation.monitoring.check_interval, Duration::from_secs(30));
        assert!(manager().validate_isolation(Some(&isolation)).is_ok());
    }

    #[test]
    fn test_create_registers_workspace_network() {
        let im = manager();
        let isolation = profile_with(&im, "ws-1");

        let network = im.network_manager().get_workspace_network("ws-1").unwrap();
        assert_eq!(network.name, isolation.network_name);
    }

    #[test]
    fn test_create_fails_on_subnet_collision() {
        let im = manager();
        let target = allocate_subnet("ws-0");
        let twin = (1..100_000)
            .map(|i| format!("ws-{i}"))
            .find(|id| allocate_subnet(id) == target)
            .unwrap();

        profile_with(&im, "ws-0");
        let err = im
            .create_workspace_isolation(Some(&Workspace::new(twin.as_str())))
            .unwrap_err();
        assert!(matches!(err, IsolationError::SubnetConflict { ref holder, .. } if holder == "ws-0"));
        assert!(im.network_manager().get_workspace_network(&twin).is_err());
    }

    #[test]
    fn test_shared_network_manager() {
        let networks = Arc::new(NetworkManager::new(IsolationConfig::default()));
        let im = IsolationManager::with_network_manager(IsolationConfig::default(), Arc::clone(&networks));
        profile_with(&im, "ws-1");
        assert!(networks.get_workspace_network("ws-1").is_ok());
    }

    #[test]
    fn test_no_network_registered_without_isolation() {
        let im = IsolationManager::new(IsolationConfig {
            enable_network_isolation: false,
            ..Default::default()
        });
        let isolation = profile_with(&im, "ws-1");
        assert_eq!(isolation.network_mode, NetworkMode::Bridge);
        assert!(im.network_manager().get_workspace_network("ws-1").is_err());
    }

    #[test]
    fn test_string_is_a_workspace_handle() {
        let id = "ws-7".to_string();
        let isolation = manager().create_workspace_isolation(Some(&id)).unwrap();
        assert_eq!(isolation.workspace_id, "ws-7");
    }

    #[test]
    fn test_bridge_mode_without_network_isolation() {
        let im = IsolationManager::new(IsolationConfig {
            enable_network_isolation: false,
            ..Default::default()
        });
        let ws = Workspace::new("ws-1");
        let isolation = im.create_workspace_isolation(Some(&ws)).unwrap();
        assert_eq!(isolation.network_mode, NetworkMode::Bridge);

        let mut container = ContainerConfig::default();
        let mut host = HostConfig::default();
        im.apply_to_container(Some(&isolation), Some(&mut container), Some(&mut host))
            .unwrap();
        assert_eq!(host.network_mode, None);
    }

    #[test]
    fn test_strict_level() {
        let im = IsolationManager::new(IsolationConfig {
            default_cpu_limit: 3.0,
            default_memory_limit: 4096 * MIB,
            ..Default::default()
        });
        let ws = Workspace::new("ws-1");
        let isolation = im
            .create_workspace_isolation_with_level(Some(&ws), IsolationLevel::Strict)
            .unwrap();
        assert_eq!(isolation.security_options.capabilities_add, vec!["CHOWN"]);
        assert!(isolation.security_options.read_only_root_fs);
        assert_eq!(isolation.resource_limits.cpu_quota, 100_000);
        assert_eq!(isolation.resource_limits.memory, 512 * MIB);
        assert!(im.validate_isolation(Some(&isolation)).is_ok());
    }

    #[test]
    fn test_basic_level_adds_capabilities() {
        let ws = Workspace::new("ws-1");
        let isolation = manager()
            .create_workspace_isolation_with_level(Some(&ws), IsolationLevel::Basic)
            .unwrap();
        let caps = &isolation.security_options.capabilities_add;
        assert!(caps.contains(&"NET_BIND_SERVICE".to_string()));
        assert!(caps.contains(&"KILL".to_string()));
    }

    #[test]
    fn test_validate_isolation_failures() {
        let im = manager();
        assert!(im.validate_isolation(None).is_err());

        let mut isolation = profile("ws-1");
        isolation.workspace_id = String::new();
        assert!(im.validate_isolation(Some(&isolation)).is_err());

        let mut isolation = profile("ws-1");
        isolation.network_name = String::new();
        assert!(im.validate_isolation(Some(&isolation)).is_err());

        let mut isolation = profile("ws-1");
        isolation.resource_limits.memory = 0;
        assert!(im.validate_isolation(Some(&isolation)).is_err());

        let mut isolation = profile("ws-1");
        isolation.resource_limits.cpu_period = 0;
        assert!(im.validate_isolation(Some(&isolation)).is_err());
    }

    #[test]
    fn test_apply_rejects_missing_arguments() {
        let im = manager();
        let isolation = profile("ws-1");
        let mut container = ContainerConfig::default();
        let mut host = HostConfig::default();

        assert!(im
            .apply_to_container(None, Some(&mut container), Some(&mut host))
            .is_err());
        assert!(im
            .apply_to_container(Some(&isolation), None, Some(&mut host))
            .is_err());
        assert!(im
            .apply_to_container(Some(&isolation), Some(&mut container), None)
            .is_err());
    }

    #[test]
    fn test_apply_writes_nothing_when_invalid() {
        let im = manager();
        let mut isolation = profile("ws-1");
        isolation.resource_limits.memory = -1;
        let mut container = ContainerConfig::default();
        let mut host = HostConfig::default();

        assert!(im
            .apply_to_container(Some(&isolation), Some(&mut container), Some(&mut host))
            .is_err());
        assert_eq!(host, HostConfig::default());
        assert_eq!(container.labels, None);
    }

    #[test]
    fn test_apply_to_container() {
        let im = manager();
        let isolation = profile("ws-1");
        let mut container = ContainerConfig::default();
        let mut host = HostConfig::default();

        im.apply_to_container(Some(&isolation), Some(&mut container), Some(&mut host))
            .unwrap();

        assert_eq!(host.cpu_quota, Some(100_000));
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.memory, Some(512 * MIB));
        assert_eq!(host.pids_limit, Some(100));
        assert_eq!(host.blkio_weight, Some(BLKIO_WEIGHT));
        assert_eq!(host.privileged, Some(false));
        assert_eq!(host.readonly_rootfs, Some(false));
        assert_eq!(host.network_mode.as_deref(), Some("aicli-workspace-ws-1"));
        assert!(host.cap_drop.unwrap().contains(&"ALL".to_string()));
        assert!(host.cap_add.unwrap().contains(&"CHOWN".to_string()));

        let opts = host.security_opt.unwrap();
        assert!(opts.contains(&"no-new-privileges:true".to_string()));
        assert!(opts.contains(&"apparmor=docker-default".to_string()));

        let labels = container.labels.unwrap();
        assert_eq!(labels.get(WORKSPACE_ID_LABEL), Some(&"ws-1".to_string()));
        assert_eq!(labels.get(ISOLATION_LEVEL_LABEL), Some(&"standard".to_string()));
    }

    #[test]
    fn test_apply_no_network() {
        let im = manager();
        let mut isolation = profile("ws-1");
        isolation.network_mode = NetworkMode::None;
        let mut container = ContainerConfig::default();
        let mut host = HostConfig::default();

        im.apply_to_container(Some(&isolation), Some(&mut container), Some(&mut host))
            .unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(container.network_disabled, Some(true));
    }

    #[test]
    fn test_security_opts_when_mac_disabled() {
        let config = IsolationConfig {
            enable_seccomp: false,
            enable_apparmor: false,
            allow_privilege_escalation: true,
            ..Default::default()
        };
        let opts = security_options(&config, IsolationLevel::Standard).security_opts();
        assert_eq!(opts, vec!["seccomp=unconfined", "apparmor=unconfined"]);
    }

    #[test]
    fn test_update_config() {
        let im = manager();
        let invalid = IsolationConfig {
            default_cpu_limit: -1.0,
            ..Default::default()
        };
        assert!(im.update_config(invalid).is_err());
        assert_eq!(im.config(), IsolationConfig::default());

        let updated = IsolationConfig {
            read_only_root_fs: true,
            ..Default::default()
        };
        im.update_config(updated.clone()).unwrap();
        assert_eq!(im.config(), updated);
        assert!(profile_with(&im, "ws-2").security_options.read_only_root_fs);
    }

    #[test]
    fn test_update_config_reaches_network_policy() {
        let im = manager();
        im.update_config(IsolationConfig {
            blocked_ports: vec![2375],
            ..Default::default()
        })
        .unwrap();
        assert!(im.network_manager().is_port_blocked(2375));
        assert!(!im.network_manager().is_port_blocked(22));
    }

    fn profile_with(im: &IsolationManager, id: &str) -> WorkspaceIsolation {
        let ws = Workspace::new(id);
        im.create_workspace_isolation(Some(&ws)).unwrap()
    }

    #[test]
    fn test_isolation_level_from_str() {
        assert_eq!("STRICT".parse::<IsolationLevel>().unwrap(), IsolationLevel::Strict);
        assert!("paranoid".parse::<IsolationLevel>().is_err());
    }
}
