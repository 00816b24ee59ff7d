//! Per-workspace networks, port publishing policy and firewall rules.
//!
//! Every workspace gets a bridge network whose subnet is a pure function of
//! the workspace ID, so the binding can be recomputed without any stored
//! allocation table.

use async_trait::async_trait;
use bollard::network::CreateNetworkOptions;
use bollard::service::{Ipam, IpamConfig, PortBinding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::IsolationError;
use crate::config::IsolationConfig;

/// Prefix of every workspace network name.
pub const NETWORK_PREFIX: &str = "aicli-workspace-";

/// Label carrying the owning workspace ID.
pub const WORKSPACE_LABEL: &str = "aicli.workspace.id";

/// Default interval between network usage samples.
pub const NETWORK_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Number of /24 subnets workspaces are spread over (172.20.0.0/14).
const SUBNET_BUCKETS: u32 = 1024;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

const ALLOWED_PROTOCOLS: &[&str] = &["tcp", "udp", "icmp"];

/// Docker's exposed-port set: keys like "8080/tcp" mapped to empty objects.
pub type ExposedPorts = HashMap<String, HashMap<(), ()>>;

/// Docker's host port bindings keyed by container port.
pub type PortBindings = HashMap<String, Option<Vec<PortBinding>>>;

/// Identity of a workspace network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Stable ID derived from the network name.
    pub id: String,
    /// `aicli-workspace-<workspace id>`.
    pub name: String,
    /// CIDR of the workspace /24.
    pub subnet: String,
    /// First host address of `subnet`.
    pub gateway: String,
    /// Inter-container traffic is disabled on the bridge.
    pub isolated: bool,
    /// Docker network driver.
    pub driver: String,
    /// When the network was registered
    pub created_at: DateTime<Utc>,
    /// Includes `WORKSPACE_LABEL`.
    pub labels: HashMap<String, String>,
}

impl NetworkInfo {
    /// Build the Docker network create request for this network.
    pub fn to_create_options(&self) -> CreateNetworkOptions<String> {
        let mut options = HashMap::new();
        if self.isolated {
            options.insert(
                "com.docker.network.bridge.enable_icc".to_string(),
                "false".to_string(),
            );
        }

        CreateNetworkOptions {
            name: self.name.clone(),
            check_duplicate: true,
            driver: self.driver.clone(),
            ipam: Ipam {
                driver: Some("default".to_string()),
                config: Some(vec![IpamConfig {
                    subnet: Some(self.subnet.clone()),
                    gateway: Some(self.gateway.clone()),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            options,
            labels: self.labels.clone(),
            ..Default::default()
        }
    }
}

/// Raw traffic counters for a network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes sent.
    pub tx_bytes: u64,
    /// Packets received.
    pub rx_packets: u64,
    /// Packets sent.
    pub tx_packets: u64,
}

/// One network usage sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Network the counters belong to.
    pub network_id: String,
    /// Bytes received.
    pub rx_bytes: u64,
    /// Bytes sent.
    pub tx_bytes: u64,
    /// Packets received.
    pub rx_packets: u64,
    /// Packets sent.
    pub tx_packets: u64,
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
}

impl NetworkStats {
    fn from_counters(network_id: &str, counters: TrafficCounters) -> Self {
        Self {
            network_id: network_id.to_string(),
            rx_bytes: counters.rx_bytes,
            tx_bytes: counters.tx_bytes,
            rx_packets: counters.rx_packets,
            tx_packets: counters.tx_packets,
            timestamp: Utc::now(),
        }
    }
}

/// Reads traffic counters for workspace networks.
///
/// The container runtime connection belongs to the caller, so the manager
/// asks a sampler for counters instead of reading them itself.
#[async_trait]
pub trait NetworkSampler: Send + Sync {
    /// Current counters for a network.
    async fn network_stats(&self, network_id: &str) -> anyhow::Result<TrafficCounters>;
}

/// A sampler that always reports no traffic.
#[derive(Debug, Default, Clone)]
pub struct NoopNetworkSampler;

#[async_trait]
impl NetworkSampler for NoopNetworkSampler {
    async fn network_stats(&self, _network_id: &str) -> anyhow::Result<TrafficCounters> {
        Ok(TrafficCounters::default())
    }
}

/// Ports to publish for a workspace container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMappingRequest {
    /// Host port to container port, either optionally suffixed with /tcp or /udp.
    #[serde(default)]
    pub ports: HashMap<String, String>,
    /// Publish the ports on the host as well as exposing them.
    #[serde(default)]
    pub bind_to_host: bool,
    /// Host interface to bind; `None` or empty means all interfaces.
    #[serde(default)]
    pub host_ip: Option<String>,
}

/// A firewall-style allow or block rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    /// tcp, udp or icmp.
    pub protocol: String,
    /// Port, optionally suffixed with /tcp or /udp.
    #[serde(default)]
    pub port: Option<String>,
    /// CIDR or bare IP address.
    #[serde(default)]
    pub source: Option<String>,
    /// Free-form note for operators.
    #[serde(default)]
    pub description: String,
}

/// Traffic policy for one workspace network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSecurityPolicy {
    /// Zero means unlimited.
    #[serde(default)]
    pub max_bandwidth_mbps: i64,
    /// Zero means unlimited.
    #[serde(default)]
    pub max_connections: i64,
    /// Traffic explicitly permitted.
    #[serde(default)]
    pub allow_rules: Vec<FirewallRule>,
    /// Traffic explicitly denied.
    #[serde(default)]
    pub block_rules: Vec<FirewallRule>,
}

/// 32-bit FNV-1a.
fn fnv1a_32(data: &[u8]) -> u32 {
    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic /24 for a workspace ID inside 172.20.0.0/14.
pub fn allocate_subnet(workspace_id: &str) -> String {
    let n = fnv1a_32(workspace_id.as_bytes()) % SUBNET_BUCKETS;
    format!("172.{}.{}.0/24", 20 + n / 256, n % 256)
}

/// Name of the dedicated network for a workspace.
pub fn network_name(workspace_id: &str) -> String {
    format!("{NETWORK_PREFIX}{workspace_id}")
}

/// First host address of `subnet`, or an empty string if it does not parse.
///
/// Callers must treat the empty string as a failure; `try_gateway_ip` gives
/// the same answer as a `Result`.
pub fn gateway_ip(subnet: &str) -> String {
    try_gateway_ip(subnet)
        .map(|ip| ip.to_string())
        .unwrap_or_default()
}

/// First host address of an IPv4 CIDR subnet.
pub fn try_gateway_ip(subnet: &str) -> Result<Ipv4Addr, IsolationError> {
    let malformed = || IsolationError::invalid_input(format!("malformed subnet: '{subnet}'"));

    let (ip, prefix) = parse_cidr(subnet).ok_or_else(malformed)?;
    let IpAddr::V4(ip) = ip else {
        return Err(malformed());
    };
    if prefix > 30 {
        return Err(IsolationError::invalid_input(format!(
            "subnet {subnet} has no room for a gateway"
        )));
    }

    let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    Ok(Ipv4Addr::from((u32::from(ip) & mask) + 1))
}

fn parse_cidr(value: &str) -> Option<(IpAddr, u8)> {
    let (ip, prefix) = value.split_once('/')?;
    let ip: IpAddr = ip.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    (prefix <= max).then_some((ip, prefix))
}

/// Parse "8080", "8080/tcp" or "53/udp" into a port number.
fn parse_port(value: &str) -> Result<u16, IsolationError> {
    let number = value
        .strip_suffix("/tcp")
        .or_else(|| value.strip_suffix("/udp"))
        .unwrap_or(value);

    let port: u32 = number
        .parse()
        .map_err(|_| IsolationError::invalid_input(format!("invalid port: '{value}'")))?;

    match u16::try_from(port) {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(IsolationError::invalid_input(format!(
            "port {port} out of range 1-65535"
        ))),
    }
}

/// Container port key in Docker form, defaulting the protocol to tcp.
fn container_port_key(value: &str) -> String {
    if value.contains('/') {
        value.to_string()
    } else {
        format!("{value}/tcp")
    }
}

fn host_port_number(value: &str) -> &str {
    value.split_once('/').map_or(value, |(port, _)| port)
}

/// Allocates workspace networks and polices port and traffic rules.
pub struct NetworkManager {
    config: RwLock<IsolationConfig>,
    networks: RwLock<HashMap<String, NetworkInfo>>,
    policies: RwLock<HashMap<String, NetworkSecurityPolicy>>,
    sampler: Arc<dyn NetworkSampler>,
    sample_interval: Duration,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("networks", &self.networks)
            .field("sample_interval", &self.sample_interval)
            .finish_non_exhaustive()
    }
}

impl NetworkManager {
    /// Manager with no networks and a sampler that reports no traffic.
    pub fn new(config: IsolationConfig) -> Self {
        Self {
            config: RwLock::new(config),
            networks: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            sampler: Arc::new(NoopNetworkSampler),
            sample_interval: NETWORK_SAMPLE_INTERVAL,
        }
    }

    /// Override the usage sampling interval.
    #[must_use]
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Read traffic counters through `sampler`.
    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<dyn NetworkSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Replace the port policy. Existing networks are kept.
    pub fn update_config(&self, config: IsolationConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    /// Provision the network identity for a workspace.
    ///
    /// Repeated calls for the same workspace return the existing network. A
    /// subnet already held by a different workspace is rejected.
    pub fn create_workspace_network(&self, workspace_id: &str) -> Result<NetworkInfo, IsolationError> {
        if workspace_id.trim().is_empty() {
            return Err(IsolationError::empty_workspace_id());
        }

        let mut networks = self.networks.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = networks.get(workspace_id) {
            debug!("Network for workspace {} already exists", workspace_id);
            return Ok(existing.clone());
        }

        let subnet = allocate_subnet(workspace_id);
        if let Some((holder, _)) = networks.iter().find(|(_, n)| n.subnet == subnet) {
            warn!(
                "Subnet {} for workspace {} collides with workspace {}",
                subnet, workspace_id, holder
            );
            return Err(IsolationError::SubnetConflict {
                subnet,
                workspace_id: workspace_id.to_string(),
                holder: holder.clone(),
            });
        }

        let gateway = try_gateway_ip(&subnet)?.to_string();
        let name = network_name(workspace_id);
        let info = NetworkInfo {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string(),
            name,
            subnet,
            gateway,
            isolated: true,
            driver: "bridge".to_string(),
            created_at: Utc::now(),
            labels: HashMap::from([(WORKSPACE_LABEL.to_string(), workspace_id.to_string())]),
        };

        info!(
            "Created network {} ({}, gateway {}) for workspace {}",
            info.name, info.subnet, info.gateway, workspace_id
        );
        networks.insert(workspace_id.to_string(), info.clone());
        Ok(info)
    }

    /// The registered network for a workspace.
    pub fn get_workspace_network(&self, workspace_id: &str) -> Result<NetworkInfo, IsolationError> {
        if workspace_id.trim().is_empty() {
            return Err(IsolationError::empty_workspace_id());
        }

        self.networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workspace_id)
            .cloned()
            .ok_or_else(|| IsolationError::not_found(format!("network for workspace {workspace_id}")))
    }

    /// Tear down a workspace network. Deleting an unknown network is not an error.
    pub fn delete_workspace_network(&self, workspace_id: &str) -> Result<(), IsolationError> {
        if workspace_id.trim().is_empty() {
            return Err(IsolationError::empty_workspace_id());
        }

        let removed = self
            .networks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workspace_id);

        if let Some(network) = removed {
            self.policies
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&network.id);
            info!("Deleted network {} for workspace {}", network.name, workspace_id);
        }
        Ok(())
    }

    /// Networks labelled with the given workspace, sorted by name.
    pub fn list_workspace_networks(&self, workspace_id: &str) -> Result<Vec<NetworkInfo>, IsolationError> {
        if workspace_id.trim().is_empty() {
            return Err(IsolationError::empty_workspace_id());
        }

        let mut found: Vec<_> = self
            .networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|n| n.labels.get(WORKSPACE_LABEL).map(String::as_str) == Some(workspace_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    /// Whether the policy forbids publishing `port` on the host.
    pub fn is_port_blocked(&self, port: u16) -> bool {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .blocked_ports
            .contains(&port)
    }

    /// Check a host-to-container port map. `None` is a valid empty mapping.
    pub fn validate_port_mapping(
        &self,
        ports: Option<&HashMap<String, String>>,
    ) -> Result<(), IsolationError> {
        let Some(ports) = ports else {
            return Ok(());
        };

        for (host, container) in ports {
            let host_port = parse_port(host)?;
            parse_port(container)?;
            if self.is_port_blocked(host_port) {
                return Err(IsolationError::blocked_port(host_port));
            }
        }
        Ok(())
    }

    /// Build Docker's exposed-port set and, when binding to the host, the
    /// port binding table.
    pub fn create_port_mapping(
        &self,
        request: &PortMappingRequest,
    ) -> Result<(ExposedPorts, PortBindings), IsolationError> {
        self.validate_port_mapping(Some(&request.ports))?;

        let mut exposed = ExposedPorts::new();
        let mut bindings = PortBindings::new();
        let host_ip = request
            .host_ip
            .as_deref()
            .filter(|ip| !ip.is_empty())
            .map(str::to_string);

        for (host, container) in &request.ports {
            let key = container_port_key(container);
            exposed.insert(key.clone(), HashMap::new());

            if request.bind_to_host {
                bindings
                    .entry(key)
                    .or_insert_with(|| Some(Vec::new()))
                    .get_or_insert_with(Vec::new)
                    .push(PortBinding {
                        host_ip: host_ip.clone(),
                        host_port: Some(host_port_number(host).to_string()),
                    });
            }
        }

        Ok((exposed, bindings))
    }

    /// Stream usage samples for a network until the receiver is dropped.
    ///
    /// Counters come from the configured `NetworkSampler`; a failed read is
    /// logged and that sample skipped. Fails with `NoRuntime` outside a tokio
    /// runtime.
    pub fn monitor_network_usage(
        &self,
        network_id: &str,
    ) -> Result<mpsc::Receiver<NetworkStats>, IsolationError> {
        if network_id.trim().is_empty() {
            return Err(IsolationError::invalid_input("network ID cannot be empty"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| IsolationError::no_runtime("monitor network usage"))?;

        let (tx, rx) = mpsc::channel(16);
        let network_id = network_id.to_string();
        let period = self.sample_interval;
        let sampler = Arc::clone(&self.sampler);

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval fires immediately; the first sample is one period out
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    _ = ticker.tick() => {
                        let sampled = sampler.network_stats(&network_id).await;
                        let counters = match sampled {
                            Ok(counters) => counters,
                            Err(e) => {
                                warn!("Failed to sample network {}: {:#}", network_id, e);
                                continue;
                            }
                        };
                        let stats = NetworkStats::from_counters(&network_id, counters);
                        if tx.send(stats).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Stopped network usage monitoring for {}", network_id);
        });

        Ok(rx)
    }

    /// Check bandwidth and connection caps and every rule in a policy.
    pub fn validate_network_security_policy(
        &self,
        policy: &NetworkSecurityPolicy,
    ) -> Result<(), IsolationError> {
        if policy.max_bandwidth_mbps < 0 {
            return Err(IsolationError::invalid_input(format!(
                "max bandwidth cannot be negative: {}",
                policy.max_bandwidth_mbps
            )));
        }
        if policy.max_connections < 0 {
            return Err(IsolationError::invalid_input(format!(
                "max connections cannot be negative: {}",
                policy.max_connections
            )));
        }

        for rule in policy.allow_rules.iter().chain(&policy.block_rules) {
            self.validate_firewall_rule(rule)?;
        }
        Ok(())
    }

    /// Check a rule's protocol, port and source address.
    pub fn validate_firewall_rule(&self, rule: &FirewallRule) -> Result<(), IsolationError> {
        let protocol = rule.protocol.to_lowercase();
        if !ALLOWED_PROTOCOLS.contains(&protocol.as_str()) {
            return Err(IsolationError::invalid_input(format!(
                "unsupported protocol '{}'. Supported: tcp, udp, icmp",
                rule.protocol
            )));
        }

        if let Some(port) = rule.port.as_deref().filter(|p| !p.is_empty()) {
            parse_port(port)?;
        }

        if let Some(source) = rule.source.as_deref().filter(|s| !s.is_empty()) {
            if parse_cidr(source).is_none() && source.parse::<IpAddr>().is_err() {
                return Err(IsolationError::invalid_input(format!(
                    "invalid source '{source}': expected CIDR or IP address"
                )));
            }
        }
        Ok(())
    }

    /// Validate a traffic policy and record it for the network.
    pub fn apply_network_security(
        &self,
        network_id: &str,
        policy: Option<&NetworkSecurityPolicy>,
    ) -> Result<(), IsolationError> {
        if network_id.trim().is_empty() {
            return Err(IsolationError::invalid_input("network ID cannot be empty"));
        }
        let policy =
            policy.ok_or_else(|| IsolationError::invalid_input("network security policy is required"))?;

        self.validate_network_security_policy(policy)?;

        info!(
            "Applying network policy to {}: {} allow rules, {} block rules, bandwidth {} Mbps, connections {}",
            network_id,
            policy.allow_rules.len(),
            policy.block_rules.len(),
            policy.max_bandwidth_mbps,
            policy.max_connections
        );
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(network_id.to_string(), policy.clone());
        Ok(())
    }

    /// The policy last applied to a network, if any.
    pub fn network_security_policy(&self, network_id: &str) -> Option<NetworkSecurityPolicy> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network_id)
            .cloned()
    }
}
