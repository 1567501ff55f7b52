//! Agent configuration.

use crate::retry::RetryPolicy;
use fleet_core::agent::Protocol;
use fleet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the agent settings file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fleet/agent.yaml";

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Where to find the coordinator.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Where to find the agent identity.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Registration retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Shared build cache.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Liveness reporting.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Local workspace.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// File receiving the current lifecycle marker.
    #[serde(default = "default_status_file")]
    pub status_file: Option<PathBuf>,
    /// Deregister from the coordinator on graceful shutdown.
    #[serde(default = "default_true")]
    pub deregister_on_shutdown: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Primary address; takes precedence over `url_file`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_url_file")]
    pub url_file: PathBuf,
    /// Fallback address; takes precedence over `secondary_url_file`.
    #[serde(default)]
    pub secondary_url: Option<String>,
    #[serde(default = "default_secondary_url_file")]
    pub secondary_url_file: Option<PathBuf>,
    /// Protocol used for addresses without a scheme.
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Agent name; takes precedence over `agent_name_file`.
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default = "default_agent_name_file")]
    pub agent_name_file: Option<PathBuf>,
    #[serde(default)]
    pub capability_tags: Vec<String>,
    #[serde(default = "default_capability_tags_file")]
    pub capability_tags_file: Option<PathBuf>,
    /// Add detected OS, architecture and GPU tags.
    #[serde(default = "default_true")]
    pub detect_capabilities: bool,
    /// Base of the slot family requested for unnamed agents.
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Fraction of the delay added or removed at random.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Wall-clock budget for the whole registration sequence.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// File that will contain the cache server address. `None` disables the cache.
    #[serde(default = "default_cache_address_file")]
    pub address_file: Option<PathBuf>,
    #[serde(default = "default_cache_local_path")]
    pub local_path: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_mount_type")]
    pub mount_type: String,
    #[serde(default = "default_mount_options")]
    pub mount_options: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub dir: PathBuf,
    /// Remove leftovers from the previous boot.
    #[serde(default = "default_true")]
    pub purge_on_boot: bool,
}

fn default_true() -> bool {
    true
}

fn default_status_file() -> Option<PathBuf> {
    Some(PathBuf::from("/var/lib/fleet/status"))
}

fn default_url_file() -> PathBuf {
    PathBuf::from("/etc/fleet/coordinator_url")
}

fn default_secondary_url_file() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/fleet/coordinator_secondary_url"))
}

fn default_registration_timeout() -> u64 {
    10
}

fn default_agent_name_file() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/fleet/agent_name"))
}

fn default_capability_tags_file() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/fleet/capability_tags"))
}

fn default_label_prefix() -> String {
    "fleet".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_jitter() -> f64 {
    0.2
}

fn default_deadline_secs() -> u64 {
    600
}

fn default_cache_address_file() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/fleet/cache_address"))
}

fn default_cache_local_path() -> PathBuf {
    PathBuf::from("/mnt/fleet-cache")
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    300
}

fn default_mount_type() -> String {
    "nfs4".to_string()
}

fn default_mount_options() -> String {
    "nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2,noresvport".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_heartbeat_timeout() -> u64 {
    5
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/var/lib/fleet/workspace")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            identity: IdentityConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            workspace: WorkspaceConfig::default(),
            status_file: default_status_file(),
            deregister_on_shutdown: true,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_file: default_url_file(),
            secondary_url: None,
            secondary_url_file: default_secondary_url_file(),
            protocol: Protocol::default(),
            registration_timeout_secs: default_registration_timeout(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            agent_name: None,
            agent_name_file: default_agent_name_file(),
            capability_tags: vec![],
            capability_tags_file: default_capability_tags_file(),
            detect_capabilities: true,
            label_prefix: default_label_prefix(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            jitter: default_jitter(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            address_file: default_cache_address_file(),
            local_path: default_cache_local_path(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            mount_type: default_mount_type(),
            mount_options: default_mount_options(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            timeout_secs: default_heartbeat_timeout(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: default_workspace_dir(),
            purge_on_boot: true,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat.timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.coordinator.registration_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "coordinator.registration_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::InvalidConfig(format!(
                "retry.jitter must be between 0 and 1, got {}",
                self.retry.jitter
            )));
        }
        Ok(())
    }

    /// Load from `path` if given, otherwise from the default location when it
    /// exists, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

impl CoordinatorConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout_secs)
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_secs(self.max_delay_secs),
            Duration::from_secs(self.deadline_secs),
        )
        .with_jitter(self.jitter)
    }
}

impl CacheConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl HeartbeatConfig {
    /// Clamped to at least one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
