//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the bootstrap core and the
//! adapters that touch the filesystem, the network and the mount table.

use crate::Result;
use crate::agent::{AgentIdentity, CoordinatorEndpoint, WorkChannel};
use crate::protocol::{LivenessSignal, RegistrationAck, RegistrationRequest};
use async_trait::async_trait;
use std::path::Path;
use url::Url;

/// Source of the boot-time identity and coordinator address.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Load identity and endpoint. Fails with `ConfigMissing` when the
    /// coordinator address is absent. Never retries.
    async fn load(&self) -> Result<(AgentIdentity, CoordinatorEndpoint)>;
}

/// Transport to the coordinator.
#[async_trait]
pub trait CoordinatorTransport: Send + Sync {
    /// Send one registration request to a single coordinator address.
    ///
    /// Errors are classified as `Unreachable`, `Timeout` or `Rejected`.
    async fn register(&self, address: &Url, request: &RegistrationRequest)
    -> Result<RegistrationAck>;

    /// Send one liveness signal over an established work channel.
    async fn send_liveness(&self, channel: &WorkChannel, signal: &LivenessSignal) -> Result<()>;

    /// Tell the coordinator this agent is going away.
    async fn deregister(&self, channel: &WorkChannel) -> Result<()>;
}

/// Mounts the shared build cache.
#[async_trait]
pub trait CacheMounter: Send + Sync {
    /// Mount `remote_address` at `local_path`.
    async fn mount(&self, remote_address: &str, local_path: &Path) -> Result<()>;
}
