//! Registration with the coordinator.

use fleet_core::BootId;
use fleet_core::agent::{
    AgentIdentity, Arch, CoordinatorEndpoint, FailureReason, Os, RegistrationState, WorkChannel,
};
use fleet_core::ports::CoordinatorTransport;
use fleet_core::protocol::{RegistrationAck, RegistrationRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

/// Performs single registration attempts and owns the resulting
/// [`RegistrationState`]. Retrying is left to the caller.
pub struct RegistrationClient {
    transport: Arc<dyn CoordinatorTransport>,
    boot_id: BootId,
    label_prefix: String,
    state_tx: watch::Sender<RegistrationState>,
}

impl RegistrationClient {
    pub fn new(
        transport: Arc<dyn CoordinatorTransport>,
        boot_id: BootId,
        label_prefix: impl Into<String>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RegistrationState::Unregistered);
        Self {
            transport,
            boot_id,
            label_prefix: label_prefix.into(),
            state_tx,
        }
    }

    /// Current registration state.
    pub fn state(&self) -> RegistrationState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.state_tx.subscribe()
    }

    /// Build the registration request announced for `identity`.
    pub fn request_for(&self, identity: &AgentIdentity) -> RegistrationRequest {
        RegistrationRequest {
            agent_name: identity.agent_name.clone(),
            label_prefix: self.label_prefix.clone(),
            capability_tags: identity.capability_tags.clone(),
            boot_id: self.boot_id,
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
            os: Os::detect(),
            arch: Arch::detect(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// One registration attempt.
    ///
    /// The primary address is tried first. A transient failure moves on to
    /// the secondary address; a rejection ends the attempt at once. The state
    /// ends in `Registered` or `Failed`.
    pub async fn register(
        &self,
        identity: &AgentIdentity,
        endpoint: &CoordinatorEndpoint,
    ) -> RegistrationState {
        self.state_tx.send_replace(RegistrationState::Registering);
        let request = self.request_for(identity);

        let mut failure = FailureReason::Unreachable("no coordinator address".to_string());
        for address in endpoint.addresses() {
            match self.transport.register(address, &request).await {
                Ok(ack) => {
                    let state = match self.accept(identity, address, ack) {
                        Ok(channel) => {
                            info!(
                                agent = %channel.agent_name,
                                coordinator = %channel.address,
                                "Registered with coordinator"
                            );
                            RegistrationState::Registered(channel)
                        }
                        Err(reason) => {
                            warn!(coordinator = %address, reason = ?reason, "Unusable registration ack");
                            RegistrationState::Failed(reason)
                        }
                    };
                    self.state_tx.send_replace(state.clone());
                    return state;
                }
                Err(err) => {
                    let reason = FailureReason::from(err);
                    if !reason.is_retryable() {
                        warn!(coordinator = %address, reason = ?reason, "Registration rejected");
                        failure = reason;
                        break;
                    }
                    warn!(coordinator = %address, reason = ?reason, "Coordinator address failed");
                    failure = reason;
                }
            }
        }

        let state = RegistrationState::Failed(failure);
        self.state_tx.send_replace(state.clone());
        state
    }

    fn accept(
        &self,
        identity: &AgentIdentity,
        address: &Url,
        ack: RegistrationAck,
    ) -> Result<WorkChannel, FailureReason> {
        if ack.work_channel.trim().is_empty() {
            return Err(FailureReason::Rejected(
                "coordinator returned an empty session token".to_string(),
            ));
        }

        let agent_name = if ack.agent_name.trim().is_empty() {
            identity.agent_name.clone().ok_or_else(|| {
                FailureReason::Rejected("coordinator assigned no agent name".to_string())
            })?
        } else {
            ack.agent_name
        };

        Ok(WorkChannel {
            address: address.clone(),
            agent_name,
            token: ack.work_channel,
            heartbeat_interval: ack
                .heartbeat_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}
