//! Span creation for agent bootstrap operations.

use tracing::{Level, Span, span};

/// Agent attributes attached to bootstrap spans.
#[derive(Debug, Clone, Default)]
pub struct AgentAttributes {
    pub agent_name: Option<String>,
    pub boot_id: Option<String>,
    pub label_prefix: Option<String>,
    pub coordinator: Option<String>,
}

impl AgentAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, name: Option<impl Into<String>>) -> Self {
        self.agent_name = name.map(Into::into);
        self
    }

    pub fn boot(mut self, boot_id: impl Into<String>) -> Self {
        self.boot_id = Some(boot_id.into());
        self
    }

    pub fn label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.label_prefix = Some(prefix.into());
        self
    }

    pub fn coordinator(mut self, address: impl Into<String>) -> Self {
        self.coordinator = Some(address.into());
        self
    }
}

/// Span covering one whole boot of the agent.
pub fn bootstrap_span(attrs: &AgentAttributes) -> Span {
    span!(
        Level::INFO,
        "agent.bootstrap",
        fleet.agent.name = attrs.agent_name.as_deref().unwrap_or(""),
        fleet.agent.boot_id = attrs.boot_id.as_deref().unwrap_or(""),
        fleet.agent.label_prefix = attrs.label_prefix.as_deref().unwrap_or(""),
        fleet.coordinator = attrs.coordinator.as_deref().unwrap_or(""),
    )
}

/// Span for a single registration attempt.
pub fn registration_span(attempt: u32) -> Span {
    span!(Level::INFO, "agent.register", attempt = attempt)
}

/// Span for the shared cache mount.
pub fn mount_span(remote_address: &str) -> Span {
    span!(Level::INFO, "cache.mount", cache.remote = remote_address)
}

/// Span for one liveness signal.
pub fn heartbeat_span(agent_name: &str) -> Span {
    span!(Level::DEBUG, "agent.heartbeat", fleet.agent.name = agent_name)
}
