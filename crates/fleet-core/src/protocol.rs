//! Wire messages exchanged with the coordinator.

use crate::agent::{Arch, Os};
use crate::ids::BootId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Announces an agent to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Slot family to assign from when `agent_name` is unset.
    pub label_prefix: String,
    pub capability_tags: BTreeSet<String>,
    pub boot_id: BootId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub os: Os,
    pub arch: Arch,
    pub version: String,
}

/// Successful registration response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationAck {
    pub agent_name: String,
    pub work_channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,
}

/// Structured refusal body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: String,
}

/// Availability reported in liveness signals. A bootstrapped agent with no
/// work is always idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
}

/// Capacity figures attached to each liveness signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityMetrics {
    pub cpu_count: usize,
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub load_average: [f64; 3],
}

/// Periodic one-way liveness signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessSignal {
    pub agent_name: String,
    pub boot_id: BootId,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<CapacityMetrics>,
    pub timestamp: DateTime<Utc>,
}
