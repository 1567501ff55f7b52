//! Lifecycle phases and process exit statuses.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the bootstrap state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecyclePhase {
    Init,
    WaitingForCache,
    Bootstrapping,
    Connected,
    Terminated,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Init => "init",
            LifecyclePhase::WaitingForCache => "waiting-for-cache",
            LifecyclePhase::Bootstrapping => "bootstrapping",
            LifecyclePhase::Connected => "connected",
            LifecyclePhase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the process ended. Codes follow sysexits(3) so an init system can
/// tell misconfiguration from infrastructure trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Normal shutdown, including cancellation before the agent connected.
    Shutdown,
    /// Coordinator address missing or unusable.
    ConfigMissing,
    /// Coordinator refused the registration.
    Rejected,
    /// Only transient failures until the retry deadline ran out.
    BootstrapTimeout,
    /// Anything else.
    Internal,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Shutdown => 0,
            ExitStatus::Internal => 70,
            ExitStatus::BootstrapTimeout => 75,
            ExitStatus::Rejected => 77,
            ExitStatus::ConfigMissing => 78,
        }
    }

    /// Marker written to the local status file.
    pub fn marker(&self) -> &'static str {
        match self {
            ExitStatus::Shutdown => "shutdown",
            ExitStatus::ConfigMissing => "error-config-missing",
            ExitStatus::Rejected => "error-rejected",
            ExitStatus::BootstrapTimeout => "error-bootstrap-timeout",
            ExitStatus::Internal => "error-internal",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Shutdown)
    }
}

impl From<&Error> for ExitStatus {
    fn from(err: &Error) -> Self {
        match err {
            Error::ConfigMissing(_) | Error::InvalidConfig(_) => ExitStatus::ConfigMissing,
            Error::Rejected { .. } => ExitStatus::Rejected,
            Error::BootstrapTimeout { .. } => ExitStatus::BootstrapTimeout,
            Error::Cancelled => ExitStatus::Shutdown,
            _ => ExitStatus::Internal,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}
