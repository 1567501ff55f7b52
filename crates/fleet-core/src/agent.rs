//! Agent identity, coordinator endpoint and registration state.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Who this machine is. Loaded once at boot and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Requested agent name; `None` lets the coordinator assign one.
    pub agent_name: Option<String>,
    /// Capability tags such as `gpu` or `cpu-large`.
    pub capability_tags: BTreeSet<String>,
}

impl AgentIdentity {
    pub fn new(agent_name: Option<String>) -> Self {
        Self {
            agent_name,
            capability_tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capability_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.capability_tags.contains(tag)
    }

    /// Name used in logs before the coordinator has assigned one.
    pub fn display_name(&self) -> &str {
        self.agent_name.as_deref().unwrap_or("<unassigned>")
    }
}

/// Wire protocol spoken with the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Where the coordinator lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorEndpoint {
    pub primary: Url,
    pub secondary: Option<Url>,
    pub protocol: Protocol,
}

impl CoordinatorEndpoint {
    /// Build an endpoint from raw addresses as found in boot files.
    ///
    /// Bare host names are qualified with `protocol`. An address that carries
    /// its own scheme keeps it; the primary's scheme wins as the endpoint
    /// protocol.
    pub fn from_addresses(
        primary: &str,
        secondary: Option<&str>,
        protocol: Protocol,
    ) -> Result<Self> {
        let primary = parse_address(primary, protocol)?;
        let secondary = secondary.map(|s| parse_address(s, protocol)).transpose()?;
        let protocol = Protocol::from_scheme(primary.scheme()).unwrap_or(protocol);

        Ok(Self {
            primary,
            secondary,
            protocol,
        })
    }

    /// Addresses in the order they should be tried.
    pub fn addresses(&self) -> impl Iterator<Item = &Url> {
        std::iter::once(&self.primary).chain(self.secondary.iter())
    }
}

fn parse_address(raw: &str, protocol: Protocol) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidConfig("empty coordinator address".to_string()));
    }

    let url = if raw.contains("://") {
        Url::parse(raw)?
    } else {
        Url::parse(&format!("{}://{}", protocol.scheme(), raw))?
    };

    if Protocol::from_scheme(url.scheme()).is_none() {
        return Err(Error::InvalidConfig(format!(
            "unsupported coordinator scheme '{}' in {}",
            url.scheme(),
            raw
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::InvalidConfig(format!(
            "coordinator address has no host: {}",
            raw
        )));
    }

    Ok(url)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Os {
    Linux,
    Macos,
    Windows,
}

impl Os {
    pub fn detect() -> Self {
        #[cfg(target_os = "macos")]
        return Os::Macos;
        #[cfg(target_os = "windows")]
        return Os::Windows;
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        return Os::Linux;
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Macos => "macos",
            Os::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub fn detect() -> Self {
        #[cfg(target_arch = "aarch64")]
        return Arch::Aarch64;
        #[cfg(not(target_arch = "aarch64"))]
        return Arch::X86_64;
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

/// Session handed out by the coordinator on successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkChannel {
    /// Coordinator address that acknowledged the registration.
    pub address: Url,
    /// Name the coordinator knows this agent by.
    pub agent_name: String,
    pub token: String,
    /// Heartbeat interval requested by the coordinator, if any.
    pub heartbeat_interval: Option<Duration>,
}

/// Why a registration attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Network or connection error, or a coordinator that is up but not serving.
    Unreachable(String),
    /// Coordinator answered and refused this agent.
    Rejected(String),
    /// No response within the registration timeout.
    Timeout(u64),
}

impl FailureReason {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureReason::Rejected(_))
    }
}

impl From<Error> for FailureReason {
    fn from(err: Error) -> Self {
        match err {
            Error::Rejected { reason } => FailureReason::Rejected(reason),
            Error::Timeout { seconds } => FailureReason::Timeout(seconds),
            Error::Unreachable(detail) => FailureReason::Unreachable(detail),
            other => FailureReason::Unreachable(other.to_string()),
        }
    }
}

impl From<FailureReason> for Error {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::Unreachable(detail) => Error::Unreachable(detail),
            FailureReason::Rejected(reason) => Error::Rejected { reason },
            FailureReason::Timeout(seconds) => Error::Timeout { seconds },
        }
    }
}

/// Registration progress as owned by the registration client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RegistrationState {
    #[default]
    Unregistered,
    Registering,
    Registered(WorkChannel),
    Failed(FailureReason),
}

impl RegistrationState {
    pub fn into_result(self) -> Result<WorkChannel> {
        match self {
            RegistrationState::Registered(channel) => Ok(channel),
            RegistrationState::Failed(reason) => Err(reason.into()),
            other => Err(Error::Internal(format!(
                "registration finished in non-terminal state {:?}",
                other
            ))),
        }
    }
}
