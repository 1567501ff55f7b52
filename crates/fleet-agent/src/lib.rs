//! Bootstrap agent for CI fleet machines.
//!
//! On boot the agent reads its identity, waits for the shared build cache,
//! registers with the coordinator (retrying with backoff under a deadline)
//! and then reports liveness until it is told to stop.

pub mod cache;
pub mod capabilities;
pub mod config;
pub mod heartbeat;
pub mod http;
pub mod registration;
pub mod retry;
pub mod source;
pub mod status;
pub mod supervisor;
pub mod wait;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use config::AgentConfig;
pub use http::HttpCoordinator;
pub use registration::RegistrationClient;
pub use retry::{RetryBudget, RetryPolicy, RetryScheduler};
pub use source::FileConfigSource;
pub use supervisor::{BootOutcome, LifecycleSupervisor};
