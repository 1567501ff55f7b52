//! Fleet Core
//!
//! Core domain types, traits, and error handling for the fleet agent.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the agent runtime and the tracing crate.

pub mod agent;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod ports;
pub mod protocol;

pub use error::{Error, Result};
pub use ids::BootId;
