//! Logging and OpenTelemetry integration for the fleet agent.
//!
//! Sets up the `tracing` subscriber (pretty or JSON output, optional OTLP
//! export) and provides span constructors for bootstrap operations.

pub mod spans;
pub mod tracer;

pub use spans::{AgentAttributes, bootstrap_span, heartbeat_span, mount_span, registration_span};
pub use tracer::{
    LogFormat, OtlpConfig, TracerError, TracingConfig, init_tracer, shutdown_tracer,
};
