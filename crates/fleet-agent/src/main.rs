//! Fleet agent entrypoint.

use clap::Parser;
use fleet_agent::cache::CommandMounter;
use fleet_agent::status::StatusMarker;
use fleet_agent::{
    AgentConfig, BootOutcome, FileConfigSource, HttpCoordinator, LifecycleSupervisor,
};
use fleet_core::Error;
use fleet_core::lifecycle::ExitStatus;
use fleet_trace::{LogFormat, TracingConfig, init_tracer, shutdown_tracer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "fleet-agent")]
#[command(author, version, about = "Bootstrap and register a CI fleet machine", long_about = None)]
struct Cli {
    /// Agent settings file
    #[arg(short, long, env = "FLEET_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Primary coordinator address
    #[arg(short = 'm', long, env = "FLEET_COORDINATOR_URL")]
    coordinator: Option<String>,

    /// File holding the primary coordinator address
    #[arg(long)]
    coordinator_file: Option<PathBuf>,

    /// Fallback coordinator address
    #[arg(long, env = "FLEET_COORDINATOR_SECONDARY_URL")]
    coordinator_secondary: Option<String>,

    /// File holding the fallback coordinator address
    #[arg(long)]
    coordinator_secondary_file: Option<PathBuf>,

    /// Agent name; the coordinator assigns one when unset
    #[arg(short = 'n', long, env = "FLEET_AGENT_NAME")]
    agent_name: Option<String>,

    /// Log output format (pretty or json)
    #[arg(long, default_value = "pretty")]
    log_format: LogFormat,

    /// OTLP collector endpoint for span export
    #[arg(long, env = "FLEET_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

impl Cli {
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(url) = &self.coordinator {
            config.coordinator.url = Some(url.clone());
        }
        if let Some(path) = &self.coordinator_file {
            config.coordinator.url_file = path.clone();
        }
        if let Some(url) = &self.coordinator_secondary {
            config.coordinator.secondary_url = Some(url.clone());
        }
        if let Some(path) = &self.coordinator_secondary_file {
            config.coordinator.secondary_url_file = Some(path.clone());
        }
        if let Some(name) = &self.agent_name {
            config.identity.agent_name = Some(name.clone());
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut tracing_config = TracingConfig::default().with_log_format(cli.log_format);
    if let Some(host) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
        tracing_config = tracing_config.with_resource_attribute("host.name", host);
    }
    if let Some(endpoint) = &cli.otlp_endpoint {
        tracing_config = tracing_config.with_otlp_endpoint(endpoint.clone());
    }
    if let Err(e) = init_tracer(&tracing_config) {
        eprintln!("{}", e);
        return ExitStatus::Internal.into();
    }

    let status = run(&cli).await;
    shutdown_tracer();
    status.into()
}

async fn run(cli: &Cli) -> ExitStatus {
    let mut config = match AgentConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load agent configuration");
            return abort(AgentConfig::default().status_file, &e);
        }
    };
    cli.apply(&mut config);

    let transport = match HttpCoordinator::new(
        config.coordinator.registration_timeout(),
        config.heartbeat.timeout(),
    ) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            error!(error = %e, "Failed to create coordinator client");
            return abort(config.status_file, &e);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(listen_for_shutdown(cancel.clone()));

    let supervisor = LifecycleSupervisor::new(
        config.clone(),
        Box::new(FileConfigSource::new(&config)),
        transport,
        Arc::new(CommandMounter::new(&config.cache)),
        cancel,
    );
    info!(boot_id = %supervisor.boot_id(), "Starting fleet agent");

    supervisor.run().await.status
}

/// Terminate before the supervisor exists.
fn abort(status_file: Option<PathBuf>, err: &Error) -> ExitStatus {
    let outcome = BootOutcome::failed(err);
    outcome.finish(&StatusMarker::new(status_file));
    outcome.status
}

async fn listen_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Received shutdown signal");
    cancel.cancel();
}
