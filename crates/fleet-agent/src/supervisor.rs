//! Lifecycle supervisor: drives one boot from configuration to shutdown.

use crate::cache::{CacheAddress, SharedCacheMount, read_cache_address};
use crate::capabilities;
use crate::config::AgentConfig;
use crate::heartbeat::{HealthReporter, HeartbeatStats};
use crate::registration::RegistrationClient;
use crate::retry::RetryScheduler;
use crate::status::StatusMarker;
use crate::wait::{BoundedWait, WaitOutcome};
use crate::workspace::prepare_workspace;
use fleet_core::agent::{Os, RegistrationState, WorkChannel};
use fleet_core::lifecycle::{ExitStatus, LifecyclePhase};
use fleet_core::ports::{CacheMounter, ConfigSource, CoordinatorTransport};
use fleet_core::{BootId, Error, Result};
use fleet_trace::{AgentAttributes, bootstrap_span, mount_span, registration_span};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

/// Summary of one boot, produced when the supervisor reaches `Terminated`.
#[derive(Debug, Clone, PartialEq)]
pub struct BootOutcome {
    pub status: ExitStatus,
    /// Registration attempts made.
    pub attempts: u32,
    pub agent_name: Option<String>,
    pub cache: Option<SharedCacheMount>,
    pub heartbeat: Option<HeartbeatStats>,
    pub last_error: Option<String>,
}

impl BootOutcome {
    fn new() -> Self {
        Self {
            status: ExitStatus::Shutdown,
            attempts: 0,
            agent_name: None,
            cache: None,
            heartbeat: None,
            last_error: None,
        }
    }

    /// Outcome of a boot that failed with `err` before registering.
    pub fn failed(err: &Error) -> Self {
        let mut outcome = Self::new();
        outcome.record_error(err);
        outcome
    }

    fn record_error(&mut self, err: &Error) {
        self.status = ExitStatus::from(err);
        if !matches!(err, Error::Cancelled) {
            self.last_error = Some(err.to_string());
        }
    }

    /// Write the terminal status marker and log the terminal line.
    pub fn finish(&self, marker: &StatusMarker) {
        marker.record(self.status.marker());

        let last_error = self.last_error.as_deref().unwrap_or("");
        if self.status.is_success() {
            info!(
                phase = %LifecyclePhase::Terminated,
                exit_code = self.status.code(),
                attempts = self.attempts,
                last_error,
                "Agent terminated"
            );
        } else {
            error!(
                phase = %LifecyclePhase::Terminated,
                exit_code = self.status.code(),
                attempts = self.attempts,
                last_error,
                "Agent terminated"
            );
        }
    }
}

/// Owns the lifecycle phase and moves it forward:
/// `Init -> WaitingForCache -> Bootstrapping -> Connected -> Terminated`.
///
/// Any phase may jump to `Terminated`. Cancelling the token is the only way
/// out of `Connected`.
pub struct LifecycleSupervisor {
    config: AgentConfig,
    source: Box<dyn ConfigSource>,
    transport: Arc<dyn CoordinatorTransport>,
    mounter: Arc<dyn CacheMounter>,
    marker: StatusMarker,
    boot_id: BootId,
    cancel: CancellationToken,
    phase_tx: watch::Sender<LifecyclePhase>,
}

impl LifecycleSupervisor {
    pub fn new(
        config: AgentConfig,
        source: Box<dyn ConfigSource>,
        transport: Arc<dyn CoordinatorTransport>,
        mounter: Arc<dyn CacheMounter>,
        cancel: CancellationToken,
    ) -> Self {
        let (phase_tx, _) = watch::channel(LifecyclePhase::Init);
        let marker = StatusMarker::new(config.status_file.clone());
        Self {
            config,
            source,
            transport,
            mounter,
            marker,
            boot_id: BootId::new(),
            cancel,
            phase_tx,
        }
    }

    pub fn boot_id(&self) -> BootId {
        self.boot_id
    }

    /// Watch phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase_tx.subscribe()
    }

    /// Run the boot to completion.
    pub async fn run(self) -> BootOutcome {
        let attrs = AgentAttributes::new()
            .agent(self.config.identity.agent_name.as_deref())
            .boot(self.boot_id.to_string())
            .label_prefix(self.config.identity.label_prefix.as_str());
        let span = bootstrap_span(&attrs);
        self.run_phases().instrument(span).await
    }

    async fn run_phases(self) -> BootOutcome {
        let mut outcome = BootOutcome::new();

        if let Err(err) = self.boot(&mut outcome).await {
            outcome.record_error(&err);
        }

        self.phase_tx.send_replace(LifecyclePhase::Terminated);
        outcome.finish(&self.marker);
        outcome
    }

    fn enter(&self, phase: LifecyclePhase) {
        let previous = self.phase_tx.send_replace(phase);
        self.marker.record(phase.as_str());
        info!(from = %previous, to = %phase, "Lifecycle phase changed");
    }

    async fn boot(&self, outcome: &mut BootOutcome) -> Result<()> {
        self.enter(LifecyclePhase::Init);
        let (identity, endpoint) = self.source.load().await?;
        Span::current().record("fleet.coordinator", endpoint.primary.as_str());

        let workspace = &self.config.workspace;
        if let Err(e) = prepare_workspace(&workspace.dir, workspace.purge_on_boot) {
            warn!(dir = %workspace.dir.display(), error = %e, "Workspace preparation failed");
        }

        self.enter(LifecyclePhase::WaitingForCache);
        outcome.cache = self.wait_for_cache().await?;

        self.enter(LifecyclePhase::Bootstrapping);
        let label_prefix =
            capabilities::label_prefix(&self.config.identity.label_prefix, Os::detect(), &identity);
        Span::current().record("fleet.agent.label_prefix", label_prefix.as_str());
        let client =
            RegistrationClient::new(Arc::clone(&self.transport), self.boot_id, label_prefix);
        tokio::spawn(log_registration(client.subscribe()).instrument(Span::current()));

        let mut scheduler = RetryScheduler::new(self.config.retry.policy(), self.cancel.clone());
        let registered = scheduler
            .run_with_retry(|attempt| {
                let client = &client;
                let identity = &identity;
                let endpoint = &endpoint;
                async move { client.register(identity, endpoint).await.into_result() }
                    .instrument(registration_span(attempt))
            })
            .await;
        outcome.attempts = scheduler.budget().attempt_count();
        let channel = registered?;

        outcome.agent_name = Some(channel.agent_name.clone());
        Span::current().record("fleet.agent.name", channel.agent_name.as_str());

        self.enter(LifecyclePhase::Connected);
        outcome.heartbeat = Some(self.stay_connected(&channel).await);
        Ok(())
    }

    /// Wait for the cache address and mount it. Never fails the boot except
    /// on cancellation.
    async fn wait_for_cache(&self) -> Result<Option<SharedCacheMount>> {
        let cache = &self.config.cache;
        let Some(address_file) = &cache.address_file else {
            info!("Shared cache not configured");
            return Ok(None);
        };

        let wait = BoundedWait::new(cache.poll_interval(), cache.max_polls);
        let address = wait
            .poll_until(&self.cancel, || match read_cache_address(address_file) {
                CacheAddress::Pending => None,
                CacheAddress::Disabled => Some(None),
                CacheAddress::Available(remote) => Some(Some(remote)),
            })
            .await;

        let remote_address = match address {
            WaitOutcome::Cancelled => return Err(Error::Cancelled),
            WaitOutcome::Exhausted => {
                warn!(
                    file = %address_file.display(),
                    waited_secs = wait.ceiling().as_secs(),
                    "Cache address never appeared, continuing without shared cache"
                );
                return Ok(None);
            }
            WaitOutcome::Ready(None) => {
                info!("Shared cache disabled for this machine");
                return Ok(None);
            }
            WaitOutcome::Ready(Some(remote)) => remote,
        };

        let mounted = match self
            .mounter
            .mount(&remote_address, &cache.local_path)
            .instrument(mount_span(&remote_address))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(remote = %remote_address, error = %e, "Continuing without shared cache");
                false
            }
        };

        Ok(Some(SharedCacheMount {
            remote_address,
            local_path: cache.local_path.clone(),
            mounted,
        }))
    }

    /// Report liveness until shutdown, then say goodbye to the coordinator.
    async fn stay_connected(&self, channel: &WorkChannel) -> HeartbeatStats {
        let heartbeat = &self.config.heartbeat;
        let interval = channel.heartbeat_interval.unwrap_or(heartbeat.interval());
        let reporter = HealthReporter::new(
            Arc::clone(&self.transport),
            channel.clone(),
            self.boot_id,
            interval,
            heartbeat.timeout(),
        );

        let heartbeat_shutdown = self.cancel.child_token();
        let handle = tokio::spawn(
            async move { reporter.run(heartbeat_shutdown).await }.instrument(Span::current()),
        );

        self.cancel.cancelled().await;
        info!(agent = %channel.agent_name, "Shutdown requested");

        let stats = match handle.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Heartbeat task ended abnormally");
                HeartbeatStats::default()
            }
        };

        if self.config.deregister_on_shutdown {
            match tokio::time::timeout(heartbeat.timeout(), self.transport.deregister(channel))
                .await
            {
                Ok(Ok(())) => info!(agent = %channel.agent_name, "Deregistered from coordinator"),
                Ok(Err(e)) => warn!(error = %e, "Deregistration failed"),
                Err(_) => warn!("Deregistration timed out"),
            }
        }

        stats
    }
}

/// Log registration transitions until the client goes away.
async fn log_registration(mut state: watch::Receiver<RegistrationState>) {
    while state.changed().await.is_ok() {
        match &*state.borrow_and_update() {
            RegistrationState::Unregistered => {}
            RegistrationState::Registering => debug!("Registration in progress"),
            RegistrationState::Registered(channel) => debug!(
                agent = %channel.agent_name,
                coordinator = %channel.address,
                "Registration state: registered"
            ),
            RegistrationState::Failed(reason) => {
                debug!(reason = ?reason, "Registration state: failed")
            }
        }
    }
}
