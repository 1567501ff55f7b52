//! Heartbeat loop for periodic liveness reporting.

use fleet_core::BootId;
use fleet_core::agent::WorkChannel;
use fleet_core::ports::CoordinatorTransport;
use fleet_core::protocol::{AgentStatus, CapacityMetrics, LivenessSignal};
use std::sync::Arc;
use sysinfo::System;
use tokio::time::{Duration, MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Consecutive failures logged as warnings before escalating to errors.
const WARN_THRESHOLD: u32 = 3;

/// Shortest period between liveness signals.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub sent: u64,
    pub failed: u64,
}

/// Sends a liveness signal every interval while connected.
///
/// A failed send never ends the loop; only shutdown does.
pub struct HealthReporter {
    transport: Arc<dyn CoordinatorTransport>,
    channel: WorkChannel,
    boot_id: BootId,
    interval: Duration,
    send_timeout: Duration,
}

impl HealthReporter {
    pub fn new(
        transport: Arc<dyn CoordinatorTransport>,
        channel: WorkChannel,
        boot_id: BootId,
        interval: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            channel,
            boot_id,
            interval: interval.max(MIN_INTERVAL),
            send_timeout,
        }
    }

    /// Run the heartbeat loop until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) -> HeartbeatStats {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sys = System::new();
        let mut stats = HeartbeatStats::default();
        let mut consecutive_failures = 0u32;

        info!(
            agent = %self.channel.agent_name,
            interval_secs = self.interval.as_secs(),
            "Starting heartbeat service"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(sent = stats.sent, failed = stats.failed, "Heartbeat service shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let span = fleet_trace::heartbeat_span(&self.channel.agent_name);
                    match self.send_heartbeat(&mut sys).instrument(span).await {
                        Ok(()) => {
                            if consecutive_failures > 0 {
                                info!(after_failures = consecutive_failures, "Heartbeat recovered");
                            }
                            consecutive_failures = 0;
                            stats.sent += 1;
                        }
                        Err(e) => {
                            consecutive_failures += 1;
                            stats.failed += 1;
                            if consecutive_failures <= WARN_THRESHOLD {
                                warn!(error = %e, consecutive_failures, "Failed to send heartbeat");
                            } else {
                                error!(error = %e, consecutive_failures, "Failed to send heartbeat");
                            }
                        }
                    }
                }
            }
        }

        stats
    }

    async fn send_heartbeat(&self, sys: &mut System) -> fleet_core::Result<()> {
        let signal = LivenessSignal {
            agent_name: self.channel.agent_name.clone(),
            boot_id: self.boot_id,
            status: AgentStatus::Idle,
            capacity: Some(capacity(sys)),
            timestamp: chrono::Utc::now(),
        };

        match timeout(
            self.send_timeout,
            self.transport.send_liveness(&self.channel, &signal),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(fleet_core::Error::Timeout {
                    seconds: self.send_timeout.as_secs(),
                });
            }
        }

        debug!(agent = %self.channel.agent_name, "Heartbeat sent");
        Ok(())
    }
}

fn capacity(sys: &mut System) -> CapacityMetrics {
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let load = System::load_average();
    CapacityMetrics {
        cpu_count: sys.cpus().len(),
        cpu_percent: sys.global_cpu_usage() as f64,
        memory_used_bytes: sys.used_memory(),
        memory_total_bytes: sys.total_memory(),
        load_average: [load.one, load.five, load.fifteen],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use url::Url;

    fn channel() -> WorkChannel {
        WorkChannel {
            address: Url::parse("http://ci-master.internal").unwrap(),
            agent_name: "linux-cpu-7".to_string(),
            token: "tok-1".to_string(),
            heartbeat_interval: None,
        }
    }

    fn reporter(transport: &Arc<ScriptedTransport>, boot_id: BootId) -> HealthReporter {
        let transport: Arc<dyn CoordinatorTransport> = transport.clone();
        HealthReporter::new(
            transport,
            channel(),
            boot_id,
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
    }

    fn cancel_after(token: &CancellationToken, after: Duration) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            token.cancel();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_every_interval_until_shutdown() {
        let transport = Arc::new(ScriptedTransport::new([]));
        let boot_id = BootId::new();
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(95));

        let stats = reporter(&transport, boot_id).run(shutdown).await;

        assert_eq!(stats, HeartbeatStats { sent: 4, failed: 0 });
        let signals = transport.signals();
        assert_eq!(signals.len(), 4);
        assert!(signals.iter().all(|s| s.boot_id == boot_id));
        assert!(signals.iter().all(|s| s.agent_name == "linux-cpu-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        let transport = Arc::new(ScriptedTransport::new([]).failing_liveness());
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_secs(155));

        let stats = reporter(&transport, BootId::new()).run(shutdown).await;

        assert_eq!(stats, HeartbeatStats { sent: 0, failed: 6 });
        assert_eq!(transport.liveness_attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let transport = Arc::new(ScriptedTransport::new([]));
        let shutdown = CancellationToken::new();
        cancel_after(&shutdown, Duration::from_millis(10_500));
        let dyn_transport: Arc<dyn CoordinatorTransport> = transport.clone();
        let reporter = HealthReporter::new(
            dyn_transport,
            channel(),
            BootId::new(),
            Duration::ZERO,
            Duration::from_secs(5),
        );

        let stats = reporter.run(shutdown).await;

        assert_eq!(stats, HeartbeatStats { sent: 11, failed: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_immediately_when_already_cancelled() {
        let transport = Arc::new(ScriptedTransport::new([]));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let stats = reporter(&transport, BootId::new()).run(shutdown).await;

        assert_eq!(stats, HeartbeatStats::default());
        assert_eq!(transport.liveness_attempts(), 0);
    }
}
