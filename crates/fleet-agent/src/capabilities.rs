//! Hardware capability detection.

use fleet_core::agent::{AgentIdentity, Arch, Os};
use std::io;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

#[cfg(windows)]
const NVIDIA_SMI_FALLBACK: &str = r"C:\Program Files\NVIDIA Corporation\NVSMI\nvidia-smi.exe";

/// Upper bound on a single `nvidia-smi` invocation.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Count GPUs listed by `nvidia-smi -L`.
///
/// CPU-only images may ship the binary without any device, so only lines
/// naming a GPU are counted.
pub fn count_gpu_lines(listing: &str) -> usize {
    listing.lines().filter(|line| line.contains("GPU")).count()
}

/// Number of GPUs on this host. Zero when `nvidia-smi` is absent or fails.
pub async fn gpu_count() -> usize {
    let output = match list_gpus("nvidia-smi").await {
        Ok(output) => output,
        Err(e) => match fallback_gpu_listing().await {
            Some(output) => output,
            None => {
                debug!(error = %e, "nvidia-smi not found, assuming no GPUs");
                return 0;
            }
        },
    };

    if !output.status.success() {
        warn!(status = ?output.status, "nvidia-smi failed, assuming no GPUs");
        return 0;
    }

    let count = count_gpu_lines(&String::from_utf8_lossy(&output.stdout));
    debug!(count, "GPUs detected");
    count
}

/// Run `<program> -L`, killing it if it outlives [`PROBE_TIMEOUT`].
async fn list_gpus(program: &str) -> io::Result<Output> {
    let mut command = Command::new(program);
    command.arg("-L").kill_on_drop(true);
    match timeout(PROBE_TIMEOUT, command.output()).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} -L timed out", program),
        )),
    }
}

#[cfg(windows)]
async fn fallback_gpu_listing() -> Option<Output> {
    list_gpus(NVIDIA_SMI_FALLBACK).await.ok()
}

#[cfg(not(windows))]
async fn fallback_gpu_listing() -> Option<Output> {
    None
}

/// Tags describing this machine: OS, architecture, and `gpu` or `cpu`.
pub async fn detected_tags() -> Vec<String> {
    let accel = if gpu_count().await > 0 { "gpu" } else { "cpu" };
    vec![
        Os::detect().as_str().to_string(),
        Arch::detect().as_str().to_string(),
        accel.to_string(),
    ]
}

/// Slot family requested from the coordinator when no name is configured,
/// e.g. `fleet-linux-gpu`.
pub fn label_prefix(base: &str, os: Os, identity: &AgentIdentity) -> String {
    let accel = if identity.has_tag("gpu") { "gpu" } else { "cpu" };
    format!("{}-{}-{}", base, os.as_str(), accel)
}
