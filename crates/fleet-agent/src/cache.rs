//! Shared build cache discovery and mounting.

use crate::config::CacheConfig;
use async_trait::async_trait;
use fleet_core::ports::CacheMounter;
use fleet_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Value in the address file that turns the cache off.
pub const CACHE_DISABLED: &str = "NONE";

/// What the cache address file currently says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheAddress {
    /// Provisioning declared that this machine has no shared cache.
    Disabled,
    /// Not written yet.
    Pending,
    Available(String),
}

/// Read the cache address file. A missing or blank file is still pending;
/// an unreadable one is treated the same way.
pub fn read_cache_address(path: &Path) -> CacheAddress {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "Cache address file unreadable");
            }
            return CacheAddress::Pending;
        }
    };

    match contents.lines().map(str::trim).find(|l| !l.is_empty()) {
        None => CacheAddress::Pending,
        Some(address) if address.eq_ignore_ascii_case(CACHE_DISABLED) => CacheAddress::Disabled,
        Some(address) => CacheAddress::Available(address.to_string()),
    }
}

/// A mounted shared cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedCacheMount {
    pub remote_address: String,
    pub local_path: PathBuf,
    pub mounted: bool,
}

/// Mounts the cache with the system `mount` binary.
#[derive(Debug, Clone)]
pub struct CommandMounter {
    mount_type: String,
    mount_options: String,
    mount_table: PathBuf,
}

impl CommandMounter {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            mount_type: config.mount_type.clone(),
            mount_options: config.mount_options.clone(),
            mount_table: PathBuf::from("/proc/mounts"),
        }
    }

    /// Source argument for `mount`. NFS needs an export path.
    fn source(&self, remote_address: &str) -> String {
        if self.mount_type.starts_with("nfs") && !remote_address.contains(':') {
            format!("{}:/", remote_address)
        } else {
            remote_address.to_string()
        }
    }

    fn is_mounted(&self, local_path: &Path) -> bool {
        let Ok(table) = std::fs::read_to_string(&self.mount_table) else {
            return false;
        };
        is_listed(&table, local_path)
    }
}

/// Whether `local_path` is a mount point in a `/proc/mounts` style table.
fn is_listed(table: &str, local_path: &Path) -> bool {
    let target = local_path.to_string_lossy();
    let target = target.trim_end_matches('/');
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| mount_point == target)
}

#[async_trait]
impl CacheMounter for CommandMounter {
    async fn mount(&self, remote_address: &str, local_path: &Path) -> Result<()> {
        if self.is_mounted(local_path) {
            info!(path = %local_path.display(), "Cache already mounted");
            return Ok(());
        }

        std::fs::create_dir_all(local_path).map_err(|e| {
            Error::MountFailed(format!("cannot create {}: {}", local_path.display(), e))
        })?;

        let source = self.source(remote_address);
        let output = tokio::process::Command::new("mount")
            .args(["-t", &self.mount_type, "-o", &self.mount_options])
            .arg(&source)
            .arg(local_path)
            .output()
            .await
            .map_err(|e| Error::MountFailed(format!("cannot run mount: {}", e)))?;

        if !output.status.success() {
            return Err(Error::MountFailed(format!(
                "mount {} at {} exited with {:?}: {}",
                source,
                local_path.display(),
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!(remote = %source, path = %local_path.display(), "Cache mounted");
        Ok(())
    }
}
