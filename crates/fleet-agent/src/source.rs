//! Boot-file backed configuration source.

use crate::capabilities;
use crate::config::AgentConfig;
use async_trait::async_trait;
use fleet_core::agent::{AgentIdentity, CoordinatorEndpoint, Protocol};
use fleet_core::ports::ConfigSource;
use fleet_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads identity and coordinator address from values in the agent config,
/// falling back to one-line files dropped on the machine at provisioning
/// time.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    url: Option<String>,
    url_file: PathBuf,
    secondary_url: Option<String>,
    secondary_url_file: Option<PathBuf>,
    protocol: Protocol,
    agent_name: Option<String>,
    agent_name_file: Option<PathBuf>,
    capability_tags: Vec<String>,
    capability_tags_file: Option<PathBuf>,
    detect_capabilities: bool,
}

impl FileConfigSource {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            url: config.coordinator.url.clone(),
            url_file: config.coordinator.url_file.clone(),
            secondary_url: config.coordinator.secondary_url.clone(),
            secondary_url_file: config.coordinator.secondary_url_file.clone(),
            protocol: config.coordinator.protocol,
            agent_name: config.identity.agent_name.clone(),
            agent_name_file: config.identity.agent_name_file.clone(),
            capability_tags: config.identity.capability_tags.clone(),
            capability_tags_file: config.identity.capability_tags_file.clone(),
            detect_capabilities: config.identity.detect_capabilities,
        }
    }

    fn primary_address(&self) -> Result<String> {
        if let Some(url) = non_empty(self.url.as_deref()) {
            return Ok(url);
        }
        read_first_line(&self.url_file)?.ok_or_else(|| {
            Error::ConfigMissing(format!(
                "coordinator address (set coordinator.url or write {})",
                self.url_file.display()
            ))
        })
    }

    fn secondary_address(&self) -> Result<Option<String>> {
        if let Some(url) = non_empty(self.secondary_url.as_deref()) {
            return Ok(Some(url));
        }
        match &self.secondary_url_file {
            Some(path) => read_first_line(path),
            None => Ok(None),
        }
    }

    fn agent_name(&self) -> Result<Option<String>> {
        if let Some(name) = non_empty(self.agent_name.as_deref()) {
            return Ok(Some(name));
        }
        match &self.agent_name_file {
            Some(path) => read_first_line(path),
            None => Ok(None),
        }
    }

    async fn tags(&self) -> Result<Vec<String>> {
        let mut tags = self.capability_tags.clone();
        if let Some(path) = &self.capability_tags_file {
            if let Some(contents) = read_optional(path)? {
                tags.extend(split_tags(&contents));
            }
        }
        if self.detect_capabilities {
            tags.extend(capabilities::detected_tags().await);
        }
        Ok(tags
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect())
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<(AgentIdentity, CoordinatorEndpoint)> {
        let primary = self.primary_address()?;
        let secondary = self.secondary_address()?;
        let endpoint =
            CoordinatorEndpoint::from_addresses(&primary, secondary.as_deref(), self.protocol)?;

        let identity = AgentIdentity::new(self.agent_name()?).with_tags(self.tags().await?);

        debug!(
            agent = identity.display_name(),
            primary = %endpoint.primary,
            secondary = ?endpoint.secondary.as_ref().map(|u| u.as_str()),
            tags = ?identity.capability_tags,
            "Boot configuration loaded"
        );

        Ok((identity, endpoint))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn split_tags(contents: &str) -> impl Iterator<Item = String> + '_ {
    contents
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// File contents, or `None` when the file does not exist.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::InvalidConfig(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

/// First non-blank line of a file. Missing and empty files both read as unset.
fn read_first_line(path: &Path) -> Result<Option<String>> {
    Ok(read_optional(path)?.and_then(|contents| {
        contents
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
    }))
}
