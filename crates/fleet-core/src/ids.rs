//! Strongly-typed identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a single process start. A new one is minted on every boot
/// and never written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BootId(Uuid);

impl BootId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BootId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boot_{}", self.0)
    }
}

impl std::str::FromStr for BootId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let uuid_str = s.strip_prefix("boot_").unwrap_or(s);
        Ok(Self(Uuid::parse_str(uuid_str)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_id_display() {
        let id = BootId::new();
        assert!(id.to_string().starts_with("boot_"));
    }

    #[test]
    fn test_boot_id_parse() {
        let id = BootId::new();
        let parsed: BootId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_boot_ids_are_unique_per_start() {
        assert_ne!(BootId::new(), BootId::new());
    }
}
