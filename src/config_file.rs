//! Configuration file handling for saving and loading provisioning configs.
//!
//! Every field has a default, so the binary runs with no file at all and a
//! partial JSON file only overrides what it names.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};
use crate::topology::Topology;

/// Default persisted mount table
pub const DEFAULT_FSTAB: &str = "/etc/fstab";

/// Default pause after asking the kernel to re-read a partition table
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Provisioning configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub topology: Topology,
    pub fstab_path: PathBuf,
    pub settle_delay_ms: u64,
    /// Treat every stage issue as fatal
    pub strict: bool,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            fstab_path: PathBuf::from(DEFAULT_FSTAB),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            strict: false,
        }
    }
}

impl ProvisionConfig {
    /// Create the built-in configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")
            .map_err(|e| ProvisionError::config(format!("{:#}", e)))?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))
            .map_err(|e| ProvisionError::config(format!("{:#}", e)))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))
            .map_err(|e| ProvisionError::config(format!("{:#}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .context("Failed to parse configuration JSON")
            .map_err(|e| ProvisionError::config(format!("{:#}", e)))?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.fstab_path.as_os_str().is_empty() {
            return Err(ProvisionError::config("fstab path must not be empty"));
        }
        self.topology.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_validates() {
        let config = ProvisionConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.fstab_path, PathBuf::from("/etc/fstab"));
        assert_eq!(config.settle_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("vmstorage.json");

        let mut config = ProvisionConfig::new();
        config.settle_delay_ms = 0;
        config.save_to_file(&path).expect("save");

        let loaded = ProvisionConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "fstab_path": "/tmp/fstab.test" }"#).expect("write");

        let loaded = ProvisionConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded.fstab_path, PathBuf::from("/tmp/fstab.test"));
        assert_eq!(loaded.topology, Topology::default());
        assert_eq!(loaded.settle_delay_ms, DEFAULT_SETTLE_DELAY_MS);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write");

        let err = ProvisionConfig::load_from_file(&path).expect_err("should fail");
        assert!(matches!(err, ProvisionError::Config(_)));
    }

    #[test]
    fn test_empty_fstab_path_rejected() {
        let mut config = ProvisionConfig::new();
        config.fstab_path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
