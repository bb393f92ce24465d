//! Configuration storage for the observatory executor.
//!
//! The executor configuration (device table, on-target tolerance, simulator
//! timings) lives in a single JSON file under ~/.cf_config/ by default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::device::DeviceKind;

/// Errors raised while loading, saving or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config declares no devices")]
    NoDevices,

    #[error("Device name cannot be empty")]
    EmptyDeviceName,

    #[error("Device {0} declared more than once")]
    DuplicateDevice(String),
}

/// One device connection the executor should open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Devices in registration order; clients receive events in this order
    pub devices: Vec<DeviceConfig>,
    /// Pointing within this many degrees of a target needs no slew
    pub on_target_tolerance_deg: f64,
    /// Images kept while no processor accepts work
    pub image_backlog: usize,
    /// Simulated slew duration in milliseconds
    pub sim_slew_ms: u64,
    /// Simulated readout duration in milliseconds
    pub sim_readout_ms: u64,
    /// Simulated mount refuses slews below this declination
    pub sim_dec_limit_deg: f64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            devices: vec![
                DeviceConfig::new("T0", DeviceKind::Telescope),
                DeviceConfig::new("C0", DeviceKind::Camera),
                DeviceConfig::new("W0", DeviceKind::FilterWheel),
                DeviceConfig::new("IMGP", DeviceKind::ImageProcessor),
            ],
            on_target_tolerance_deg: 1.0 / 60.0,
            image_backlog: 64,
            sim_slew_ms: 200,
            sim_readout_ms: 50,
            sim_dec_limit_deg: -30.0,
        }
    }
}

impl ExecConfig {
    /// Check the device table is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(ConfigError::EmptyDeviceName);
            }
            if !seen.insert(device.name.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.name.clone()));
            }
        }
        Ok(())
    }

    /// Names of all devices of the given kind, in declaration order.
    pub fn devices_of(&self, kind: DeviceKind) -> impl Iterator<Item = &str> {
        self.devices
            .iter()
            .filter(move |d| d.kind == kind)
            .map(|d| d.name.as_str())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ExecConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Directory under `$HOME` holding the executor's saved settings.
pub const DEFAULT_CONFIG_DIR: &str = ".cf_config";

/// On-disk home of the executor configuration.
///
/// `exec_sim` reads `exec_config.json` from here when no `--config` path is
/// given, and `--save-config` writes it back.
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    root_path: PathBuf,
}

impl ConfigStorage {
    /// Store rooted at `$HOME/.cf_config`.
    pub fn new() -> std::io::Result<Self> {
        let home = std::env::var_os("HOME").ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "HOME not set, cannot locate executor config",
            )
        })?;
        Ok(Self::with_path(PathBuf::from(home).join(DEFAULT_CONFIG_DIR)))
    }

    /// Store rooted somewhere else, e.g. a scratch directory in tests.
    pub fn with_path(root_path: PathBuf) -> Self {
        Self { root_path }
    }

    /// Directory the executor config is read from and saved to.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn exec_config_path(&self) -> PathBuf {
        self.root_path.join("exec_config.json")
    }

    /// Get the executor configuration.
    ///
    /// Returns None if no configuration has been saved.
    /// Returns Some(Err) if the file exists but cannot be loaded.
    pub fn get_exec_config(&self) -> Option<Result<ExecConfig, ConfigError>> {
        let path = self.exec_config_path();

        if !path.exists() {
            return None;
        }

        Some(ExecConfig::load_from_file(&path))
    }

    /// Save the executor configuration.
    ///
    /// Creates the config directory if it doesn't exist.
    /// Returns the path where the configuration was saved.
    pub fn save_exec_config(&self, config: &ExecConfig) -> Result<PathBuf, ConfigError> {
        config.validate()?;
        std::fs::create_dir_all(&self.root_path)?;

        let path = self.exec_config_path();
        config.save_to_file(&path)?;
        info!("Saved exec config to {}", path.display());
        Ok(path)
    }

    /// Delete the executor configuration.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete_exec_config(&self) -> std::io::Result<bool> {
        let path = self.exec_config_path();

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(&path)?;
        info!("Deleted exec config {}", path.display());
        Ok(true)
    }
}

impl Default for ConfigStorage {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::with_path(PathBuf::from(DEFAULT_CONFIG_DIR)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_storage() -> (tempfile::TempDir, ConfigStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConfigStorage::with_path(dir.path().join("cf_config"));
        (dir, storage)
    }

    #[test]
    fn test_default_store_location() {
        let storage = ConfigStorage::default();
        assert!(storage.root_path().ends_with(DEFAULT_CONFIG_DIR));
    }

    #[test]
    fn test_get_nonexistent_config() {
        let (_dir, storage) = create_test_storage();
        assert!(storage.get_exec_config().is_none());
    }

    #[test]
    fn test_save_and_load_exec_config() {
        let (_dir, storage) = create_test_storage();

        let config = ExecConfig {
            on_target_tolerance_deg: 0.5,
            ..Default::default()
        };
        let path = storage.save_exec_config(&config).unwrap();
        assert!(path.exists());

        let loaded = storage
            .get_exec_config()
            .expect("Config should exist")
            .expect("Config should load successfully");

        assert_eq!(loaded.devices, config.devices);
        assert_relative_eq!(loaded.on_target_tolerance_deg, 0.5);
        assert_eq!(
            loaded.devices_of(DeviceKind::Camera).collect::<Vec<_>>(),
            vec!["C0"]
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let (_dir, storage) = create_test_storage();
        std::fs::create_dir_all(storage.root_path()).unwrap();
        std::fs::write(
            storage.root_path().join("exec_config.json"),
            r#"{"devices": [{"name": "CAM", "kind": "camera"}]}"#,
        )
        .unwrap();

        let loaded = storage.get_exec_config().unwrap().unwrap();
        assert_eq!(loaded.devices, vec![DeviceConfig::new("CAM", DeviceKind::Camera)]);
        assert_eq!(loaded.image_backlog, ExecConfig::default().image_backlog);
    }

    #[test]
    fn test_corrupt_config_is_error() {
        let (_dir, storage) = create_test_storage();
        std::fs::create_dir_all(storage.root_path()).unwrap();
        std::fs::write(storage.root_path().join("exec_config.json"), "{not json").unwrap();

        assert!(matches!(
            storage.get_exec_config(),
            Some(Err(ConfigError::Json(_)))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_device_tables() {
        let mut config = ExecConfig {
            devices: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoDevices)));

        config.devices = vec![
            DeviceConfig::new("C0", DeviceKind::Camera),
            DeviceConfig::new("C0", DeviceKind::Telescope),
        ];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateDevice(name)) if name == "C0"
        ));

        config.devices = vec![DeviceConfig::new(" ", DeviceKind::Dome)];
        assert!(matches!(config.validate(), Err(ConfigError::EmptyDeviceName)));

        let (_dir, storage) = create_test_storage();
        assert!(storage.save_exec_config(&config).is_err());
    }

    #[test]
    fn test_delete_exec_config() {
        let (_dir, storage) = create_test_storage();
        storage.save_exec_config(&ExecConfig::default()).unwrap();

        assert!(storage.delete_exec_config().unwrap());
        assert!(storage.get_exec_config().is_none());
        assert!(!storage.delete_exec_config().unwrap());
    }
}
