//! Configuration file support for odin-cli.
//!
//! Configuration is loaded from multiple sources with the following
//! priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (`ODIN_*`)
//! 3. Local config file (`./odin.toml`)
//! 4. Global config file (`~/.config/odin/config.toml`)

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default-value configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash-related defaults.
    #[serde(default)]
    pub flash: FlashConfig,
}

/// A USB device identity remembered across runs, for re-selecting the same
/// device without re-scanning every candidate matching the ODIN vendor ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    #[must_use]
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Default read timeout, in seconds, for ordinary command acks.
    pub timeout_secs: Option<u64>,
    /// The last device successfully connected to, used to prefer that
    /// device when several candidates share the ODIN vendor ID.
    #[serde(default)]
    pub remembered_device: Option<UsbDevice>,
}

/// Flash-related defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Update the bootloader by default.
    #[serde(default)]
    pub update_bootloader: bool,
    /// Clear EFS by default.
    #[serde(default)]
    pub efs_clear: bool,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new("odin.toml")) {
            debug!("loaded local config from odin.toml");
            config.merge(local_config);
        }

        config
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        toml::from_str(&content).ok()
    }

    fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "odin").map(|dirs| dirs.config_dir().to_path_buf())
    }

    fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        if other.connection.timeout_secs.is_some() {
            self.connection.timeout_secs = other.connection.timeout_secs;
        }
        if other.connection.remembered_device.is_some() {
            self.connection.remembered_device = other.connection.remembered_device;
        }
        if other.flash.update_bootloader {
            self.flash.update_bootloader = true;
        }
        if other.flash.efs_clear {
            self.flash.efs_clear = true;
        }
    }

    /// The configured default read timeout for ordinary command acks, if
    /// set, as a [`Duration`].
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.connection.timeout_secs.map(Duration::from_secs)
    }

    /// Remember a successfully connected USB device so future runs prefer
    /// it over other candidates sharing the ODIN vendor ID.
    ///
    /// Saves to the local `odin.toml` if one already exists, otherwise to
    /// the global config file. Best-effort: callers should log, not fail,
    /// on an `Err` here.
    pub fn remember_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };
        if self.connection.remembered_device.as_ref() == Some(&device) {
            return Ok(());
        }
        self.connection.remembered_device = Some(device);

        let path = if Path::new("odin.toml").exists() {
            PathBuf::from("odin.toml")
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from("odin.toml")
        };

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("remembered USB device {vid:04x}:{pid:04x} in {}", path.display());
        Ok(())
    }
}
