//! Configuration for the multiboot sender.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MULTIBOOT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gba-multiboot/config.toml
//!   3. ~/.config/gba-multiboot/config.toml
//!
//! Only operator-facing settings live here. Link timing and protocol
//! constants are fixed in `wire`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultibootConfig {
    pub device: DeviceConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// spidev node wired to the link port.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Give up waiting for the peer to power on after N seconds. 0 = never.
    pub handshake_timeout_secs: u64,
    /// Give up waiting for the completion acknowledgment after N seconds. 0 = never.
    pub ack_timeout_secs: u64,
    /// Fail the session if the peer's final CRC differs from ours.
    pub verify_crc: bool,
    /// Report progress every N payload bytes.
    pub progress_interval: u32,
    /// Keep the device open for N milliseconds after the final exchange.
    pub settle_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/spidev0.0"),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 0,
            ack_timeout_secs: 0,
            verify_crc: false,
            progress_interval: 4096,
            settle_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        secs_or_unbounded(self.handshake_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        secs_or_unbounded(self.ack_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

fn secs_or_unbounded(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("gba-multiboot")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MultibootConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            MultibootConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MULTIBOOT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        Self::write_default_to(Self::file_path())
    }

    fn write_default_to(path: PathBuf) -> Result<PathBuf, ConfigError> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MultibootConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MULTIBOOT_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MULTIBOOT_DEVICE__PATH") {
            self.device.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MULTIBOOT_SESSION__HANDSHAKE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.session.handshake_timeout_secs = secs;
            }
        }
        if let Some(v) = lookup("MULTIBOOT_SESSION__ACK_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.session.ack_timeout_secs = secs;
            }
        }
        if let Some(v) = lookup("MULTIBOOT_SESSION__VERIFY_CRC") {
            self.session.verify_crc = v == "true" || v == "1";
        }
    }
}
