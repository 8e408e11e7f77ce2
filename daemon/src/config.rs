//! Configuration management for f710d
//!
//! Handles loading and validation of the JSON configuration file.
//! Configuration is stored at `~/.config/f710d/config.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "f710d";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

/// Logitech vendor ID
pub const LOGITECH_VENDOR_ID: u16 = 0x046D;

/// F710 wireless receiver product ID (XInput mode)
pub const F710_WIRELESS_PID: u16 = 0xC21F;

/// F710 product ID as seen in the fallback "wired" pairing
pub const F710_WIRED_PID: u16 = 0xC219;

/// Default address root the fields are registered under
const DEFAULT_ADDRESS_ROOT: &str = "f710";

/// Default interrupt read timeout (milliseconds)
const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

/// Retry delay until the controller is seen for the first time (milliseconds)
const DEFAULT_INITIAL_RETRY_MS: u64 = 5000;

/// Retry delay after a connection was lost (milliseconds)
const DEFAULT_RECONNECT_RETRY_MS: u64 = 200;

// ============================================================================
// Device IDs
// ============================================================================

/// Vendor/product pair searched for on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Label used in log messages
    #[serde(default)]
    pub label: String,
}

impl DeviceId {
    pub fn new(vendor_id: u16, product_id: u16, label: &str) -> Self {
        Self {
            vendor_id,
            product_id,
            label: label.to_string(),
        }
    }

    /// Wireless receiver pairing, searched first
    pub fn wireless() -> Self {
        Self::new(LOGITECH_VENDOR_ID, F710_WIRELESS_PID, "wireless")
    }

    /// Wired fallback pairing
    pub fn wired() -> Self {
        Self::new(LOGITECH_VENDOR_ID, F710_WIRED_PID, "wired")
    }

    /// True for the fallback pairing, which needs XInput mode to report
    pub fn is_wired(&self) -> bool {
        self.vendor_id == LOGITECH_VENDOR_ID && self.product_id == F710_WIRED_PID
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)?;
        if !self.label.is_empty() {
            write!(f, " ({})", self.label)?;
        }
        Ok(())
    }
}

fn default_devices() -> Vec<DeviceId> {
    vec![DeviceId::wireless(), DeviceId::wired()]
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root path every field is exposed under
    #[serde(default = "default_address_root")]
    pub address_root: String,

    /// Vendor/product pairs, tried in order on every attempt
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceId>,

    /// Interface number to claim
    #[serde(default)]
    pub interface: u8,

    /// Interrupt read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Retry delay before the controller has been seen once
    #[serde(default = "default_initial_retry")]
    pub initial_retry_ms: u64,

    /// Retry delay after a disconnect
    #[serde(default = "default_reconnect_retry")]
    pub reconnect_retry_ms: u64,

    /// Publish every raw report on `full-data`
    #[serde(default = "default_true")]
    pub publish_full_data: bool,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_address_root() -> String {
    DEFAULT_ADDRESS_ROOT.to_string()
}
fn default_read_timeout() -> u64 { DEFAULT_READ_TIMEOUT_MS }
fn default_initial_retry() -> u64 { DEFAULT_INITIAL_RETRY_MS }
fn default_reconnect_retry() -> u64 { DEFAULT_RECONNECT_RETRY_MS }
fn default_true() -> bool { true }

impl Default for Config {
    fn default() -> Self {
        Self {
            address_root: default_address_root(),
            devices: default_devices(),
            interface: 0,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            initial_retry_ms: DEFAULT_INITIAL_RETRY_MS,
            reconnect_retry_ms: DEFAULT_RECONNECT_RETRY_MS,
            publish_full_data: true,
            config_path: None,
        }
    }
}

impl Config {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        config.validate()?;
        config.config_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            address_root = %config.address_root,
            devices = config.devices.len(),
            read_timeout_ms = config.read_timeout_ms,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate and clamp values
    ///
    /// Zero delays are raised to 1 ms and an empty device list falls back to
    /// the F710 pairings. An address root that is empty after trimming
    /// slashes is rejected.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        self.read_timeout_ms = self.read_timeout_ms.max(1);
        self.initial_retry_ms = self.initial_retry_ms.max(1);
        self.reconnect_retry_ms = self.reconnect_retry_ms.max(1);

        if self.devices.is_empty() {
            tracing::warn!("No devices configured, using F710 defaults");
            self.devices = default_devices();
        }

        let root = self.address_root.trim_matches('/');
        if root.is_empty() {
            return Err(ConfigError::ValidationError(
                "address_root must not be empty".to_string(),
            ));
        }
        self.address_root = root.to_string();

        Ok(())
    }

    /// Interrupt read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Retry delay before the first successful connection
    pub fn initial_retry(&self) -> Duration {
        Duration::from_millis(self.initial_retry_ms)
    }

    /// Retry delay after a lost connection
    pub fn reconnect_retry(&self) -> Duration {
        Duration::from_millis(self.reconnect_retry_ms)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
