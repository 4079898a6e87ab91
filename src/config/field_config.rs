//! Field Configuration - device identity, gateway, sync, capture and storage settings
//!
//! Every field has a serde default so a partial TOML file (or none at all)
//! yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use super::defaults;
use crate::types::Priority;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PAKET_FIELD_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "field_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one field device.
///
/// Load with [`FieldConfig::load_with_source`], which searches an explicit
/// path, `$PAKET_FIELD_CONFIG`, then `./field_config.toml`, falling back to
/// built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Device / vehicle identification
    #[serde(default)]
    pub device: DeviceConfig,

    /// Remote package/route service
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Pending-queue drain behavior
    #[serde(default)]
    pub sync: SyncConfig,

    /// Capture-time policy
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Local durable store
    #[serde(default)]
    pub storage: StorageConfig,
}

impl FieldConfig {
    /// Load configuration, returning the file it came from (if any).
    ///
    /// Search order:
    /// 1. `explicit` path (from the command line)
    /// 2. `$PAKET_FIELD_CONFIG`
    /// 3. `./field_config.toml`
    /// 4. Built-in defaults
    ///
    /// A named file (flag or env var) must exist, and any file found must
    /// load; only the absence of every file falls back to defaults.
    pub fn load_with_source(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let mut candidates: Vec<(PathBuf, &'static str)> = Vec::new();
        if let Some(path) = explicit {
            candidates.push((path.to_path_buf(), "--config"));
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                candidates.push((PathBuf::from(path), CONFIG_ENV_VAR));
            }
        }
        candidates.push((PathBuf::from(LOCAL_CONFIG_FILE), "working directory"));

        for (path, origin) in candidates {
            if !path.exists() {
                if origin == "working directory" {
                    continue;
                }
                return Err(ConfigError::Io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
                ));
            }
            let config = Self::load_from_file(&path)?;
            info!(
                path = %path.display(),
                origin,
                device = %config.device.device_id,
                "Loaded field config"
            );
            return Ok((config, Some(path)));
        }

        info!("No field_config.toml found, using built-in defaults");
        Ok((Self::default(), None))
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all settings for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.device.device_id.trim().is_empty() {
            errors.push("device.device_id: must not be empty".to_string());
        }
        if self.device.vehicle_id.trim().is_empty() {
            errors.push("device.vehicle_id: must not be empty".to_string());
        }

        let url = self.gateway.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!(
                "gateway.base_url: must start with http:// or https:// (got '{url}')"
            ));
        }
        if self.gateway.request_timeout_secs == 0 {
            errors.push("gateway.request_timeout_secs: must be > 0".to_string());
        }

        let threshold = self.capture.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            errors.push(format!(
                "capture.confidence_threshold: must be within [0, 1] (got {threshold})"
            ));
        }

        if self.sync.drain_interval_secs == 0 {
            errors.push("sync.drain_interval_secs: must be > 0".to_string());
        }
        if self.sync.max_backoff_secs < self.sync.drain_interval_secs {
            errors.push(format!(
                "sync.max_backoff_secs ({}) must be >= sync.drain_interval_secs ({})",
                self.sync.max_backoff_secs, self.sync.drain_interval_secs
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Sections
// ============================================================================

/// Identity reported to the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Capture device identifier sent with every observation
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Vehicle this driver device serves (route selection)
    #[serde(default = "default_vehicle_id")]
    pub vehicle_id: String,
}

fn default_device_id() -> String {
    "scanner-01".to_string()
}
fn default_vehicle_id() -> String {
    "V001".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            vehicle_id: default_vehicle_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base address of the package/route service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout; an elapsed timeout is a transient failure
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Optional bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    defaults::GATEWAY_BASE_URL.to_string()
}
fn default_request_timeout() -> u64 {
    defaults::GATEWAY_HTTP_TIMEOUT_SECS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Submit immediately on capture and let the scheduler drain the queue.
    /// When off, captures go straight to the pending queue.
    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Upper bound on the backoff delay after transient failures
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Random jitter added to each scheduled drain
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,
}

fn default_auto_sync() -> bool {
    true
}
fn default_drain_interval() -> u64 {
    defaults::DRAIN_INTERVAL_SECS
}
fn default_max_backoff() -> u64 {
    defaults::DRAIN_MAX_BACKOFF_SECS
}
fn default_jitter() -> u64 {
    defaults::DRAIN_JITTER_SECS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: default_auto_sync(),
            drain_interval_secs: default_drain_interval(),
            max_backoff_secs: default_max_backoff(),
            jitter_secs: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Captures below this recognition confidence are flagged for review
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default)]
    pub default_priority: Priority,
}

fn default_confidence_threshold() -> f64 {
    defaults::CONFIDENCE_THRESHOLD
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            default_priority: Priority::Standard,
        }
    }
}

/// Which durable store implementation to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sled,
    File,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Sled => write!(f, "sled"),
            StorageBackend::File => write!(f, "file"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub backend: StorageBackend,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: StorageBackend::Sled,
        }
    }
}
