//! Field Configuration Module
//!
//! Device settings loaded from TOML, shared through a [`ConfigHandle`] so
//! they can be changed at runtime without restarting the engines.
//!
//! ## Loading Order
//!
//! 1. `--config` command-line path
//! 2. `PAKET_FIELD_CONFIG` environment variable
//! 3. `field_config.toml` in the current working directory
//! 4. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! let (field_config, _source) = FieldConfig::load_with_source(None)?;
//! let config = ConfigHandle::new(field_config);
//!
//! // Readers take a snapshot per operation:
//! let threshold = config.current().capture.confidence_threshold;
//!
//! // Writers swap atomically:
//! config.update(|c| c.sync.auto_sync = false)?;
//! ```

mod field_config;
pub mod defaults;
pub mod watcher;

pub use field_config::*;

use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::Arc;

/// A single setting that differs between two configurations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    /// Dotted key, e.g. `sync.auto_sync`
    pub key: &'static str,
    pub old: String,
    pub new: String,
}

impl std::fmt::Display for ConfigChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.key, self.old, self.new)
    }
}

/// Shared, hot-swappable configuration.
///
/// Cloning is cheap; all clones observe the same swaps.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<FieldConfig>>,
}

impl ConfigHandle {
    pub fn new(config: FieldConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    /// Snapshot of the configuration in force right now.
    pub fn current(&self) -> Arc<FieldConfig> {
        self.inner.load_full()
    }

    /// Validate and install a new configuration, returning what changed.
    ///
    /// An invalid configuration leaves the current one in place.
    pub fn replace(&self, config: FieldConfig) -> Result<Vec<ConfigChange>, ConfigError> {
        config.validate()?;
        let next = Arc::new(config);
        let previous = self.inner.swap(Arc::clone(&next));
        let changes = diff(&previous, &next);
        for change in &changes {
            tracing::info!(%change, "Config updated");
        }
        Ok(changes)
    }

    /// Apply an edit to a copy of the current configuration and install it.
    pub fn update<F>(&self, edit: F) -> Result<Vec<ConfigChange>, ConfigError>
    where
        F: FnOnce(&mut FieldConfig),
    {
        let mut next = FieldConfig::clone(&self.current());
        edit(&mut next);
        self.replace(next)
    }

    /// Re-read a config file and install it.
    pub fn reload_from(&self, path: &Path) -> Result<Vec<ConfigChange>, ConfigError> {
        let config = FieldConfig::load_from_file(path)?;
        self.replace(config)
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(FieldConfig::default())
    }
}

/// Settings that differ between `old` and `new`. Secrets are masked.
pub fn diff(old: &FieldConfig, new: &FieldConfig) -> Vec<ConfigChange> {
    let mut changes = Vec::new();
    let mut push = |key: &'static str, a: String, b: String| {
        if a != b {
            changes.push(ConfigChange { key, old: a, new: b });
        }
    };

    push("device.device_id", old.device.device_id.clone(), new.device.device_id.clone());
    push("device.vehicle_id", old.device.vehicle_id.clone(), new.device.vehicle_id.clone());
    push("gateway.base_url", old.gateway.base_url.clone(), new.gateway.base_url.clone());
    push(
        "gateway.request_timeout_secs",
        old.gateway.request_timeout_secs.to_string(),
        new.gateway.request_timeout_secs.to_string(),
    );
    push(
        "gateway.api_key",
        mask(old.gateway.api_key.as_deref()),
        mask(new.gateway.api_key.as_deref()),
    );
    push("sync.auto_sync", old.sync.auto_sync.to_string(), new.sync.auto_sync.to_string());
    push(
        "sync.drain_interval_secs",
        old.sync.drain_interval_secs.to_string(),
        new.sync.drain_interval_secs.to_string(),
    );
    push(
        "sync.max_backoff_secs",
        old.sync.max_backoff_secs.to_string(),
        new.sync.max_backoff_secs.to_string(),
    );
    push("sync.jitter_secs", old.sync.jitter_secs.to_string(), new.sync.jitter_secs.to_string());
    push(
        "capture.confidence_threshold",
        old.capture.confidence_threshold.to_string(),
        new.capture.confidence_threshold.to_string(),
    );
    push(
        "capture.default_priority",
        old.capture.default_priority.to_string(),
        new.capture.default_priority.to_string(),
    );
    // Storage settings only take effect on restart, but still report them.
    push(
        "storage.data_dir",
        old.storage.data_dir.display().to_string(),
        new.storage.data_dir.display().to_string(),
    );
    push("storage.backend", old.storage.backend.to_string(), new.storage.backend.to_string());

    changes
}

fn mask(secret: Option<&str>) -> String {
    match secret {
        Some(s) if !s.is_empty() => "****".to_string(),
        _ => "(none)".to_string(),
    }
}
