//! Loopback configuration schema and loader
//!
//! Configuration is stored as YAML.
//! Default location: `~/.config/loopdev/loopdev.yaml`
//!
//! ```yaml
//! slots:
//!   - capture: "hw:Loopback,0,0"
//!     playback: "hw:Loopback,1,0"
//! params:
//!   rate: 44100
//! worker:
//!   realtime_priority: false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::job::JobParams;
use crate::pool::{default_slots, SlotSpec};

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "loopdev.yaml";

/// Root loopback configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Loopback slot table (default: 8 substreams of card 0)
    pub slots: Vec<SlotSpec>,
    /// Audio parameters for every job
    pub params: JobParams,
    /// Worker thread settings
    pub worker: WorkerConfig,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            params: JobParams::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Worker thread settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Try to run workers with SCHED_RR at maximum priority
    pub realtime_priority: bool,
    /// Prefix for worker thread names ("{prefix}-{group}")
    pub thread_name_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            realtime_priority: true,
            thread_name_prefix: "loopdev-worker".to_string(),
        }
    }
}

/// Get the default config file path
///
/// Returns: `{config_dir}/loopdev/loopdev.yaml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loopdev")
        .join(CONFIG_FILE_NAME)
}

/// Load configuration from a YAML file
///
/// A missing file yields the defaults. An unreadable or invalid file logs a
/// warning and also yields the defaults, as does an empty slot table.
pub fn load_config(path: &Path) -> LoopbackConfig {
    log::info!("load_config: Loading from {:?}", path);

    if !path.exists() {
        log::info!("load_config: Config file doesn't exist, using defaults");
        return LoopbackConfig::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("load_config: Failed to read config file: {}, using defaults", e);
            return LoopbackConfig::default();
        }
    };

    let mut config = match serde_yaml::from_str::<LoopbackConfig>(&contents) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("load_config: Failed to parse config: {}, using defaults", e);
            return LoopbackConfig::default();
        }
    };

    if config.slots.is_empty() {
        log::warn!("load_config: Config has no loopback slots, using default table");
        config.slots = default_slots();
    }
    warn_duplicate_endpoints(&config.slots);

    log::info!(
        "load_config: Loaded {} loopback slots from {:?}",
        config.slots.len(),
        path
    );
    config
}

/// Save configuration to a YAML file
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &LoopbackConfig, path: &Path) -> Result<()> {
    log::info!("save_config: Saving to {:?}", path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

fn warn_duplicate_endpoints(slots: &[SlotSpec]) {
    let mut seen = std::collections::HashSet::new();
    for slot in slots {
        for endpoint in [&slot.capture, &slot.playback] {
            if !seen.insert(endpoint.as_str()) {
                log::warn!(
                    "load_config: Loopback endpoint '{}' appears in more than one slot",
                    endpoint
                );
            }
        }
    }
}
