//! Engine configuration.
//!
//! Replaces the original implementation's global constants (the TCP port,
//! the settings directory) with a single `EngineConfig` threaded from the
//! entry point, per the redesign called for in §9 of the specification.

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{EngineError, Result};

/// Bootstrap configuration as read from an optional TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub control_port: Option<u16>,
    pub cache_buffer_count: Option<usize>,
    pub give_up_after_n_empty_plays: Option<u32>,
    pub replacement_min_played_ms: Option<u64>,
    pub replacement_min_cast_played_s: Option<u64>,
    pub local_source_grace_ms: Option<u64>,
    pub underrun_wait_cap_ms: Option<u64>,
    pub pre_amp_db: Option<f64>,
    pub output_device: Option<String>,
}

/// Fully resolved runtime configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Loopback TCP port for the IPC control surface (§6). Default 17400,
    /// matching the original implementation's wire-level constant.
    pub control_port: u16,
    /// Number of decoded buffers routed straight to the DSP chain during
    /// initial prefill, before the synchronizer queue engages (§4.2).
    pub cache_buffer_count: usize,
    /// Consecutive zero-played tracks before the Coordinator stops
    /// auto-requesting playlists (§4.1 give-up rule).
    pub give_up_after_n_empty_plays: u32,
    /// Threshold below which a finished file track is considered a failed
    /// play and becomes eligible for a single replacement request.
    pub replacement_min_played_ms: u64,
    /// Same threshold, but for live casts (measured in seconds).
    pub replacement_min_cast_played_s: u64,
    /// How long the local-file source is preferred on startup before
    /// network sources are woken (§4.1 scheduling policy).
    pub local_source_grace: std::time::Duration,
    /// Cap on how long a stalled underrun wait may run before becoming
    /// fatal (§4.3, §4.2 output underrun policy).
    pub underrun_wait_cap: std::time::Duration,
    /// Pre-amplification applied alongside ReplayGain correction (§4.5).
    pub pre_amp_db: f64,
    /// Optional explicit output device name; `None` selects the host default.
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_port: 17400,
            cache_buffer_count: 3,
            give_up_after_n_empty_plays: 4,
            replacement_min_played_ms: 1000,
            replacement_min_cast_played_s: 180,
            local_source_grace: std::time::Duration::from_millis(1500),
            underrun_wait_cap: std::time::Duration::from_secs(5),
            pre_amp_db: 0.0,
            output_device: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional TOML file, falling back to
    /// defaults for anything unset. Unlike the teacher's `Config::load`,
    /// there is no database-backed settings layer here: persisted settings
    /// are explicitly out of scope for the playback engine.
    pub async fn load(path: Option<&PathBuf>) -> Result<Self> {
        let toml_config = match path {
            Some(p) => {
                let text = tokio::fs::read_to_string(p).await.map_err(|e| {
                    EngineError::ConfigInvalid(format!("reading {}: {e}", p.display()))
                })?;
                toml::from_str::<TomlConfig>(&text)
                    .map_err(|e| EngineError::ConfigInvalid(format!("parsing {}: {e}", p.display())))?
            }
            None => TomlConfig::default(),
        };

        let defaults = EngineConfig::default();
        Ok(EngineConfig {
            control_port: toml_config.control_port.unwrap_or(defaults.control_port),
            cache_buffer_count: toml_config
                .cache_buffer_count
                .unwrap_or(defaults.cache_buffer_count),
            give_up_after_n_empty_plays: toml_config
                .give_up_after_n_empty_plays
                .unwrap_or(defaults.give_up_after_n_empty_plays),
            replacement_min_played_ms: toml_config
                .replacement_min_played_ms
                .unwrap_or(defaults.replacement_min_played_ms),
            replacement_min_cast_played_s: toml_config
                .replacement_min_cast_played_s
                .unwrap_or(defaults.replacement_min_cast_played_s),
            local_source_grace: toml_config
                .local_source_grace_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or(defaults.local_source_grace),
            underrun_wait_cap: toml_config
                .underrun_wait_cap_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or(defaults.underrun_wait_cap),
            pre_amp_db: toml_config.pre_amp_db.unwrap_or(defaults.pre_amp_db),
            output_device: toml_config.output_device.or(defaults.output_device),
        })
    }
}
