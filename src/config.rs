//! Application configuration
//!
//! Loaded once at startup from a JSON file in the platform config directory,
//! then overridden from the environment. The session reads it, nothing
//! writes it back except an explicit `save()`.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::units::UnitContract;
use crate::visualizer::VisualizerMode;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Environment overrides
pub const ENV_MQTT_URL: &str = "MQTT_URL";
pub const ENV_API_URL: &str = "SPEAKER_API_URL";
pub const ENV_DEMO: &str = "SPEAKER_DEMO";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub playback: PlaybackConfig,
    pub api: ApiConfig,
    pub visualizer: VisualizerConfig,
    pub color: ColorConfig,

    /// Feed synthetic frames and metadata instead of a real broker
    pub demo_mode: bool,
}

/// Pub/sub connection settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `mqtt://host:port` (or `tcp://`). `None` disables the transport.
    pub broker_url: Option<String>,

    pub client_id: String,

    /// Prefix for device and playback topics
    pub topic_prefix: String,

    /// Prefix for the visualizer stream
    pub visualizer_prefix: String,

    /// Connection attempts before the transport disables itself
    pub max_connection_attempts: u32,

    /// Fixed delay between attempts
    pub retry_period_ms: u64,

    /// At most one error log entry per window
    pub error_suppression_window_ms: u64,

    pub keep_alive_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            client_id: "speaker-sync".to_string(),
            topic_prefix: "ruspeaker".to_string(),
            visualizer_prefix: "ruspeaker/visualizer".to_string(),
            max_connection_attempts: 3,
            retry_period_ms: 1000,
            error_suppression_window_ms: 60_000,
            keep_alive_secs: 20,
        }
    }
}

/// Reconciliation and command timing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Unit of `duration`/`position` on the channel
    pub unit_contract: UnitContract,

    /// How long an optimistic play/pause intent masks contradicting reports
    pub command_ttl_ms: u64,

    /// A raw position of 0 may regress the adjusted position below this
    pub regression_threshold_ms: u64,

    /// Interpolation clock period
    pub clock_tick_ms: u64,

    /// REST now-playing poll period (0 disables polling)
    pub now_playing_poll_ms: u64,

    /// Delay before refreshing after next/previous
    pub skip_refresh_delay_ms: u64,

    /// Delay before refreshing after play/pause
    pub toggle_refresh_delay_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            unit_contract: UnitContract::Milliseconds,
            command_ttl_ms: 1500,
            regression_threshold_ms: 250,
            clock_tick_ms: 100,
            now_playing_poll_ms: 5000,
            skip_refresh_delay_ms: 1000,
            toggle_refresh_delay_ms: 500,
        }
    }
}

/// REST playback collaborator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the now-playing / command proxy. `None` disables it.
    pub base_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 5000,
        }
    }
}

/// Render-side smoothing parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub mode: VisualizerMode,

    /// Number of frequency bands (bars)
    pub num_bands: usize,

    /// Samples of per-band history (~1s at 60 fps)
    pub history_len: usize,

    /// Power-law ease applied after normalization
    pub ease_exponent: f32,

    /// Sensitivity multiplier (lower = bars reach max less easily)
    pub sensitivity: f32,

    /// Exponential smoothing factor per pass
    pub smoothing_factor: f32,

    pub smoothing_passes: usize,

    /// Gain used before any history range exists
    pub silent_gain: f32,

    /// Idle baseline as a fraction of the maximum size
    pub idle_scale: f32,

    pub render_fps: u32,

    /// Circle mode: minimum radius as a fraction of the maximum radius
    pub circle_min_radius: f32,

    /// Circle mode: ease exponent
    pub circle_ease_exponent: f32,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            mode: VisualizerMode::Bands,
            num_bands: 6,
            history_len: 60,
            ease_exponent: 0.9,
            sensitivity: 0.6,
            smoothing_factor: 0.2,
            smoothing_passes: 2,
            silent_gain: 100.0,
            idle_scale: 0.55,
            render_fps: 60,
            circle_min_radius: 0.75,
            circle_ease_exponent: 0.4,
        }
    }
}

impl VisualizerConfig {
    pub fn frame_interval_ms(&self) -> u64 {
        (1000 / self.render_fps.max(1)) as u64
    }
}

/// Gradient animation timings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Edge length of the downscaled artwork sample
    pub sample_size: u32,

    /// Normal artwork-to-artwork blend
    pub transition_ms: u64,

    /// Blend to neutral when artwork disappears
    pub clear_transition_ms: u64,

    /// Blend to neutral on a reset (track skip)
    pub reset_blend_ms: u64,

    /// Neutral hold after a reset, new colors are ignored meanwhile
    pub reset_hold_ms: u64,

    /// Blend from neutral into the pending color after the hold
    pub resume_transition_ms: u64,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            sample_size: 32,
            transition_ms: 400,
            clear_transition_ms: 200,
            reset_blend_ms: 350,
            reset_hold_ms: 3000,
            resume_transition_ms: 600,
        }
    }
}

impl AppConfig {
    /// Default location: `<config dir>/speaker-sync/config.json`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("", "", "speaker-sync")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from a file. A missing file yields defaults, a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("[Config] No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        tracing::info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    /// Write pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        fs::write(path, text).map_err(io_err)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    /// Apply `MQTT_URL`, `SPEAKER_API_URL` and `SPEAKER_DEMO`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_MQTT_URL).filter(|v| !v.trim().is_empty()) {
            self.transport.broker_url = Some(url.trim().to_string());
        }

        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.api.base_url = Some(url.trim().trim_end_matches('/').to_string());
        }

        if let Some(flag) = lookup(ENV_DEMO) {
            self.demo_mode = matches!(flag.trim(), "1" | "true" | "yes" | "on");
        }
    }
}
