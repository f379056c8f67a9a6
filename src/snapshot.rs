//! Data model shared by the reconciler, the clock and readers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PayloadError;

/// Authoritative playback state reported by the device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    #[default]
    Idle,
}

impl PlaybackState {
    pub fn is_playing(self) -> bool {
        self == PlaybackState::Playing
    }

    /// Does this report satisfy a play/pause intent?
    /// Paused intent is met by any non-playing state.
    pub fn satisfies(self, desired_playing: bool) -> bool {
        if desired_playing {
            self == PlaybackState::Playing
        } else {
            self != PlaybackState::Playing
        }
    }

    pub fn from_playing(playing: bool) -> Self {
        if playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Idle => "idle",
        }
    }
}

impl FromStr for PlaybackState {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "playing" | "play" => Ok(PlaybackState::Playing),
            "paused" | "pause" => Ok(PlaybackState::Paused),
            "stopped" | "stop" => Ok(PlaybackState::Stopped),
            "idle" | "" => Ok(PlaybackState::Idle),
            other => Err(PayloadError::UnknownState(other.to_string())),
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimistic command bookkeeping, owned by the reconciler
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CommandState {
    #[default]
    Idle,

    /// A local intent masks contradicting reports until `expires_at_ms`
    Pending {
        desired_playing: bool,
        issued_at_ms: u64,
        expires_at_ms: u64,
    },

    /// The device confirmed the last intent
    Confirmed {
        desired_playing: bool,
        confirmed_at_ms: u64,
    },
}

impl CommandState {
    pub fn is_pending(&self) -> bool {
        matches!(self, CommandState::Pending { .. })
    }
}

/// The canonical reconciled playback state.
///
/// Only the reconciler mutates this; everyone else receives clones.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub track_id: String,
    pub track: String,
    pub artist: String,
    pub album: String,

    pub duration_ms: u64,

    /// Last position reported by the device, clamped to the duration
    pub raw_position_ms: u64,

    /// Epoch ms at which `raw_position_ms` was true, if known
    pub server_timestamp_ms: Option<u64>,

    /// Visible state (intent while a command is pending)
    pub state: PlaybackState,

    /// Last state the device actually reported
    pub reported_state: PlaybackState,

    pub volume: u8,
    pub artwork: Option<String>,

    /// Local extrapolation suspended (command in flight or track change)
    pub progress_frozen: bool,

    /// Local epoch ms of the last applied change
    pub local_timestamp_ms: u64,

    /// Latency-corrected position, always within [0, duration]
    pub adjusted_position_ms: u64,

    /// Bumped on every real change
    pub revision: u64,
}

impl PlaybackSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    /// Should a now-playing panel be shown at all?
    pub fn has_track(&self) -> bool {
        !self.track.is_empty() && self.state != PlaybackState::Idle
    }

    /// Progress as a fraction (0.0 when the duration is unknown)
    pub fn progress(&self) -> f32 {
        if self.duration_ms == 0 {
            return 0.0;
        }
        (self.adjusted_position_ms as f64 / self.duration_ms as f64).clamp(0.0, 1.0) as f32
    }
}

/// Device-level fields of the channel (not playback)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub status: String,
    pub volume: u8,
    pub source: String,
    pub available_sources: Vec<String>,
    pub health: Option<serde_json::Value>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            status: "offline".to_string(),
            volume: 50,
            source: "spotify".to_string(),
            available_sources: vec![
                "spotify".to_string(),
                "line-in".to_string(),
                "aux".to_string(),
                "bluetooth".to_string(),
            ],
            health: None,
        }
    }
}

impl DeviceState {
    pub fn is_online(&self) -> bool {
        self.status == "online"
    }

    /// A numeric health metric by key, e.g. `cpu_temp`
    pub fn health_metric(&self, key: &str) -> Option<f64> {
        self.health.as_ref()?.get(key)?.as_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing() {
        assert_eq!("playing".parse::<PlaybackState>().unwrap(), PlaybackState::Playing);
        assert_eq!(" Paused\n".parse::<PlaybackState>().unwrap(), PlaybackState::Paused);
        assert_eq!("".parse::<PlaybackState>().unwrap(), PlaybackState::Idle);
        assert!("buffering".parse::<PlaybackState>().is_err());
    }

    #[test]
    fn test_paused_intent_matches_any_non_playing_state() {
        assert!(PlaybackState::Paused.satisfies(false));
        assert!(PlaybackState::Stopped.satisfies(false));
        assert!(PlaybackState::Idle.satisfies(false));
        assert!(!PlaybackState::Playing.satisfies(false));
        assert!(PlaybackState::Playing.satisfies(true));
        assert!(!PlaybackState::Idle.satisfies(true));
    }

    #[test]
    fn test_progress_fraction() {
        let snapshot = PlaybackSnapshot {
            duration_ms: 200_000,
            adjusted_position_ms: 50_000,
            ..Default::default()
        };
        assert!((snapshot.progress() - 0.25).abs() < 1e-6);
        assert_eq!(PlaybackSnapshot::default().progress(), 0.0);
    }

    #[test]
    fn test_health_metric_lookup() {
        let device = DeviceState {
            health: Some(serde_json::json!({"cpu_temp": 51.5, "label": "x"})),
            ..Default::default()
        };
        assert_eq!(device.health_metric("cpu_temp"), Some(51.5));
        assert_eq!(device.health_metric("label"), None);
        assert_eq!(device.health_metric("missing"), None);
    }
}
