//! Unit handling for numeric playback fields on the channel.
//!
//! Producers have historically disagreed on whether `duration`/`position` are
//! seconds or milliseconds. The session picks ONE contract for the whole
//! channel from configuration instead of guessing per message.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Values above this are epoch milliseconds, below are epoch seconds.
/// Real clocks put seconds near 1.7e9 and milliseconds near 1.7e12.
pub const EPOCH_MS_THRESHOLD: f64 = 1e11;

/// Legacy heuristic: durations/positions above this are already milliseconds
pub const LEGACY_MS_THRESHOLD: f64 = 1000.0;

/// Unit contract for `duration` and `position` on the whole channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitContract {
    /// Durations and positions are integer milliseconds
    #[default]
    Milliseconds,

    /// Durations and positions are (possibly fractional) seconds
    Seconds,

    /// Older producers: values > 1000 are milliseconds, otherwise seconds
    Legacy,
}

impl UnitContract {
    /// Convert a raw duration/position value to milliseconds.
    /// Negative and non-finite inputs collapse to 0.
    pub fn to_millis(self, value: f64) -> u64 {
        if !value.is_finite() || value <= 0.0 {
            return 0;
        }

        let ms = match self {
            UnitContract::Milliseconds => value,
            UnitContract::Seconds => value * 1000.0,
            UnitContract::Legacy => {
                if value > LEGACY_MS_THRESHOLD {
                    value
                } else {
                    value * 1000.0
                }
            }
        };

        ms.round() as u64
    }
}

/// Normalize a server timestamp to epoch milliseconds
pub fn timestamp_to_millis(value: f64) -> Option<u64> {
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    let ms = if value > EPOCH_MS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };

    Some(ms.round() as u64)
}

/// Wall clock in epoch milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Formats milliseconds as M:SS (or H:MM:SS past an hour)
pub fn format_position(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}
