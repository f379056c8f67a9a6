//! Source mode registry
//!
//! Maps the device's `source/current` value to how a control surface should
//! treat it. Only some sources accept playback commands from here.

use std::borrow::Cow;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceMode {
    pub id: Cow<'static, str>,
    pub display_name: Cow<'static, str>,

    /// Play/pause and skip make sense for this source
    pub show_controls: bool,
}

impl SourceMode {
    pub const fn builtin(id: &'static str, display_name: &'static str, show_controls: bool) -> Self {
        Self {
            id: Cow::Borrowed(id),
            display_name: Cow::Borrowed(display_name),
            show_controls,
        }
    }
}

pub static SPOTIFY: SourceMode = SourceMode::builtin("spotify", "Spotify", true);
/// Controlled from the paired phone, not from here
pub static BLUETOOTH: SourceMode = SourceMode::builtin("bluetooth", "Bluetooth", false);
pub static NONE: SourceMode = SourceMode::builtin("none", "None", false);
pub static UNKNOWN: SourceMode = SourceMode::builtin("unknown", "Unknown", false);

#[derive(Clone, Debug)]
pub struct SourceModes {
    modes: Vec<SourceMode>,
}

impl Default for SourceModes {
    fn default() -> Self {
        Self {
            modes: vec![SPOTIFY.clone(), BLUETOOTH.clone(), NONE.clone()],
        }
    }
}

impl SourceModes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a source. Empty or missing means `none`, anything unregistered is `unknown`.
    pub fn mode_for(&self, source: Option<&str>) -> &SourceMode {
        let source = match source.map(str::trim) {
            Some(s) if !s.is_empty() => s.to_ascii_lowercase(),
            _ => return &NONE,
        };

        self.modes
            .iter()
            .find(|m| m.id == source)
            .unwrap_or(&UNKNOWN)
    }

    /// Add or replace a mode (ids are case-insensitive)
    pub fn register(&mut self, mut mode: SourceMode) {
        mode.id = Cow::Owned(mode.id.to_ascii_lowercase());
        match self.modes.iter_mut().find(|m| m.id == mode.id) {
            Some(existing) => *existing = mode,
            None => self.modes.push(mode),
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.modes.iter().map(|m| m.id.as_ref()).collect()
    }
}
