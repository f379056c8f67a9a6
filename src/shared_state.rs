use std::time::Instant;

use crate::color::{lighten_dark, GradientStops, Rgb, DEFAULT_GRADIENT};
use crate::snapshot::{CommandState, DeviceState, PlaybackSnapshot};
use crate::source_modes::{SourceMode, NONE};
use crate::transport::ConnectionStatus;
use crate::units::format_position;
use crate::visualizer::{VisualOutput, VisualizerMode};

/// Highlight used while no artwork color is known
pub const DEFAULT_HIGHLIGHT: Rgb = Rgb::from_rgb(29, 185, 84);

/// Main shared state container, wrapped in Arc<Mutex<>> for thread safety
///
/// The session thread is the only writer; it publishes copies here.
/// Readers (daemon status log, CLI, a UI) lock briefly and clone what they need.
#[derive(Clone, Debug)]
pub struct SharedState {
    pub playback: PlaybackSnapshot,
    pub command: CommandState,

    /// Interpolated position from the local clock
    pub position_ms: u64,

    pub device: DeviceState,
    pub source_mode: SourceMode,
    pub connection: ConnectionStatus,

    pub visualization: VisualizationData,
    pub theme: ThemeColors,
    pub performance: PerformanceStats,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            playback: PlaybackSnapshot::default(),
            command: CommandState::Idle,
            position_ms: 0,
            device: DeviceState::default(),
            source_mode: NONE.clone(),
            connection: ConnectionStatus::Disconnected,
            visualization: VisualizationData::default(),
            theme: ThemeColors::default(),
            performance: PerformanceStats::default(),
        }
    }

    /// Should play/pause and skip be offered right now?
    pub fn controls_enabled(&self) -> bool {
        self.source_mode.show_controls && self.playback.has_track()
    }

    /// One line for logs: state, track and position
    pub fn status_line(&self) -> String {
        let track = if self.playback.track.is_empty() {
            "-".to_string()
        } else if self.playback.artist.is_empty() {
            self.playback.track.clone()
        } else {
            format!("{} - {}", self.playback.artist, self.playback.track)
        };

        format!(
            "{:?} | {} | {} | {} / {} | vol {} | {}",
            self.connection,
            self.playback.state,
            track,
            format_position(self.position_ms),
            format_position(self.playback.duration_ms),
            self.playback.volume,
            self.source_mode.display_name,
        )
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest render output of the signal processor
#[derive(Clone, Debug)]
pub struct VisualizationData {
    pub mode: VisualizerMode,
    pub output: VisualOutput,

    /// Last value of the visualizer `status` topic
    pub status: Option<String>,

    /// When this data was last updated
    pub timestamp: Instant,
}

impl Default for VisualizationData {
    fn default() -> Self {
        Self {
            mode: VisualizerMode::Bands,
            output: VisualOutput::Idle { scale: 0.0 },
            status: None,
            timestamp: Instant::now(),
        }
    }
}

/// Gradient and derived colors
#[derive(Clone, Debug, PartialEq)]
pub struct ThemeColors {
    pub gradient: GradientStops,

    /// Dominant artwork color, once extracted
    pub artwork_color: Option<Rgb>,

    /// Readable color for progress bars and toggles
    pub highlight: Rgb,
}

impl ThemeColors {
    pub fn set_artwork_color(&mut self, color: Option<Rgb>) {
        self.artwork_color = color;
        self.highlight = color.map(lighten_dark).unwrap_or(DEFAULT_HIGHLIGHT);
    }
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self {
            gradient: DEFAULT_GRADIENT,
            artwork_color: None,
            highlight: DEFAULT_HIGHLIGHT,
        }
    }
}

/// Counters, updated by the session thread
#[derive(Clone, Debug, Default)]
pub struct PerformanceStats {
    /// Transport events handled
    pub events: u64,

    /// Visualizer frames received
    pub frames: u64,

    /// Render ticks evaluated
    pub render_ticks: u64,

    /// Snapshot revisions published
    pub revisions: u64,
}
