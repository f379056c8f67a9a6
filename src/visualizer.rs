use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::VisualizerConfig;

/// Circle mode: changes below this get the quick smoothing factor
const CIRCLE_SMALL_CHANGE: f32 = 0.08;
/// Circle mode: changes above this get the slow smoothing factor
const CIRCLE_LARGE_CHANGE: f32 = 0.15;
const CIRCLE_QUICK_FACTOR: f32 = 0.3;
const CIRCLE_SLOW_FACTOR: f32 = 0.05;
/// Idle circle relative to the minimum radius
const CIRCLE_IDLE_RATIO: f32 = 0.8;

/// One spectral frame as published on the visualizer topic
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FftFrame {
    pub ts: f64,
    pub rate: u32,
    pub bins: u32,
    pub rms: f32,
    pub bars: Vec<f32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizerMode {
    /// Multi-band bars
    #[default]
    Bands,
    /// A single pulsing circle driven by the overall peak
    Circle,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandLevel {
    /// Smoothed level, 0.0 ..= sensitivity
    pub level: f32,
    /// Size relative to the maximum, idle baseline ..= 1.0
    pub scale: f32,
}

/// What to draw this render frame
#[derive(Clone, Debug, PartialEq)]
pub enum VisualOutput {
    /// No frame received yet: draw the minimal idle indicator at `scale`
    Idle { scale: f32 },
    Bands(Vec<BandLevel>),
    Circle { level: f32, radius_scale: f32 },
}

/// Rolling window of recent peaks for one band
#[derive(Clone, Debug)]
pub struct BandHistory {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl BandHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// (min, max) of the window, (0, 0) when empty
    pub fn range(&self) -> (f32, f32) {
        if self.samples.is_empty() {
            return (0.0, 0.0);
        }
        self.samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Adaptive normalization against the band's recent dynamic range.
/// Falls back to `min(value * gain, 1)` while the range is flat.
pub fn normalize(value: f32, history: &BandHistory, silent_gain: f32) -> f32 {
    let (recent_min, recent_max) = history.range();
    let range = recent_max - recent_min;

    let normalized = if range > 0.0 {
        (value - recent_min) / range
    } else if value > 0.0 {
        (value * silent_gain).min(1.0)
    } else {
        0.0
    };

    normalized.clamp(0.0, 1.0)
}

pub fn ease_in_out_cubic(t: f32) -> f32 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// Circle-mode smoothing factor: quick for small changes, slow for large jumps
pub fn adaptive_factor(change: f32) -> f32 {
    if change < CIRCLE_SMALL_CHANGE {
        CIRCLE_QUICK_FACTOR
    } else if change > CIRCLE_LARGE_CHANGE {
        CIRCLE_SLOW_FACTOR
    } else {
        let t = (change - CIRCLE_SMALL_CHANGE) / (CIRCLE_LARGE_CHANGE - CIRCLE_SMALL_CHANGE);
        CIRCLE_QUICK_FACTOR - (CIRCLE_QUICK_FACTOR - CIRCLE_SLOW_FACTOR) * t
    }
}

/// Peak of each of `num_bands` equal partitions; the last band takes the remainder
pub fn band_peaks(bars: &[f32], num_bands: usize) -> Vec<f32> {
    let num_bands = num_bands.max(1);
    let per_band = bars.len() / num_bands;

    (0..num_bands)
        .map(|band| {
            let start = (band * per_band).min(bars.len());
            let end = if band == num_bands - 1 {
                bars.len()
            } else {
                ((band + 1) * per_band).min(bars.len())
            };

            bars[start..end]
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .fold(0.0, f32::max)
        })
        .collect()
}

fn overall_peak(bars: &[f32]) -> f32 {
    bars.iter().copied().filter(|v| v.is_finite()).fold(0.0, f32::max)
}

/// Turns spectral frames into smoothed visual parameters.
///
/// Frames arrive at the producer's cadence; `render` runs once per render
/// frame and reuses the latest frame until a new one lands.
pub struct SignalProcessor {
    config: VisualizerConfig,

    latest: Option<FftFrame>,

    // Bands mode state
    histories: Vec<BandHistory>,
    smoothed: Vec<Vec<f32>>, // [pass][band]

    // Circle mode state
    circle_history: BandHistory,
    circle_smoothed: Vec<f32>, // [pass]
}

impl SignalProcessor {
    pub fn new(config: VisualizerConfig) -> Self {
        let bands = config.num_bands.max(1);
        let passes = config.smoothing_passes.max(1);

        Self {
            histories: (0..bands).map(|_| BandHistory::new(config.history_len)).collect(),
            smoothed: vec![vec![0.0; bands]; passes],
            circle_history: BandHistory::new(config.history_len),
            circle_smoothed: vec![0.0; passes],
            latest: None,
            config,
        }
    }

    pub fn mode(&self) -> VisualizerMode {
        self.config.mode
    }

    pub fn set_mode(&mut self, mode: VisualizerMode) {
        if mode != self.config.mode {
            self.config.mode = mode;
            self.reset();
        }
    }

    /// Store the most recent frame (data arrival)
    pub fn push_frame(&mut self, frame: FftFrame) {
        if frame.bars.is_empty() {
            return;
        }
        self.latest = Some(frame);
    }

    pub fn has_frame(&self) -> bool {
        self.latest.is_some()
    }

    /// Compute this render frame's output
    pub fn render(&mut self) -> VisualOutput {
        let bars = match self.latest.as_ref() {
            Some(frame) => frame.bars.clone(),
            None => return self.idle(),
        };

        match self.config.mode {
            VisualizerMode::Bands => VisualOutput::Bands(self.render_bands(&bars)),
            VisualizerMode::Circle => self.render_circle(&bars),
        }
    }

    /// Drop history, smoothing state and the last frame (track skip)
    pub fn reset(&mut self) {
        for history in &mut self.histories {
            history.clear();
        }
        for pass in &mut self.smoothed {
            pass.iter_mut().for_each(|v| *v = 0.0);
        }
        self.circle_history.clear();
        self.circle_smoothed.iter_mut().for_each(|v| *v = 0.0);
        self.latest = None;
        tracing::debug!("[Visualizer] Reset");
    }

    // ============ Private Implementation ============

    fn idle(&self) -> VisualOutput {
        let scale = match self.config.mode {
            VisualizerMode::Bands => self.config.idle_scale,
            VisualizerMode::Circle => self.config.circle_min_radius * CIRCLE_IDLE_RATIO,
        };
        VisualOutput::Idle { scale }
    }

    fn render_bands(&mut self, bars: &[f32]) -> Vec<BandLevel> {
        let peaks = band_peaks(bars, self.histories.len());
        let idle = self.config.idle_scale;

        peaks
            .iter()
            .enumerate()
            .map(|(band, &peak)| {
                self.histories[band].push(peak);

                let normalized = normalize(peak, &self.histories[band], self.config.silent_gain);
                let mut value = normalized.powf(self.config.ease_exponent) * self.config.sensitivity;

                // Each pass smooths the previous pass's output
                for pass in self.smoothed.iter_mut() {
                    let previous = pass[band];
                    value = previous + (value - previous) * self.config.smoothing_factor;
                    pass[band] = value;
                }

                let level = value.clamp(0.0, 1.0);
                BandLevel {
                    level,
                    scale: idle + (1.0 - idle) * level,
                }
            })
            .collect()
    }

    fn render_circle(&mut self, bars: &[f32]) -> VisualOutput {
        let peak = overall_peak(bars);
        self.circle_history.push(peak);

        let normalized = normalize(peak, &self.circle_history, self.config.silent_gain)
            .powf(self.config.circle_ease_exponent);

        // One factor for every pass, chosen by the size of the incoming change
        let factor = adaptive_factor((normalized - self.circle_smoothed[0]).abs());

        let mut value = normalized;
        for previous in self.circle_smoothed.iter_mut() {
            value = *previous + (value - *previous) * factor;
            *previous = value;
        }

        let level = ease_in_out_cubic(value.clamp(0.0, 1.0));
        let min = self.config.circle_min_radius;

        VisualOutput::Circle {
            level,
            radius_scale: min + (1.0 - min) * level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bars: Vec<f32>) -> FftFrame {
        FftFrame {
            bars,
            ..Default::default()
        }
    }

    fn bands(output: VisualOutput) -> Vec<BandLevel> {
        match output {
            VisualOutput::Bands(levels) => levels,
            other => panic!("expected bands, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_before_any_frame() {
        let mut processor = SignalProcessor::new(VisualizerConfig::default());
        assert_eq!(processor.render(), VisualOutput::Idle { scale: 0.55 });

        processor.set_mode(VisualizerMode::Circle);
        match processor.render() {
            VisualOutput::Idle { scale } => assert!((scale - 0.6).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_band_partition_takes_peaks() {
        let bars = vec![0.1, 0.5, 0.2, 0.9, 0.3, 0.3, 0.0, 0.4, 0.7, 0.6, 0.1, 0.2, 0.8, 0.05];
        let peaks = band_peaks(&bars, 6);
        assert_eq!(peaks.len(), 6);
        assert_eq!(peaks[0], 0.5);
        assert_eq!(peaks[1], 0.9);
        // last band absorbs the remainder
        assert_eq!(peaks[5], 0.8);
    }

    #[test]
    fn test_fewer_bars_than_bands() {
        let peaks = band_peaks(&[0.2, 0.4], 6);
        assert_eq!(peaks, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.4]);
    }

    #[test]
    fn test_constant_input_stays_finite() {
        let mut processor = SignalProcessor::new(VisualizerConfig::default());
        processor.push_frame(frame(vec![0.003; 48]));

        for _ in 0..200 {
            for level in bands(processor.render()) {
                assert!(level.level.is_finite());
                assert!(level.scale.is_finite());
                assert!(level.level >= 0.0 && level.level <= 1.0);
                assert!(level.scale >= 0.55 && level.scale <= 1.0);
            }
        }
    }

    #[test]
    fn test_flat_history_uses_gain_fallback() {
        let mut history = BandHistory::new(60);
        history.push(0.004);
        assert!((normalize(0.004, &history, 100.0) - 0.4).abs() < 1e-6);
        assert_eq!(normalize(0.5, &history, 100.0), 1.0);
        assert_eq!(normalize(0.0, &history, 100.0), 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = BandHistory::new(3);
        for v in [1.0, 5.0, 2.0, 3.0] {
            history.push(v);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.range(), (2.0, 5.0));
    }

    #[test]
    fn test_smoothing_rises_gradually() {
        let mut processor = SignalProcessor::new(VisualizerConfig::default());
        processor.push_frame(frame(vec![0.0; 12]));
        processor.render();

        processor.push_frame(frame(vec![1.0; 12]));
        let first = bands(processor.render())[0].level;
        let second = bands(processor.render())[0].level;

        // Two passes at 0.2 from zero: 0.6 * 0.2 * 0.2
        assert!((first - 0.024).abs() < 1e-5, "first = {}", first);
        assert!(second > first);
        assert!(second < 0.6);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut processor = SignalProcessor::new(VisualizerConfig::default());
        processor.push_frame(frame(vec![0.5; 12]));
        processor.render();

        processor.reset();
        assert!(!processor.has_frame());
        assert!(matches!(processor.render(), VisualOutput::Idle { .. }));

        // Smoothing restarts from zero
        processor.push_frame(frame(vec![1.0; 12]));
        let level = bands(processor.render())[0].level;
        assert!(level < 0.05);
    }

    #[test]
    fn test_non_finite_bars_are_ignored() {
        let mut processor = SignalProcessor::new(VisualizerConfig::default());
        processor.push_frame(frame(vec![f32::NAN, 0.2, f32::INFINITY, 0.1, 0.3, 0.2]));
        for level in bands(processor.render()) {
            assert!(level.level.is_finite());
        }
    }

    #[test]
    fn test_adaptive_factor_bounds() {
        assert_eq!(adaptive_factor(0.0), 0.3);
        assert_eq!(adaptive_factor(0.5), 0.05);
        let mid = adaptive_factor(0.115);
        assert!(mid < 0.3 && mid > 0.05);
    }

    #[test]
    fn test_ease_in_out_cubic_endpoints() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
        assert!((ease_in_out_cubic(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_circle_radius_within_bounds() {
        let config = VisualizerConfig {
            mode: VisualizerMode::Circle,
            ..Default::default()
        };
        let mut processor = SignalProcessor::new(config);

        for i in 0..120 {
            let v = if i % 10 < 5 { 0.9 } else { 0.05 };
            processor.push_frame(frame(vec![v; 16]));
            match processor.render() {
                VisualOutput::Circle { level, radius_scale } => {
                    assert!((0.0..=1.0).contains(&level));
                    assert!((0.75..=1.0).contains(&radius_scale));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_frame_deserializes_with_missing_fields() {
        let frame: FftFrame = serde_json::from_str(r#"{"bars": [0.1, 0.2]}"#).unwrap();
        assert_eq!(frame.bars, vec![0.1, 0.2]);
        assert_eq!(frame.rate, 0);
    }
}
