use crossbeam_channel::Sender;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{ConnectionStatus, DeviceCommand, PlaybackField, Transport, TransportEvent, VisualizerField, Worker};
use crate::error::TransportError;
use crate::snapshot::PlaybackState;
use crate::units::now_ms;
use crate::visualizer::FftFrame;

/// Used when no broker address is configured. Never connects, never fails.
pub struct DisabledTransport;

impl DisabledTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DisabledTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DisabledTransport {
    fn start(&mut self, tx: Sender<TransportEvent>) -> Result<(), TransportError> {
        tracing::info!("[Transport] No broker configured, live updates disabled");
        let _ = tx.send(TransportEvent::Connection(ConnectionStatus::Disabled));
        Ok(())
    }

    fn publish(&self, _command: &DeviceCommand) -> Result<(), TransportError> {
        Err(TransportError::NotConfigured)
    }

    fn stop(&mut self) {}

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Disabled
    }

    fn reset(&mut self) {}
}

struct DemoTrack {
    id: &'static str,
    title: &'static str,
    artist: &'static str,
    album: &'static str,
    duration_ms: u64,
}

const DEMO_TRACKS: [DemoTrack; 3] = [
    DemoTrack {
        id: "demo-1",
        title: "Night Drive",
        artist: "Demo Artist",
        album: "Test Signals",
        duration_ms: 42_000,
    },
    DemoTrack {
        id: "demo-2",
        title: "Low Tide",
        artist: "Demo Artist",
        album: "Test Signals",
        duration_ms: 35_000,
    },
    DemoTrack {
        id: "demo-3",
        title: "Static Bloom",
        artist: "Another Demo",
        album: "Loopback",
        duration_ms: 51_000,
    },
];

/// Synthesized playback and spectrum feed for running without a speaker
pub struct DemoTransport {
    worker: Option<Worker>,
    frame_interval: Duration,
}

impl DemoTransport {
    pub fn new() -> Self {
        Self {
            worker: None,
            frame_interval: Duration::from_millis(33),
        }
    }

    fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }
}

impl Default for DemoTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Spectrum shape for a demo frame: a slow sweep plus a beat on the low end
pub fn demo_bars(elapsed_ms: u64, bins: usize) -> Vec<f32> {
    let t = elapsed_ms as f32 / 1000.0;
    let beat = ((t * 2.0 * std::f32::consts::PI).sin().max(0.0)).powi(4);

    (0..bins)
        .map(|i| {
            let x = i as f32 / bins.max(1) as f32;
            let sweep = ((t * 0.7 + x * 6.0).sin() * 0.5 + 0.5) * 0.04;
            let low = beat * (1.0 - x).powi(3) * 0.08;
            (sweep + low).max(0.0)
        })
        .collect()
}

impl Transport for DemoTransport {
    fn start(&mut self, tx: Sender<TransportEvent>) -> Result<(), TransportError> {
        if self.is_running() {
            return Ok(());
        }

        // Reap a feed that ended on its own
        self.worker = None;

        let frame_interval = self.frame_interval;

        let worker = Worker::spawn("demo-transport", move |running| {
            tracing::info!("[Transport/Demo] Demo feed started");
            let send = |event: TransportEvent| tx.send(event).is_ok();

            send(TransportEvent::Connection(ConnectionStatus::Connected));

            let mut index = 0usize;
            'tracks: while running.load(Ordering::SeqCst) {
                let track = &DEMO_TRACKS[index % DEMO_TRACKS.len()];
                let started = now_ms();

                let intro = [
                    PlaybackField::TrackId(track.id.to_string()),
                    PlaybackField::Track(track.title.to_string()),
                    PlaybackField::Artist(track.artist.to_string()),
                    PlaybackField::Album(track.album.to_string()),
                    PlaybackField::Duration(track.duration_ms as f64),
                    PlaybackField::State(PlaybackState::Playing),
                ];
                for field in intro {
                    if !send(TransportEvent::Playback(field)) {
                        break 'tracks;
                    }
                }

                let mut last_position_report = 0u64;
                loop {
                    if !running.load(Ordering::SeqCst) {
                        break 'tracks;
                    }

                    let now = now_ms();
                    let elapsed = now.saturating_sub(started);
                    if elapsed >= track.duration_ms {
                        break;
                    }

                    // Position and its timestamp once per second
                    if now.saturating_sub(last_position_report) >= 1000 {
                        last_position_report = now;
                        let ok = send(TransportEvent::Playback(PlaybackField::Position {
                            value: elapsed as f64,
                            track_id: Some(track.id.to_string()),
                        })) && send(TransportEvent::Playback(PlaybackField::Timestamp(now as f64)));
                        if !ok {
                            break 'tracks;
                        }
                    }

                    let frame = FftFrame {
                        ts: now as f64 / 1000.0,
                        rate: 44_100,
                        bins: 32,
                        rms: 0.0,
                        bars: demo_bars(elapsed, 32),
                    };
                    if !send(TransportEvent::Visualizer(VisualizerField::Frame(frame))) {
                        break 'tracks;
                    }

                    std::thread::sleep(frame_interval);
                }

                index += 1;
            }

            running.store(false, Ordering::SeqCst);
            tracing::info!("[Transport/Demo] Demo feed stopped");
        })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn publish(&self, command: &DeviceCommand) -> Result<(), TransportError> {
        tracing::info!("[Transport/Demo] Would publish {} = {}", command.topic_suffix(), command.payload());
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.join();
        }
    }

    fn status(&self) -> ConnectionStatus {
        if self.is_running() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    fn reset(&mut self) {}
}
