//! Session manager
//!
//! Owns one transport connection and every stateful component on a single
//! thread. Workers (network loop, REST calls, artwork fetch) only talk to it
//! through channels, and readers only see copies published to `SharedState`.

use crossbeam_channel::{select, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::api::{PlaybackApi, SkipDirection};
use crate::artwork::{ArtworkFetcher, ArtworkLoader, ArtworkResult};
use crate::clock::InterpolationClock;
use crate::config::AppConfig;
use crate::coordinator::{ApiOutcome, CommandCoordinator};
use crate::error::TransportError;
use crate::gradient::ColorTransitionEngine;
use crate::reconciler::Reconciler;
use crate::shared_state::{PerformanceStats, SharedState};
use crate::snapshot::DeviceState;
use crate::source_modes::SourceModes;
use crate::transport::{
    ConnectionStatus, DeviceCommand, DeviceField, Transport, TransportEvent, VisualizerField,
};
use crate::units::now_ms;
use crate::visualizer::{SignalProcessor, VisualizerMode};

/// Requests from readers to the session thread
#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    TogglePlayPause,
    SetPlaying(bool),
    Skip(SkipDirection),
    /// Playback volume through the REST collaborator
    SetPlaybackVolume(u8),
    /// Device command over the transport
    Device(DeviceCommand),
    SetVisualizerMode(VisualizerMode),
    /// Clear a disabled transport and connect again
    Reconnect,
    Stop,
}

/// Handle to a running session thread
pub struct SessionHandle {
    control: Sender<Control>,
    shared: Arc<Mutex<SharedState>>,
    handle: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Start the transport and spawn the session thread
    pub fn start<F: ArtworkFetcher>(
        config: AppConfig,
        mut transport: Box<dyn Transport>,
        api: Option<Arc<dyn PlaybackApi>>,
        fetcher: F,
    ) -> Result<Self, TransportError> {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        transport.start(events_tx.clone())?;

        let shared = Arc::new(Mutex::new(SharedState::new()));
        let (control_tx, control_rx) = crossbeam_channel::unbounded();

        let mut session = Session::new(config, transport, events_tx, api, fetcher, shared.clone());

        let handle = std::thread::Builder::new()
            .name("speaker-session".into())
            .spawn(move || session.run(events_rx, control_rx))
            .map_err(TransportError::Io)?;

        Ok(Self {
            control: control_tx,
            shared,
            handle: Some(handle),
        })
    }

    pub fn shared(&self) -> Arc<Mutex<SharedState>> {
        self.shared.clone()
    }

    /// Copy of the currently published state
    pub fn state(&self) -> SharedState {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue a control message. False once the session has stopped.
    pub fn send(&self, control: Control) -> bool {
        self.control.send(control).is_ok()
    }

    pub fn toggle_play_pause(&self) -> bool {
        self.send(Control::TogglePlayPause)
    }

    pub fn skip(&self, direction: SkipDirection) -> bool {
        self.send(Control::Skip(direction))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the transport, clear every timer and join the session thread
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.control.send(Control::Stop);
            if handle.join().is_err() {
                tracing::error!("[Session] Session thread panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============ Private Implementation ============

struct Session {
    config: AppConfig,

    transport: Box<dyn Transport>,
    events_tx: Sender<TransportEvent>,
    connection: ConnectionStatus,

    reconciler: Reconciler,
    clock: InterpolationClock,
    coordinator: CommandCoordinator,
    outcomes_rx: Receiver<ApiOutcome>,

    processor: SignalProcessor,

    colors: ColorTransitionEngine,
    artwork: ArtworkLoader,
    artwork_rx: Receiver<ArtworkResult>,
    current_artwork: Option<String>,

    device: DeviceState,
    source_modes: SourceModes,

    /// Last revision published and the track it showed
    published_revision: Option<u64>,
    announced_track: String,

    stats: PerformanceStats,
    shared: Arc<Mutex<SharedState>>,
}

impl Session {
    fn new<F: ArtworkFetcher>(
        config: AppConfig,
        transport: Box<dyn Transport>,
        events_tx: Sender<TransportEvent>,
        api: Option<Arc<dyn PlaybackApi>>,
        fetcher: F,
        shared: Arc<Mutex<SharedState>>,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = crossbeam_channel::unbounded();
        let (artwork_tx, artwork_rx) = crossbeam_channel::unbounded();

        Self {
            connection: transport.status(),
            transport,
            events_tx,
            reconciler: Reconciler::new(&config.playback),
            clock: InterpolationClock::new(),
            coordinator: CommandCoordinator::new(&config.playback, api, outcomes_tx),
            outcomes_rx,
            processor: SignalProcessor::new(config.visualizer.clone()),
            colors: ColorTransitionEngine::new(config.color.clone()),
            artwork: ArtworkLoader::spawn(fetcher, config.color.sample_size, artwork_tx),
            artwork_rx,
            current_artwork: None,
            device: DeviceState::default(),
            source_modes: SourceModes::new(),
            published_revision: None,
            announced_track: String::new(),
            stats: PerformanceStats::default(),
            shared,
            config,
        }
    }

    fn run(&mut self, events_rx: Receiver<TransportEvent>, control_rx: Receiver<Control>) {
        tracing::info!("[Session] Started (api: {})", self.coordinator.has_api());

        let clock_ticker = crossbeam_channel::tick(Duration::from_millis(self.config.playback.clock_tick_ms.max(1)));
        let render_ticker = crossbeam_channel::tick(Duration::from_millis(self.config.visualizer.frame_interval_ms().max(1)));

        let outcomes_rx = self.outcomes_rx.clone();
        // A worker that died must not spin the loop
        let mut artwork_rx = self.artwork_rx.clone();

        self.coordinator.start_polling(now_ms());
        self.publish_all();

        loop {
            select! {
                recv(events_rx) -> msg => {
                    if let Ok(event) = msg {
                        self.on_transport_event(event, now_ms());
                    }
                }
                recv(outcomes_rx) -> msg => {
                    if let Ok(outcome) = msg {
                        let now = now_ms();
                        if self.coordinator.handle_outcome(&mut self.reconciler, outcome, now) {
                            self.on_snapshot_changed(now);
                        }
                    }
                }
                recv(artwork_rx) -> msg => match msg {
                    Ok(result) => self.on_artwork_result(result, now_ms()),
                    Err(_) => {
                        tracing::warn!("[Session] Artwork loader gone, colors stay neutral");
                        artwork_rx = crossbeam_channel::never();
                    }
                },
                recv(control_rx) -> msg => match msg {
                    Ok(Control::Stop) | Err(_) => break,
                    Ok(control) => self.on_control(control, now_ms()),
                },
                recv(clock_ticker) -> _ => self.on_clock_tick(now_ms()),
                recv(render_ticker) -> _ => self.on_render_tick(now_ms()),
            }
        }

        self.teardown();
    }

    fn on_transport_event(&mut self, event: TransportEvent, now: u64) {
        self.stats.events += 1;

        match event {
            TransportEvent::Connection(status) => {
                if status != self.connection {
                    tracing::info!("[Session] Connection: {:?} -> {:?}", self.connection, status);
                }
                self.connection = status;
                self.publish(|state| state.connection = status);
            }
            TransportEvent::Device(field) => self.on_device_field(field),
            TransportEvent::Playback(field) => {
                if self.reconciler.apply(field, now) {
                    self.on_snapshot_changed(now);
                }
            }
            TransportEvent::Visualizer(VisualizerField::Frame(frame)) => {
                self.stats.frames += 1;
                self.processor.push_frame(frame);
            }
            TransportEvent::Visualizer(VisualizerField::Status(status)) => {
                tracing::debug!("[Session] Visualizer status: {}", status);
                self.publish(|state| state.visualization.status = Some(status));
            }
        }
    }

    fn on_device_field(&mut self, field: DeviceField) {
        match field {
            DeviceField::Status(status) => {
                if status != self.device.status {
                    tracing::info!("[Session] Device {}", status);
                }
                self.device.status = status;
            }
            DeviceField::Volume(volume) => self.device.volume = volume.min(100),
            DeviceField::Source(source) => {
                if source != self.device.source {
                    tracing::info!("[Session] Source: {} -> {}", self.device.source, source);
                }
                self.device.source = source;
            }
            DeviceField::AvailableSources(sources) => self.device.available_sources = sources,
            DeviceField::Health(health) => self.device.health = Some(health),
        }

        let device = self.device.clone();
        let mode = self.source_modes.mode_for(Some(&device.source)).clone();
        self.publish(|state| {
            state.device = device;
            state.source_mode = mode;
        });
    }

    fn on_control(&mut self, control: Control, now: u64) {
        let changed = match control {
            Control::TogglePlayPause => {
                self.coordinator.toggle_play_pause(&mut self.reconciler, now);
                true
            }
            Control::SetPlaying(playing) => {
                self.coordinator.issue_command(&mut self.reconciler, playing, now);
                true
            }
            Control::Skip(direction) => {
                if self.coordinator.skip(&mut self.reconciler, direction, now) {
                    self.processor.reset();
                    self.colors.reset(now);
                }
                true
            }
            Control::SetPlaybackVolume(volume) => {
                self.coordinator.set_volume(&mut self.reconciler, volume, now);
                true
            }
            Control::Device(command) => {
                self.send_device_command(command);
                false
            }
            Control::SetVisualizerMode(mode) => {
                self.processor.set_mode(mode);
                self.publish(|state| state.visualization.mode = mode);
                false
            }
            Control::Reconnect => {
                self.reconnect();
                false
            }
            Control::Stop => false,
        };

        if changed {
            self.on_snapshot_changed(now);
        }
    }

    fn send_device_command(&mut self, command: DeviceCommand) {
        match self.transport.publish(&command) {
            Ok(()) => {
                tracing::info!("[Session] Sent {} ({})", command.topic_suffix(), command.payload());
                if let DeviceCommand::SetVolume(volume) = command {
                    self.device.volume = volume.min(100);
                    let device = self.device.clone();
                    self.publish(|state| state.device = device);
                }
            }
            Err(e) => tracing::warn!("[Session] Could not send {}: {}", command.topic_suffix(), e),
        }
    }

    fn reconnect(&mut self) {
        tracing::info!("[Session] Reconnecting transport");
        self.transport.stop();
        self.transport.reset();
        if let Err(e) = self.transport.start(self.events_tx.clone()) {
            tracing::error!("[Session] Transport restart failed: {}", e);
        }
    }

    fn on_artwork_result(&mut self, result: ArtworkResult, now: u64) {
        if self.current_artwork.as_deref() != Some(result.url()) {
            tracing::debug!("[Session] Dropping stale artwork result for {}", result.url());
            return;
        }

        let color = match result {
            ArtworkResult::Color { color, .. } => {
                self.colors.on_artwork_color(color, now);
                color
            }
            ArtworkResult::Failed { .. } => {
                self.colors.on_extraction_failed(now);
                None
            }
        };
        self.publish(|state| state.theme.set_artwork_color(color));
    }

    fn on_clock_tick(&mut self, now: u64) {
        if self.coordinator.on_tick(&mut self.reconciler, now) {
            self.on_snapshot_changed(now);
        }

        let position = self.clock.tick(now);
        let command = self.reconciler.command_state();
        self.publish(|state| {
            state.position_ms = position;
            state.command = command;
        });
    }

    fn on_render_tick(&mut self, now: u64) {
        self.stats.render_ticks += 1;

        let output = self.processor.render();
        let gradient = self.colors.tick(now);
        let stats = self.stats.clone();

        self.publish(|state| {
            state.visualization.output = output;
            state.visualization.timestamp = Instant::now();
            state.theme.gradient = gradient;
            state.performance = stats;
        });
    }

    /// Follow-up for every snapshot change: clock, artwork, publication
    fn on_snapshot_changed(&mut self, now: u64) {
        let snapshot = self.reconciler.snapshot().clone();
        if self.published_revision == Some(snapshot.revision) {
            return;
        }
        self.published_revision = Some(snapshot.revision);
        self.stats.revisions += 1;

        self.clock.sync(&snapshot, now);

        if snapshot.track_id != self.announced_track && !snapshot.track.is_empty() {
            self.announced_track = snapshot.track_id.clone();
            tracing::info!("[Session] Now playing: {} - {}", snapshot.artist, snapshot.track);
        }

        if snapshot.artwork != self.current_artwork {
            self.current_artwork = snapshot.artwork.clone();
            match &self.current_artwork {
                Some(url) => self.artwork.request(url),
                None => {
                    self.colors.on_artwork_color(None, now);
                    self.publish(|state| state.theme.set_artwork_color(None));
                }
            }
        }

        let command = self.reconciler.command_state();
        let position = self.clock.tick(now);
        self.publish(|state| {
            state.playback = snapshot;
            state.command = command;
            state.position_ms = position;
        });
    }

    fn publish_all(&self) {
        let snapshot = self.reconciler.snapshot().clone();
        let device = self.device.clone();
        let mode = self.source_modes.mode_for(Some(&device.source)).clone();
        let connection = self.connection;
        let visualizer_mode = self.processor.mode();

        self.publish(|state| {
            state.playback = snapshot;
            state.device = device;
            state.source_mode = mode;
            state.connection = connection;
            state.visualization.mode = visualizer_mode;
        });
    }

    fn publish(&self, update: impl FnOnce(&mut SharedState)) {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut state);
    }

    fn teardown(&mut self) {
        tracing::info!("[Session] Stopping");

        self.transport.stop();
        self.coordinator.cancel();
        self.colors.cancel();
        self.clock.halt();
        self.artwork.shutdown();

        let status = self.transport.status();
        let position = self.clock.position_ms();
        self.publish(|state| {
            state.connection = status;
            state.position_ms = position;
        });

        tracing::info!(
            "[Session] Stopped ({} events, {} frames, {} revisions)",
            self.stats.events,
            self.stats.frames,
            self.stats.revisions
        );
    }
}
