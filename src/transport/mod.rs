use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::snapshot::PlaybackState;
use crate::visualizer::FftFrame;

mod dummy;
mod mqtt;
mod topics;

pub use dummy::{DemoTransport, DisabledTransport};
pub use mqtt::MqttTransport;
pub use topics::{RouteResult, TopicRouter};

/// Connection lifecycle as seen by readers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },

    /// No broker configured, or gave up after the max attempts
    Disabled,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

/// Device-level field updates
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceField {
    Status(String),
    Volume(u8),
    Source(String),
    AvailableSources(Vec<String>),
    Health(serde_json::Value),
}

/// Playback field updates, still in channel units
#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackField {
    Track(String),
    Artist(String),
    Album(String),
    TrackId(String),
    Duration(f64),
    Position { value: f64, track_id: Option<String> },
    State(PlaybackState),
    Volume(f64),
    Artwork(String),
    Timestamp(f64),
}

#[derive(Clone, Debug, PartialEq)]
pub enum VisualizerField {
    Frame(FftFrame),
    Status(String),
}

/// Everything a transport delivers to the session
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connection(ConnectionStatus),
    Device(DeviceField),
    Playback(PlaybackField),
    Visualizer(VisualizerField),
}

/// Commands published back to the device
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceCommand {
    SetVolume(u8),
    SetSource(String),
    Shutdown,
    Restart,
}

impl DeviceCommand {
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            DeviceCommand::SetVolume(_) => "command/volume",
            DeviceCommand::SetSource(_) => "command/source",
            DeviceCommand::Shutdown => "command/shutdown",
            DeviceCommand::Restart => "command/restart",
        }
    }

    pub fn payload(&self) -> String {
        match self {
            DeviceCommand::SetVolume(v) => (*v).min(100).to_string(),
            DeviceCommand::SetSource(s) => s.clone(),
            DeviceCommand::Shutdown | DeviceCommand::Restart => "now".to_string(),
        }
    }
}

/// Trait for the pub/sub connection (events in, commands out)
pub trait Transport: Send {
    /// Starts the background connection.
    /// Events are sent via the provided channel.
    fn start(&mut self, tx: Sender<TransportEvent>) -> Result<(), TransportError>;

    fn publish(&self, command: &DeviceCommand) -> Result<(), TransportError>;

    /// Unsubscribe and disconnect. Safe to call more than once.
    fn stop(&mut self);

    fn status(&self) -> ConnectionStatus;

    /// Clear a `Disabled` state so the next `start` tries again
    fn reset(&mut self);

    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }
}

/// Pick the transport for a configuration: demo feed, MQTT, or disabled
pub fn from_config(config: &TransportConfig, demo_mode: bool) -> Box<dyn Transport> {
    if demo_mode {
        tracing::info!("[Transport] Demo mode, using synthetic feed");
        return Box::new(DemoTransport::new());
    }

    match config.broker_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Box::new(MqttTransport::new(config.clone())),
        _ => Box::new(DisabledTransport::new()),
    }
}

// ==============================================================
// RECONNECT POLICY
// ==============================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, after: Duration },
    GiveUp { attempts: u32 },
}

/// Bounded reconnects with a fixed retry period
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    retry_period: Duration,
    failures: u32,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, retry_period: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_period,
            failures: 0,
        }
    }

    pub fn record_failure(&mut self) -> ReconnectDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_attempts {
            ReconnectDecision::GiveUp {
                attempts: self.failures,
            }
        } else {
            ReconnectDecision::Retry {
                attempt: self.failures + 1,
                after: self.retry_period,
            }
        }
    }

    /// A successful connect forgives earlier failures
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.max_attempts
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// At most one log entry per window
#[derive(Clone, Debug)]
pub struct LogLimiter {
    window_ms: u64,
    last_ms: Option<u64>,
}

impl LogLimiter {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_ms: None,
        }
    }

    pub fn should_log(&mut self, now_ms: u64) -> bool {
        match self.last_ms {
            Some(last) if now_ms.saturating_sub(last) < self.window_ms => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            }
        }
    }
}

// ==============================================================
// WORKER THREAD
// ==============================================================

/// One background loop per `start`. The stop flag is never shared with a
/// later start, so a loop that has not noticed `stop` yet cannot keep
/// feeding the next connection.
pub(crate) struct Worker {
    name: &'static str,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> Result<Self, TransportError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || body(flag))?;

        Ok(Self {
            name,
            running,
            handle: Some(handle),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the loop to finish without waiting for it
    pub(crate) fn signal(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Signal and wait for the thread to exit
    pub(crate) fn join(&mut self) {
        self.signal();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("[Transport] {} thread panicked", self.name);
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.join();
    }
}

/// Sleep up to `total`, waking early once `running` is cleared
pub(crate) fn sleep_while_running(running: &AtomicBool, total: Duration) {
    const SLICE: Duration = Duration::from_millis(25);
    let deadline = Instant::now() + total;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}
