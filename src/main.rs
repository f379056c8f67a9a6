use anyhow::{Context, Result};
use crossbeam_channel::{select, Receiver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use speaker_sync::api::{HttpPlaybackApi, PlaybackApi};
use speaker_sync::artwork::HttpArtworkFetcher;
use speaker_sync::config::AppConfig;
use speaker_sync::logging;
use speaker_sync::session::SessionHandle;
use speaker_sync::transport;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DaemonSignal {
    Shutdown,
    Reload,
}

// ========================================================================
// SIGNALS
// ========================================================================
//    SIGINT/SIGTERM stop the daemon, SIGUSR1 reloads the configuration

#[cfg(unix)]
fn watch_signals() -> Result<Receiver<DaemonSignal>> {
    use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1]).context("registering signal handlers")?;
    let (tx, rx) = crossbeam_channel::bounded(4);

    std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            for signal in signals.forever() {
                let event = match signal {
                    SIGUSR1 => DaemonSignal::Reload,
                    _ => DaemonSignal::Shutdown,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        })
        .context("spawning signal thread")?;

    Ok(rx)
}

#[cfg(not(unix))]
fn watch_signals() -> Result<Receiver<DaemonSignal>> {
    Ok(crossbeam_channel::never())
}

// ========================================================================
// SESSION
// ========================================================================

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path).context("loading configuration")?;
            config.apply_env();
            Ok(config)
        }
        None => AppConfig::load().context("loading configuration"),
    }
}

fn start_session(config: &AppConfig) -> Result<SessionHandle> {
    let transport = transport::from_config(&config.transport, config.demo_mode);

    let api = HttpPlaybackApi::from_config(&config.api).map(|api| {
        tracing::info!("[Main] Playback API at {}", api.base_url());
        Arc::new(api) as Arc<dyn PlaybackApi>
    });
    if api.is_none() {
        tracing::info!("[Main] No playback API configured, commands apply locally only");
    }

    let fetcher = HttpArtworkFetcher::new(Duration::from_millis(config.api.timeout_ms.max(1)));

    SessionHandle::start(config.clone(), transport, api, fetcher).context("starting session")
}

fn main() -> Result<()> {
    let _log_guard = logging::init(logging::default_log_dir().as_deref())?;

    tracing::info!("=== speakerd {} ===", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = load_config(config_path.as_deref())?;
    let mut session = start_session(&config)?;

    let signals = watch_signals()?;
    let status_ticker = crossbeam_channel::tick(STATUS_INTERVAL);

    loop {
        select! {
            recv(signals) -> signal => match signal {
                Ok(DaemonSignal::Reload) => {
                    tracing::info!("[Main] Reloading configuration");
                    match load_config(config_path.as_deref()) {
                        Ok(next) if next == config => {
                            tracing::info!("[Main] Configuration unchanged");
                        }
                        Ok(next) => {
                            session.stop();
                            config = next;
                            session = start_session(&config)?;
                        }
                        Err(e) => tracing::error!("[Main] Keeping previous configuration: {:#}", e),
                    }
                }
                Ok(DaemonSignal::Shutdown) | Err(_) => break,
            },
            recv(status_ticker) -> _ => {
                tracing::info!("[Main] {}", session.state().status_line());
            }
        }
    }

    tracing::info!("[Main] Shutting down...");
    session.stop();
    Ok(())
}
