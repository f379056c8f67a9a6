//! Tracing setup: console plus an optional daily-rolling log file.

use anyhow::Context;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "speaker-sync.log";

/// Used when RUST_LOG is unset. The MQTT client is chatty at info.
pub const DEFAULT_FILTER: &str = "info,rumqttc=warn";

/// `<data dir>/speaker-sync/logs`
pub fn default_log_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "speaker-sync").map(|dirs| dirs.data_local_dir().join("logs"))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process, dropping it
/// flushes and closes the file writer.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let timer = UtcTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]Z"
    ));

    let console = fmt::layer().with_timer(timer.clone()).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_timer(timer).with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init(Some(dir.path())).unwrap();
        assert!(guard.is_some());

        tracing::info!("[Test] hello from the log test");
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().to_string_lossy().into_owned();
        assert!(name.starts_with(LOG_FILE_PREFIX));

        // A second global subscriber is refused
        assert!(init(None).is_err());
    }
}
