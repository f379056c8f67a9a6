use crossbeam_channel::{Receiver, Sender};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::color::{dominant_color, Rgb};
use crate::error::ColorError;

/// Artwork larger than this is not worth sampling
const MAX_ARTWORK_BYTES: u64 = 10 * 1024 * 1024;

/// Result of one artwork lookup, keyed by the URL it was requested for
#[derive(Clone, Debug, PartialEq)]
pub enum ArtworkResult {
    Color { url: String, color: Option<Rgb> },
    Failed { url: String, error: String },
}

impl ArtworkResult {
    pub fn url(&self) -> &str {
        match self {
            ArtworkResult::Color { url, .. } | ArtworkResult::Failed { url, .. } => url,
        }
    }
}

/// Where artwork bytes come from
pub trait ArtworkFetcher: Send + 'static {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ColorError>;
}

/// HTTP(S) via ureq, plus local `file://` URLs
pub struct HttpArtworkFetcher {
    agent: ureq::Agent,
}

impl HttpArtworkFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(timeout)
                .user_agent(concat!("speaker-sync/", env!("CARGO_PKG_VERSION")))
                .build(),
        }
    }
}

impl ArtworkFetcher for HttpArtworkFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, ColorError> {
        if let Some(path) = url.strip_prefix("file://") {
            let path = PathBuf::from(url_decode(path));
            return Ok(fs::read(path)?);
        }

        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| ColorError::Fetch(e.to_string()))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_ARTWORK_BYTES)
            .read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Minimal percent-decoder for file paths (spaces and friends)
fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                output.push(byte);
                i += 3;
                continue;
            }
        }
        output.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

/// Background worker turning artwork URLs into colors.
///
/// Only the newest queued URL is processed; results go out on the channel
/// given to `spawn` and the receiver drops results for URLs it no longer shows.
pub struct ArtworkLoader {
    requests: Option<Sender<String>>,
    handle: Option<JoinHandle<()>>,
}

impl ArtworkLoader {
    pub fn spawn<F: ArtworkFetcher>(fetcher: F, sample_size: u32, results: Sender<ArtworkResult>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();

        let handle = std::thread::Builder::new()
            .name("artwork-loader".into())
            .spawn(move || Self::run(fetcher, sample_size, rx, results))
            .map_err(|e| tracing::error!("[Artwork] Failed to start loader thread: {}", e))
            .ok();

        Self {
            requests: handle.as_ref().map(|_| tx),
            handle,
        }
    }

    pub fn request(&self, url: &str) {
        if let Some(tx) = &self.requests {
            let _ = tx.send(url.to_string());
        }
    }

    /// Close the queue and wait for the worker to finish its current fetch
    pub fn shutdown(&mut self) {
        self.requests = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn run<F: ArtworkFetcher>(fetcher: F, sample_size: u32, rx: Receiver<String>, results: Sender<ArtworkResult>) {
        tracing::debug!("[Artwork] Loader started");

        while let Ok(mut url) = rx.recv() {
            // Skip anything superseded while we were busy
            while let Ok(newer) = rx.try_recv() {
                url = newer;
            }

            let result = match fetcher.fetch(&url).and_then(|bytes| dominant_color(&bytes, sample_size)) {
                Ok(color) => {
                    tracing::debug!("[Artwork] {} -> {:?}", url, color.map(|c| c.to_hex()));
                    ArtworkResult::Color { url, color }
                }
                Err(e) => {
                    tracing::warn!("[Artwork] Could not extract color from {}: {}", url, e);
                    ArtworkResult::Failed {
                        url,
                        error: e.to_string(),
                    }
                }
            };

            if results.send(result).is_err() {
                break;
            }
        }

        tracing::debug!("[Artwork] Loader stopped");
    }
}

impl Drop for ArtworkLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}
