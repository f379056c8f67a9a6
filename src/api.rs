use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::ApiError;

/// `GET {base}/now-playing` response
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NowPlaying {
    pub playing: bool,
    pub track: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_art: Option<String>,

    /// Milliseconds
    pub progress: Option<u64>,
    /// Milliseconds
    pub duration: Option<u64>,
    pub volume: Option<u8>,

    /// Local epoch ms at which the response was received
    #[serde(skip)]
    pub sampled_at_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipDirection {
    Next,
    Previous,
}

impl SkipDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipDirection::Next => "next",
            SkipDirection::Previous => "previous",
        }
    }
}

/// The REST playback collaborator
pub trait PlaybackApi: Send + Sync {
    fn now_playing(&self) -> Result<NowPlaying, ApiError>;
    fn set_playing(&self, playing: bool) -> Result<(), ApiError>;
    fn skip(&self, direction: SkipDirection) -> Result<(), ApiError>;
    fn set_volume(&self, volume: u8) -> Result<(), ApiError>;
}

#[derive(Serialize)]
struct PlayingBody {
    playing: bool,
}

#[derive(Serialize)]
struct VolumeBody {
    volume: u8,
}

pub struct HttpPlaybackApi {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpPlaybackApi {
    /// `None` when no base URL is configured
    pub fn from_config(config: &ApiConfig) -> Option<Self> {
        let base = config.base_url.as_deref()?.trim().trim_end_matches('/');
        if base.is_empty() {
            return None;
        }

        Some(Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_millis(config.timeout_ms.max(1)))
                .user_agent(concat!("speaker-sync/", env!("CARGO_PKG_VERSION")))
                .build(),
            base_url: base.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl PlaybackApi for HttpPlaybackApi {
    fn now_playing(&self) -> Result<NowPlaying, ApiError> {
        let report: NowPlaying = self.agent.get(&self.url("now-playing")).call()?.into_json()?;
        Ok(report)
    }

    fn set_playing(&self, playing: bool) -> Result<(), ApiError> {
        tracing::debug!("[API] play-pause -> playing={}", playing);
        self.agent
            .post(&self.url("play-pause"))
            .send_json(PlayingBody { playing })?;
        Ok(())
    }

    fn skip(&self, direction: SkipDirection) -> Result<(), ApiError> {
        tracing::debug!("[API] {}", direction.as_str());
        self.agent.post(&self.url(direction.as_str())).call()?;
        Ok(())
    }

    fn set_volume(&self, volume: u8) -> Result<(), ApiError> {
        let volume = volume.min(100);
        tracing::debug!("[API] volume -> {}", volume);
        self.agent
            .put(&self.url("volume"))
            .send_json(VolumeBody { volume })?;
        Ok(())
    }
}
