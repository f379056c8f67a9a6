//! Topic routing: raw (topic, payload) pairs to typed events.
//!
//! `route` is pure. `handle` adds the logging policy: a malformed payload is
//! reported once per topic at warn level, later ones only at debug.

use serde::Deserialize;
use std::collections::HashSet;

use super::{DeviceField, PlaybackField, TransportEvent, VisualizerField};
use crate::error::PayloadError;
use crate::snapshot::PlaybackState;
use crate::visualizer::FftFrame;

#[derive(Debug)]
pub enum RouteResult {
    Event(TransportEvent),
    /// Not one of ours
    Ignored,
    Malformed(PayloadError),
}

#[derive(Deserialize)]
struct TaggedPosition {
    position: f64,
    #[serde(default)]
    track_id: Option<String>,
}

pub struct TopicRouter {
    prefix: String,
    visualizer_prefix: String,
    warned: HashSet<String>,
}

impl TopicRouter {
    pub fn new(prefix: &str, visualizer_prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            visualizer_prefix: visualizer_prefix.trim_end_matches('/').to_string(),
            warned: HashSet::new(),
        }
    }

    /// Wildcard filters to subscribe to
    pub fn subscriptions(&self) -> Vec<String> {
        let mut subs = vec![format!("{}/#", self.prefix)];
        if !self.visualizer_prefix.starts_with(&format!("{}/", self.prefix)) {
            subs.push(format!("{}/#", self.visualizer_prefix));
        }
        subs
    }

    /// Full topic for a command suffix
    pub fn command_topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix, suffix)
    }

    pub fn route(&self, topic: &str, payload: &[u8]) -> RouteResult {
        // The visualizer namespace nests under the main prefix by default
        if let Some(suffix) = strip(topic, &self.visualizer_prefix) {
            return match route_visualizer(suffix, payload) {
                Ok(Some(event)) => RouteResult::Event(event),
                Ok(None) => RouteResult::Ignored,
                Err(e) => RouteResult::Malformed(e),
            };
        }

        match strip(topic, &self.prefix) {
            Some(suffix) => match route_speaker(suffix, payload) {
                Ok(Some(event)) => RouteResult::Event(event),
                Ok(None) => RouteResult::Ignored,
                Err(e) => RouteResult::Malformed(e),
            },
            None => RouteResult::Ignored,
        }
    }

    /// Route and apply the logging policy; malformed payloads become `None`
    pub fn handle(&mut self, topic: &str, payload: &[u8]) -> Option<TransportEvent> {
        match self.route(topic, payload) {
            RouteResult::Event(event) => Some(event),
            RouteResult::Ignored => None,
            RouteResult::Malformed(err) => {
                if self.warned.insert(topic.to_string()) {
                    tracing::warn!("[Transport] Malformed payload on '{}': {}", topic, err);
                } else {
                    tracing::debug!("[Transport] Malformed payload on '{}': {}", topic, err);
                }
                None
            }
        }
    }
}

fn strip<'a>(topic: &'a str, prefix: &str) -> Option<&'a str> {
    topic.strip_prefix(prefix)?.strip_prefix('/')
}

fn route_speaker(suffix: &str, payload: &[u8]) -> Result<Option<TransportEvent>, PayloadError> {
    let text = as_text(payload)?;

    let event = match suffix {
        "status" => TransportEvent::Device(DeviceField::Status(text.trim().to_string())),
        "volume" => TransportEvent::Device(DeviceField::Volume(parse_volume(text)?)),
        "source/current" => TransportEvent::Device(DeviceField::Source(text.trim().to_string())),
        "source/available" => {
            TransportEvent::Device(DeviceField::AvailableSources(serde_json::from_str(text)?))
        }
        "health" => TransportEvent::Device(DeviceField::Health(serde_json::from_str(text)?)),

        "spotify/track" => TransportEvent::Playback(PlaybackField::Track(text.to_string())),
        "spotify/artist" => TransportEvent::Playback(PlaybackField::Artist(text.to_string())),
        "spotify/album" => TransportEvent::Playback(PlaybackField::Album(text.to_string())),
        "spotify/track_id" => TransportEvent::Playback(PlaybackField::TrackId(text.trim().to_string())),
        "spotify/duration" => TransportEvent::Playback(PlaybackField::Duration(parse_number(text)?)),
        "spotify/position" => TransportEvent::Playback(parse_position(text)?),
        "spotify/state" => TransportEvent::Playback(PlaybackField::State(text.parse::<PlaybackState>()?)),
        "spotify/volume" => TransportEvent::Playback(PlaybackField::Volume(parse_number(text)?)),
        "spotify/artwork" => TransportEvent::Playback(PlaybackField::Artwork(text.trim().to_string())),
        "spotify/timestamp" => TransportEvent::Playback(PlaybackField::Timestamp(parse_number(text)?)),

        // Our own commands echo back on the wildcard subscription
        _ => return Ok(None),
    };

    Ok(Some(event))
}

fn route_visualizer(suffix: &str, payload: &[u8]) -> Result<Option<TransportEvent>, PayloadError> {
    let event = match suffix {
        "fft" => {
            let frame: FftFrame = serde_json::from_slice(payload)?;
            TransportEvent::Visualizer(VisualizerField::Frame(frame))
        }
        "status" => TransportEvent::Visualizer(VisualizerField::Status(as_text(payload)?.trim().to_string())),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn as_text(payload: &[u8]) -> Result<&str, PayloadError> {
    std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)
}

fn parse_number(text: &str) -> Result<f64, PayloadError> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(PayloadError::NotANumber(trimmed.to_string())),
    }
}

fn parse_volume(text: &str) -> Result<u8, PayloadError> {
    Ok(parse_number(text)?.round().clamp(0.0, 100.0) as u8)
}

fn parse_position(text: &str) -> Result<PlaybackField, PayloadError> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        let tagged: TaggedPosition = serde_json::from_str(trimmed)?;
        if !tagged.position.is_finite() {
            return Err(PayloadError::NotANumber(trimmed.to_string()));
        }
        return Ok(PlaybackField::Position {
            value: tagged.position,
            track_id: tagged.track_id.filter(|id| !id.is_empty()),
        });
    }

    Ok(PlaybackField::Position {
        value: parse_number(trimmed)?,
        track_id: None,
    })
}
