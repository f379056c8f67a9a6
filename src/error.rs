//! Error types for the transport, payload, REST and artwork layers.
//!
//! None of these are fatal to a session: every one of them is logged and
//! folded back into state (connection flag, reverted intent, neutral gradient).

use thiserror::Error;

/// Errors raised by the pub/sub connection
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no broker address configured")]
    NotConfigured,

    #[error("invalid broker address '{0}'")]
    InvalidAddress(String),

    #[error("transport disabled after {attempts} failed connection attempts")]
    Disabled { attempts: u32 },

    #[error("transport is not running")]
    NotRunning,

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("could not start thread: {0}")]
    Io(#[from] std::io::Error),
}

/// A message on a known topic that could not be decoded
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("expected a number, got '{0}'")]
    NotANumber(String),

    #[error("unknown playback state '{0}'")]
    UnknownState(String),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the REST playback collaborator
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not authenticated with the playback service")]
    Unauthorized,

    #[error("playback API returned HTTP {0}")]
    Status(u16),

    #[error("playback API transport error: {0}")]
    Transport(String),

    #[error("could not decode playback API response: {0}")]
    Decode(#[from] std::io::Error),
}

impl From<ureq::Error> for ApiError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(401, _) => ApiError::Unauthorized,
            ureq::Error::Status(code, _) => ApiError::Status(code),
            ureq::Error::Transport(t) => ApiError::Transport(t.to_string()),
        }
    }
}

/// Errors while turning artwork into a color
#[derive(Debug, Error)]
pub enum ColorError {
    #[error("artwork download failed: {0}")]
    Fetch(String),

    #[error("artwork could not be decoded: {0}")]
    Decode(#[from] image::ImageError),

    #[error("artwork read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while loading or saving the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a configuration directory")]
    NoConfigDir,

    #[error("config file I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is malformed: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_message_names_attempts() {
        let err = TransportError::Disabled { attempts: 3 };
        assert_eq!(
            err.to_string(),
            "transport disabled after 3 failed connection attempts"
        );
    }

    #[test]
    fn test_payload_error_from_json() {
        let json_err = serde_json::from_str::<Vec<String>>("[not json").unwrap_err();
        let err: PayloadError = json_err.into();
        assert!(matches!(err, PayloadError::Json(_)));
    }
}
