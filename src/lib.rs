//! Playback state reconciliation and audio-reactive visual smoothing for a
//! networked speaker.
//!
//! A [`session::SessionHandle`] owns one transport connection and runs every
//! component on a single thread; readers get copies through
//! [`shared_state::SharedState`].

pub mod api;
pub mod artwork;
pub mod clock;
pub mod color;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gradient;
pub mod logging;
pub mod reconciler;
pub mod session;
pub mod shared_state;
pub mod snapshot;
pub mod source_modes;
pub mod transport;
pub mod units;
pub mod visualizer;
