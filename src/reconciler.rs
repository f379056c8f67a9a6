//! Playback state reconciler
//!
//! Merges fragmented, independently arriving field updates into one
//! `PlaybackSnapshot`. Position and timestamp travel on separate topics and
//! may arrive in either order; the reconciler treats them as a pair so both
//! orders converge on the same adjusted position.
//!
//! Single writer: the session thread owns the reconciler, readers get clones.

use crate::api::NowPlaying;
use crate::config::PlaybackConfig;
use crate::snapshot::{CommandState, PlaybackSnapshot, PlaybackState};
use crate::transport::PlaybackField;
use crate::units::{timestamp_to_millis, UnitContract};

/// Prefix for track ids synthesized from REST reports (no id on that path)
const REST_TRACK_PREFIX: &str = "rest:";

pub struct Reconciler {
    snapshot: PlaybackSnapshot,
    command: CommandState,

    contract: UnitContract,
    regression_threshold_ms: u64,

    /// Position exactly as reported (unclamped, ms)
    reported_position_ms: u64,

    /// Position arrived since the last complete position/timestamp pair
    position_fresh: bool,

    /// Timestamp arrived since the last complete pair
    timestamp_fresh: bool,

    /// After a track change or hard freeze, hold at 0 until a full pair lands
    awaiting_pair: bool,

    /// Bumped on every track change, used to discard stale async results
    generation: u64,
}

impl Reconciler {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            snapshot: PlaybackSnapshot {
                volume: 50,
                ..Default::default()
            },
            command: CommandState::Idle,
            contract: config.unit_contract,
            regression_threshold_ms: config.regression_threshold_ms,
            reported_position_ms: 0,
            position_fresh: false,
            timestamp_fresh: false,
            awaiting_pair: false,
            generation: 0,
        }
    }

    pub fn snapshot(&self) -> &PlaybackSnapshot {
        &self.snapshot
    }

    pub fn command_state(&self) -> CommandState {
        self.command
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn unit_contract(&self) -> UnitContract {
        self.contract
    }

    /// Apply one channel field update. Returns true if the snapshot changed.
    pub fn apply(&mut self, field: PlaybackField, now_ms: u64) -> bool {
        let before = self.snapshot.clone();

        match field {
            PlaybackField::Track(track) => self.snapshot.track = track,
            PlaybackField::Artist(artist) => self.snapshot.artist = artist,
            PlaybackField::Album(album) => self.snapshot.album = album,
            PlaybackField::TrackId(id) => self.change_track(&id),
            PlaybackField::Duration(value) => {
                let ms = self.contract.to_millis(value);
                self.set_duration(ms, now_ms);
            }
            PlaybackField::Position { value, track_id } => {
                if let Some(id) = track_id.as_deref() {
                    if !id.is_empty() && id != self.snapshot.track_id {
                        tracing::debug!(
                            "[Reconciler] Dropping late position for '{}' (current '{}')",
                            id,
                            self.snapshot.track_id
                        );
                        return false;
                    }
                }
                let ms = self.contract.to_millis(value);
                self.set_position(ms, now_ms);
            }
            PlaybackField::Timestamp(value) => match timestamp_to_millis(value) {
                Some(ts) => self.set_timestamp(ts, now_ms),
                None => {
                    tracing::debug!("[Reconciler] Ignoring unusable timestamp {}", value);
                    return false;
                }
            },
            PlaybackField::State(state) => self.set_reported_state(state, now_ms),
            PlaybackField::Volume(value) => {
                self.snapshot.volume = value.round().clamp(0.0, 100.0) as u8;
            }
            PlaybackField::Artwork(url) => {
                let url = url.trim();
                self.snapshot.artwork = (!url.is_empty()).then(|| url.to_string());
            }
        }

        self.finish(before, now_ms)
    }

    /// Suspend local extrapolation ahead of a command whose effect is not yet
    /// visible. With `reset_position` the position drops to 0 and stays there
    /// until a fresh position+timestamp pair arrives.
    pub fn freeze(&mut self, reset_position: bool, now_ms: u64) -> bool {
        let before = self.snapshot.clone();

        self.snapshot.progress_frozen = true;
        self.snapshot.server_timestamp_ms = None;
        self.position_fresh = false;
        self.timestamp_fresh = false;

        if reset_position {
            self.reported_position_ms = 0;
            self.snapshot.raw_position_ms = 0;
            self.snapshot.adjusted_position_ms = 0;
            self.awaiting_pair = true;
        } else {
            // Bank what is on screen so thawing cannot jump backwards
            self.reported_position_ms = self.snapshot.adjusted_position_ms;
            self.snapshot.raw_position_ms = self.snapshot.adjusted_position_ms;
        }

        tracing::debug!("[Reconciler] Frozen (reset: {})", reset_position);
        self.finish(before, now_ms)
    }

    /// Record a local play/pause intent. Returns the visible state before it.
    pub fn begin_command(&mut self, desired_playing: bool, now_ms: u64, ttl_ms: u64) -> PlaybackState {
        let before = self.snapshot.clone();
        let prior = self.snapshot.state;

        self.command = CommandState::Pending {
            desired_playing,
            issued_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        };
        self.set_visible_state(PlaybackState::from_playing(desired_playing), now_ms);
        self.finish(before, now_ms);

        prior
    }

    /// The remote command failed: restore the prior visible state, drop the intent
    pub fn abort_command(&mut self, prior: PlaybackState, now_ms: u64) -> bool {
        let before = self.snapshot.clone();
        self.command = CommandState::Idle;
        self.set_visible_state(prior, now_ms);
        self.finish(before, now_ms)
    }

    /// Drop an intent whose window has passed and accept the reported state.
    /// No error is surfaced for an unconfirmed command.
    pub fn expire_pending(&mut self, now_ms: u64) -> bool {
        let expired = matches!(
            self.command,
            CommandState::Pending { expires_at_ms, .. } if now_ms >= expires_at_ms
        );
        if !expired {
            return false;
        }

        tracing::debug!(
            "[Reconciler] Pending command expired, accepting reported state '{}'",
            self.snapshot.reported_state
        );

        let before = self.snapshot.clone();
        self.command = CommandState::Idle;
        let reported = self.snapshot.reported_state;
        self.set_visible_state(reported, now_ms);
        self.finish(before, now_ms);
        true
    }

    /// Merge a REST now-playing report, last write wins.
    ///
    /// `generation` is the track generation when the request was issued; a
    /// report that raced a track change is dropped.
    pub fn merge_now_playing(&mut self, report: &NowPlaying, generation: u64, now_ms: u64) -> bool {
        if generation != self.generation {
            tracing::debug!(
                "[Reconciler] Dropping now-playing from generation {} (current {})",
                generation,
                self.generation
            );
            return false;
        }

        let before = self.snapshot.clone();

        // The REST path has no track id. Only synthesize one when the channel
        // never provided a real id, so the two sources do not fight.
        if let Some(track) = report.track.as_deref().filter(|t| !t.is_empty()) {
            let owned_by_rest =
                self.snapshot.track_id.is_empty() || self.snapshot.track_id.starts_with(REST_TRACK_PREFIX);
            if owned_by_rest {
                let artist = report.artist.as_deref().unwrap_or_default();
                let id = format!("{}{}|{}", REST_TRACK_PREFIX, artist, track);
                self.change_track(&id);
            }
            self.snapshot.track = track.to_string();
        }
        if let Some(artist) = report.artist.as_deref() {
            self.snapshot.artist = artist.to_string();
        }
        if let Some(album) = report.album.as_deref() {
            self.snapshot.album = album.to_string();
        }
        if let Some(art) = report.album_art.as_deref() {
            self.snapshot.artwork = (!art.is_empty()).then(|| art.to_string());
        }
        if let Some(volume) = report.volume {
            self.snapshot.volume = volume.min(100);
        }

        self.set_reported_state(PlaybackState::from_playing(report.playing), now_ms);

        // REST values are always milliseconds, sampled when the response was built
        if let Some(duration) = report.duration {
            self.set_duration(duration, now_ms);
        }
        if let Some(progress) = report.progress {
            self.set_timestamp(report.sampled_at_ms.unwrap_or(now_ms), now_ms);
            self.set_position(progress, now_ms);
        }

        self.finish(before, now_ms)
    }

    // ============ Private Implementation ============

    fn change_track(&mut self, id: &str) {
        let id = id.trim();
        if id.is_empty() || id == self.snapshot.track_id {
            return;
        }

        tracing::info!(
            "[Reconciler] Track change: '{}' -> '{}'",
            self.snapshot.track_id,
            id
        );

        self.snapshot.track_id = id.to_string();
        self.generation += 1;

        self.reported_position_ms = 0;
        self.snapshot.raw_position_ms = 0;
        self.snapshot.adjusted_position_ms = 0;
        self.snapshot.server_timestamp_ms = None;
        self.snapshot.progress_frozen = true;
        self.position_fresh = false;
        self.timestamp_fresh = false;
        self.awaiting_pair = true;
    }

    fn set_duration(&mut self, duration_ms: u64, now_ms: u64) {
        if duration_ms == self.snapshot.duration_ms {
            return;
        }
        self.snapshot.duration_ms = duration_ms;
        self.snapshot.raw_position_ms = self.reported_position_ms.min(duration_ms);

        if self.awaiting_pair {
            return;
        }
        let candidate = self.candidate(now_ms, self.timestamp_fresh || !self.position_fresh);
        self.settle(candidate);
    }

    fn set_position(&mut self, position_ms: u64, now_ms: u64) {
        self.reported_position_ms = position_ms;
        self.snapshot.raw_position_ms = position_ms.min(self.snapshot.duration_ms);

        // Repeated values count too (retained messages, same-second timestamps)
        self.position_fresh = true;

        // Only extrapolate with a timestamp that belongs to this position
        let paired = self.timestamp_fresh;
        self.after_pair_field(paired, paired, now_ms);
    }

    fn set_timestamp(&mut self, timestamp_ms: u64, now_ms: u64) {
        self.snapshot.server_timestamp_ms = Some(timestamp_ms);
        self.timestamp_fresh = true;

        let paired = self.position_fresh && self.timestamp_fresh;
        self.after_pair_field(paired, true, now_ms);
    }

    fn after_pair_field(&mut self, paired: bool, extrapolate: bool, now_ms: u64) {
        let candidate = self.candidate(now_ms, extrapolate);

        if self.awaiting_pair {
            if !paired {
                // Hold at 0 until both halves arrived
                return;
            }
            tracing::debug!("[Reconciler] Fresh pair after reset, thawing at {}ms", candidate);
            self.awaiting_pair = false;
            self.snapshot.progress_frozen = false;
            self.snapshot.adjusted_position_ms = candidate;
        } else {
            self.snapshot.progress_frozen = false;
            self.settle(candidate);
        }

        if paired {
            self.position_fresh = false;
            self.timestamp_fresh = false;
        }
    }

    /// `raw + max(0, now - ts)` while playing, clamped to the duration
    fn candidate(&self, now_ms: u64, extrapolate: bool) -> u64 {
        let mut position = self.reported_position_ms;

        if extrapolate && self.snapshot.state.is_playing() {
            if let Some(ts) = self.snapshot.server_timestamp_ms {
                position = position.saturating_add(now_ms.saturating_sub(ts));
            }
        }

        position.min(self.snapshot.duration_ms)
    }

    /// Monotonicity guard while playing
    fn settle(&mut self, candidate: u64) {
        let duration = self.snapshot.duration_ms;
        let previous = self.snapshot.adjusted_position_ms.min(duration);

        let next = if !self.snapshot.state.is_playing() || candidate >= previous {
            candidate
        } else if self.reported_position_ms == 0 && previous < self.regression_threshold_ms {
            candidate
        } else {
            previous
        };

        self.snapshot.adjusted_position_ms = next.min(duration);
    }

    fn set_reported_state(&mut self, state: PlaybackState, now_ms: u64) {
        self.snapshot.reported_state = state;

        let visible = match self.command {
            CommandState::Pending {
                desired_playing,
                expires_at_ms,
                ..
            } if now_ms < expires_at_ms => {
                if state.satisfies(desired_playing) {
                    tracing::debug!("[Reconciler] Command confirmed by device ('{}')", state);
                    self.command = CommandState::Confirmed {
                        desired_playing,
                        confirmed_at_ms: now_ms,
                    };
                    state
                } else {
                    // Stale report racing our intent, keep showing the intent
                    self.snapshot.state
                }
            }
            CommandState::Pending { .. } => {
                self.command = CommandState::Idle;
                state
            }
            _ => state,
        };

        self.set_visible_state(visible, now_ms);
    }

    /// Change the visible state, re-anchoring the position so extrapolation
    /// neither jumps on resume nor keeps running after a pause.
    fn set_visible_state(&mut self, state: PlaybackState, now_ms: u64) {
        let was_playing = self.snapshot.state.is_playing();
        if state == self.snapshot.state {
            return;
        }

        if was_playing && !state.is_playing() {
            let banked = self.candidate(now_ms, !self.position_fresh || self.timestamp_fresh);
            let banked = banked.max(self.snapshot.adjusted_position_ms.min(self.snapshot.duration_ms));
            self.snapshot.state = state;
            if !self.awaiting_pair {
                self.reported_position_ms = banked;
                self.snapshot.raw_position_ms = banked.min(self.snapshot.duration_ms);
                self.snapshot.adjusted_position_ms = self.snapshot.raw_position_ms;
                self.snapshot.server_timestamp_ms = Some(now_ms);
                self.position_fresh = false;
                self.timestamp_fresh = false;
            }
        } else if !was_playing && state.is_playing() {
            self.snapshot.state = state;
            if !self.awaiting_pair && !self.timestamp_fresh {
                // Position has been standing still, it starts moving from now
                self.reported_position_ms = self.snapshot.adjusted_position_ms;
                self.snapshot.raw_position_ms = self.snapshot.adjusted_position_ms;
                self.snapshot.server_timestamp_ms = Some(now_ms);
                self.position_fresh = false;
            }
        } else {
            self.snapshot.state = state;
        }
    }

    fn finish(&mut self, before: PlaybackSnapshot, now_ms: u64) -> bool {
        if self.snapshot == before {
            return false;
        }
        self.snapshot.revision = before.revision + 1;
        self.snapshot.local_timestamp_ms = now_ms;
        true
    }
}
