use crate::snapshot::PlaybackSnapshot;

/// Local interpolation clock
///
/// Advances the displayed position between authoritative updates so progress
/// moves smoothly. Re-anchored from every published snapshot that moves the
/// position; metadata-only revisions leave a running clock alone.
#[derive(Clone, Debug, Default)]
pub struct InterpolationClock {
    anchor_position_ms: u64,
    anchor_at_ms: u64,
    duration_ms: u64,
    running: bool,

    track_id: String,
    last_adjusted_ms: u64,
    revision: Option<u64>,

    position_ms: u64,
}

impl InterpolationClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Re-anchor from a snapshot. Returns true if the anchor moved.
    pub fn sync(&mut self, snapshot: &PlaybackSnapshot, now_ms: u64) -> bool {
        if self.revision == Some(snapshot.revision) {
            return false;
        }
        self.revision = Some(snapshot.revision);

        let should_run = snapshot.is_playing() && !snapshot.progress_frozen && snapshot.duration_ms > 0;
        let undisturbed = self.running
            && should_run
            && snapshot.track_id == self.track_id
            && snapshot.adjusted_position_ms == self.last_adjusted_ms
            && snapshot.duration_ms == self.duration_ms;

        self.last_adjusted_ms = snapshot.adjusted_position_ms;
        if undisturbed {
            return false;
        }

        self.track_id = snapshot.track_id.clone();
        self.duration_ms = snapshot.duration_ms;
        self.anchor_position_ms = snapshot.adjusted_position_ms.min(snapshot.duration_ms);
        self.anchor_at_ms = snapshot.local_timestamp_ms.min(now_ms);
        self.running = should_run;
        self.position_ms = self.project(now_ms);
        true
    }

    /// Advance to `now_ms` and return the displayed position
    pub fn tick(&mut self, now_ms: u64) -> u64 {
        self.position_ms = self.project(now_ms);
        self.position_ms
    }

    /// Stop advancing, keep the displayed position
    pub fn halt(&mut self) {
        self.running = false;
        self.anchor_position_ms = self.position_ms;
    }

    fn project(&self, now_ms: u64) -> u64 {
        if !self.running {
            return self.anchor_position_ms;
        }
        let elapsed = now_ms.saturating_sub(self.anchor_at_ms);
        self.anchor_position_ms.saturating_add(elapsed).min(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::PlaybackState;

    fn playing(position: u64, at: u64, revision: u64) -> PlaybackSnapshot {
        PlaybackSnapshot {
            track_id: "a".into(),
            duration_ms: 10_000,
            state: PlaybackState::Playing,
            adjusted_position_ms: position,
            local_timestamp_ms: at,
            revision,
            ..Default::default()
        }
    }

    #[test]
    fn test_advances_while_playing() {
        let mut clock = InterpolationClock::new();
        clock.sync(&playing(1000, 0, 1), 0);
        assert_eq!(clock.tick(100), 1100);
        assert_eq!(clock.tick(500), 1500);
    }

    #[test]
    fn test_clamped_to_duration() {
        let mut clock = InterpolationClock::new();
        clock.sync(&playing(9_950, 0, 1), 0);
        assert_eq!(clock.tick(1000), 10_000);
    }

    #[test]
    fn test_does_not_advance_when_paused_or_frozen() {
        let mut clock = InterpolationClock::new();
        let mut snap = playing(1000, 0, 1);
        snap.state = PlaybackState::Paused;
        clock.sync(&snap, 0);
        assert_eq!(clock.tick(5000), 1000);

        let mut snap = playing(1000, 0, 2);
        snap.progress_frozen = true;
        clock.sync(&snap, 0);
        assert_eq!(clock.tick(5000), 1000);
    }

    #[test]
    fn test_unknown_duration_stays_at_zero() {
        let mut clock = InterpolationClock::new();
        let mut snap = playing(0, 0, 1);
        snap.duration_ms = 0;
        clock.sync(&snap, 0);
        assert_eq!(clock.tick(3000), 0);
    }

    #[test]
    fn test_metadata_revision_does_not_rewind() {
        let mut clock = InterpolationClock::new();
        clock.sync(&playing(1000, 0, 1), 0);
        assert_eq!(clock.tick(800), 1800);

        // Volume changed at 800, position untouched
        let mut snap = playing(1000, 800, 2);
        snap.volume = 30;
        assert!(!clock.sync(&snap, 800));
        assert_eq!(clock.tick(900), 1900);
    }

    #[test]
    fn test_resync_on_new_position() {
        let mut clock = InterpolationClock::new();
        clock.sync(&playing(1000, 0, 1), 0);
        clock.tick(500);

        assert!(clock.sync(&playing(2000, 600, 2), 600));
        assert_eq!(clock.tick(700), 2100);
    }

    #[test]
    fn test_same_revision_is_ignored() {
        let mut clock = InterpolationClock::new();
        let snap = playing(1000, 0, 1);
        assert!(clock.sync(&snap, 0));
        assert!(!clock.sync(&snap, 300));
    }

    #[test]
    fn test_halt_keeps_position() {
        let mut clock = InterpolationClock::new();
        clock.sync(&playing(1000, 0, 1), 0);
        clock.tick(400);
        clock.halt();
        assert_eq!(clock.tick(5000), 1400);
        assert!(!clock.is_running());
    }
}
