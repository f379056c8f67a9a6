//! Optimistic command coordinator
//!
//! Applies user intent locally first, dispatches the remote call on a worker
//! thread, and folds the outcome back in on the session thread. Nothing here
//! blocks; failures are logged and reverted, never propagated.

use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::api::{NowPlaying, PlaybackApi, SkipDirection};
use crate::config::PlaybackConfig;
use crate::error::ApiError;
use crate::reconciler::Reconciler;
use crate::snapshot::PlaybackState;
use crate::transport::PlaybackField;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    PlayPause { desired_playing: bool },
    Skip(SkipDirection),
    Volume(u8),
}

/// Results coming back from API worker threads
#[derive(Debug)]
pub enum ApiOutcome {
    Command {
        seq: u64,
        kind: CommandKind,
        result: Result<(), ApiError>,
    },
    NowPlaying {
        generation: u64,
        result: Result<NowPlaying, ApiError>,
    },
}

pub struct CommandCoordinator {
    api: Option<Arc<dyn PlaybackApi>>,
    outcomes: Sender<ApiOutcome>,

    command_ttl_ms: u64,
    toggle_refresh_delay_ms: u64,
    skip_refresh_delay_ms: u64,
    poll_interval_ms: u64,

    seq: u64,

    /// Play/pause command whose failure would still revert the UI
    last_play_pause: Option<(u64, PlaybackState)>,

    refresh_at_ms: Option<u64>,
    next_poll_at_ms: Option<u64>,
    refresh_in_flight: bool,

    unauthorized_logged: bool,
}

impl CommandCoordinator {
    pub fn new(config: &PlaybackConfig, api: Option<Arc<dyn PlaybackApi>>, outcomes: Sender<ApiOutcome>) -> Self {
        Self {
            api,
            outcomes,
            command_ttl_ms: config.command_ttl_ms,
            toggle_refresh_delay_ms: config.toggle_refresh_delay_ms,
            skip_refresh_delay_ms: config.skip_refresh_delay_ms,
            poll_interval_ms: config.now_playing_poll_ms,
            seq: 0,
            last_play_pause: None,
            refresh_at_ms: None,
            next_poll_at_ms: None,
            refresh_in_flight: false,
            unauthorized_logged: false,
        }
    }

    pub fn has_api(&self) -> bool {
        self.api.is_some()
    }

    /// Begin periodic now-playing polling (first poll right away)
    pub fn start_polling(&mut self, now_ms: u64) {
        if self.api.is_some() && self.poll_interval_ms > 0 {
            self.next_poll_at_ms = Some(now_ms);
        }
    }

    /// Flip the visible play state and send the matching command
    pub fn toggle_play_pause(&mut self, reconciler: &mut Reconciler, now_ms: u64) -> bool {
        let desired = !reconciler.snapshot().is_playing();
        self.issue_command(reconciler, desired, now_ms);
        desired
    }

    pub fn issue_command(&mut self, reconciler: &mut Reconciler, desired_playing: bool, now_ms: u64) {
        reconciler.freeze(false, now_ms);
        let prior = reconciler.begin_command(desired_playing, now_ms, self.command_ttl_ms);

        let seq = self.next_seq();
        self.last_play_pause = Some((seq, prior));

        tracing::info!(
            "[Coordinator] {} (was {})",
            if desired_playing { "Play" } else { "Pause" },
            prior
        );

        let kind = CommandKind::PlayPause { desired_playing };
        if self.dispatch_command(seq, kind) {
            self.schedule_refresh(now_ms + self.toggle_refresh_delay_ms);
        } else {
            tracing::debug!("[Coordinator] No playback API, intent applied locally until it expires");
        }
    }

    /// Skip a track. Returns true so callers reset visuals.
    pub fn skip(&mut self, reconciler: &mut Reconciler, direction: SkipDirection, now_ms: u64) -> bool {
        reconciler.freeze(true, now_ms);

        let seq = self.next_seq();
        tracing::info!("[Coordinator] Skip {}", direction.as_str());

        if self.dispatch_command(seq, CommandKind::Skip(direction)) {
            self.schedule_refresh(now_ms + self.skip_refresh_delay_ms);
        }
        true
    }

    pub fn set_volume(&mut self, reconciler: &mut Reconciler, volume: u8, now_ms: u64) {
        let volume = volume.min(100);
        reconciler.apply(PlaybackField::Volume(volume as f64), now_ms);

        let seq = self.next_seq();
        self.dispatch_command(seq, CommandKind::Volume(volume));
    }

    /// Fold an API outcome into state. Returns true if the snapshot changed.
    pub fn handle_outcome(&mut self, reconciler: &mut Reconciler, outcome: ApiOutcome, now_ms: u64) -> bool {
        match outcome {
            ApiOutcome::Command { seq, kind, result: Ok(()) } => {
                tracing::debug!("[Coordinator] Command #{} {:?} accepted", seq, kind);
                false
            }
            ApiOutcome::Command { seq, kind, result: Err(e) } => {
                tracing::warn!("[Coordinator] Command #{} {:?} failed: {}", seq, kind, e);

                match (kind, self.last_play_pause) {
                    // Only the latest play/pause may revert, and only while its intent is live
                    (CommandKind::PlayPause { .. }, Some((latest, prior))) if latest == seq => {
                        self.last_play_pause = None;
                        if reconciler.command_state().is_pending() {
                            return reconciler.abort_command(prior, now_ms);
                        }
                        false
                    }
                    _ => false,
                }
            }
            ApiOutcome::NowPlaying { generation, result } => {
                self.refresh_in_flight = false;
                match result {
                    Ok(mut report) => {
                        report.sampled_at_ms.get_or_insert(now_ms);
                        self.unauthorized_logged = false;
                        reconciler.merge_now_playing(&report, generation, now_ms)
                    }
                    Err(ApiError::Unauthorized) => {
                        if !self.unauthorized_logged {
                            tracing::info!("[Coordinator] Playback API not authenticated, skipping now-playing");
                            self.unauthorized_logged = true;
                        }
                        false
                    }
                    Err(e) => {
                        tracing::debug!("[Coordinator] Now-playing refresh failed: {}", e);
                        false
                    }
                }
            }
        }
    }

    /// Drive deadlines: pending-command expiry, scheduled refresh, periodic poll
    pub fn on_tick(&mut self, reconciler: &mut Reconciler, now_ms: u64) -> bool {
        let changed = reconciler.expire_pending(now_ms);

        let refresh_due = self.refresh_at_ms.is_some_and(|at| now_ms >= at);
        let poll_due = !self.refresh_in_flight && self.next_poll_at_ms.is_some_and(|at| now_ms >= at);

        if refresh_due || poll_due {
            self.refresh_at_ms = None;
            self.request_now_playing(reconciler.generation());
            if self.next_poll_at_ms.is_some() {
                self.next_poll_at_ms = Some(now_ms + self.poll_interval_ms);
            }
        }

        changed
    }

    /// Clear every timer. In-flight calls may still report; their results are ignored
    /// once the session stops reading the outcome channel.
    pub fn cancel(&mut self) {
        self.refresh_at_ms = None;
        self.next_poll_at_ms = None;
        self.last_play_pause = None;
    }

    // ============ Private Implementation ============

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn schedule_refresh(&mut self, at_ms: u64) {
        self.refresh_at_ms = Some(match self.refresh_at_ms {
            Some(existing) => existing.max(at_ms),
            None => at_ms,
        });
    }

    fn dispatch_command(&self, seq: u64, kind: CommandKind) -> bool {
        let api = match &self.api {
            Some(api) => api.clone(),
            None => return false,
        };
        let outcomes = self.outcomes.clone();

        std::thread::spawn(move || {
            let result = match kind {
                CommandKind::PlayPause { desired_playing } => api.set_playing(desired_playing),
                CommandKind::Skip(direction) => api.skip(direction),
                CommandKind::Volume(volume) => api.set_volume(volume),
            };
            let _ = outcomes.send(ApiOutcome::Command { seq, kind, result });
        });
        true
    }

    fn request_now_playing(&mut self, generation: u64) {
        let api = match &self.api {
            Some(api) => api.clone(),
            None => return,
        };
        let outcomes = self.outcomes.clone();
        self.refresh_in_flight = true;

        std::thread::spawn(move || {
            let result = api.now_playing().map(|mut report| {
                report.sampled_at_ms = Some(crate::units::now_ms());
                report
            });
            let _ = outcomes.send(ApiOutcome::NowPlaying { generation, result });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records calls; fails play/pause when told to
    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<String>>,
        fail_commands: bool,
        report: Mutex<NowPlaying>,
    }

    impl PlaybackApi for FakeApi {
        fn now_playing(&self) -> Result<NowPlaying, ApiError> {
            self.calls.lock().unwrap().push("now-playing".into());
            Ok(self.report.lock().unwrap().clone())
        }
        fn set_playing(&self, playing: bool) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(format!("play-pause {}", playing));
            if self.fail_commands {
                Err(ApiError::Status(502))
            } else {
                Ok(())
            }
        }
        fn skip(&self, direction: SkipDirection) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(direction.as_str().into());
            Ok(())
        }
        fn set_volume(&self, volume: u8) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(format!("volume {}", volume));
            Ok(())
        }
    }

    const T: u64 = 1_700_000_000_000;

    fn setup(api: Option<Arc<FakeApi>>) -> (CommandCoordinator, Reconciler, Receiver<ApiOutcome>) {
        let config = PlaybackConfig::default();
        let (tx, rx) = crossbeam_channel::unbounded();
        let api = api.map(|a| a as Arc<dyn PlaybackApi>);
        (CommandCoordinator::new(&config, api, tx), Reconciler::new(&config), rx)
    }

    fn paused(reconciler: &mut Reconciler) {
        reconciler.apply(PlaybackField::TrackId("a".into()), T);
        reconciler.apply(PlaybackField::Duration(100_000.0), T);
        reconciler.apply(PlaybackField::State(PlaybackState::Paused), T);
        reconciler.apply(PlaybackField::Position { value: 5000.0, track_id: None }, T);
        reconciler.apply(PlaybackField::Timestamp(T as f64), T);
    }

    #[test]
    fn test_toggle_is_optimistic() {
        let api = Arc::new(FakeApi::default());
        let (mut coordinator, mut reconciler, rx) = setup(Some(api.clone()));
        paused(&mut reconciler);

        assert!(coordinator.toggle_play_pause(&mut reconciler, T + 10));
        assert!(reconciler.snapshot().is_playing());

        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!coordinator.handle_outcome(&mut reconciler, outcome, T + 50));
        assert!(reconciler.snapshot().is_playing());
        assert_eq!(api.calls.lock().unwrap().as_slice(), ["play-pause true"]);
    }

    #[test]
    fn test_failed_command_reverts() {
        let api = Arc::new(FakeApi {
            fail_commands: true,
            ..Default::default()
        });
        let (mut coordinator, mut reconciler, rx) = setup(Some(api));
        paused(&mut reconciler);

        coordinator.toggle_play_pause(&mut reconciler, T + 10);
        assert!(reconciler.snapshot().is_playing());

        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(coordinator.handle_outcome(&mut reconciler, outcome, T + 60));
        assert!(!reconciler.snapshot().is_playing());
        assert!(!reconciler.command_state().is_pending());
    }

    #[test]
    fn test_stale_failure_does_not_revert_newer_intent() {
        let api = Arc::new(FakeApi {
            fail_commands: true,
            ..Default::default()
        });
        let (mut coordinator, mut reconciler, rx) = setup(Some(api));
        paused(&mut reconciler);

        coordinator.toggle_play_pause(&mut reconciler, T + 10);
        coordinator.toggle_play_pause(&mut reconciler, T + 20);
        coordinator.toggle_play_pause(&mut reconciler, T + 30);
        assert!(reconciler.snapshot().is_playing());

        // Collect all three; only the last one may revert
        let mut outcomes: Vec<_> = (0..3).map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap()).collect();
        outcomes.sort_by_key(|o| match o {
            ApiOutcome::Command { seq, .. } => *seq,
            _ => 0,
        });
        let last = outcomes.pop().unwrap();
        for outcome in outcomes {
            assert!(!coordinator.handle_outcome(&mut reconciler, outcome, T + 40));
            assert!(reconciler.snapshot().is_playing());
        }
        coordinator.handle_outcome(&mut reconciler, last, T + 40);
        assert!(!reconciler.snapshot().is_playing());
    }

    #[test]
    fn test_without_api_intent_expires() {
        let (mut coordinator, mut reconciler, _rx) = setup(None);
        paused(&mut reconciler);

        coordinator.toggle_play_pause(&mut reconciler, T);
        assert!(reconciler.snapshot().is_playing());

        assert!(!coordinator.on_tick(&mut reconciler, T + 1000));
        assert!(reconciler.snapshot().is_playing());

        assert!(coordinator.on_tick(&mut reconciler, T + 1500));
        assert!(!reconciler.snapshot().is_playing());
    }

    #[test]
    fn test_skip_freezes_and_schedules_refresh() {
        let api = Arc::new(FakeApi::default());
        *api.report.lock().unwrap() = NowPlaying {
            playing: true,
            progress: Some(800),
            duration: Some(100_000),
            ..Default::default()
        };
        let (mut coordinator, mut reconciler, rx) = setup(Some(api.clone()));
        paused(&mut reconciler);

        assert!(coordinator.skip(&mut reconciler, SkipDirection::Next, T + 100));
        assert_eq!(reconciler.snapshot().adjusted_position_ms, 0);
        assert!(reconciler.snapshot().progress_frozen);

        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        coordinator.handle_outcome(&mut reconciler, outcome, T + 150);

        // Not yet due
        coordinator.on_tick(&mut reconciler, T + 900);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        coordinator.on_tick(&mut reconciler, T + 1100);
        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(outcome, ApiOutcome::NowPlaying { .. }));
        coordinator.handle_outcome(&mut reconciler, outcome, T + 1200);

        assert!(!reconciler.snapshot().progress_frozen);
        assert!(reconciler.snapshot().is_playing());
        assert_eq!(api.calls.lock().unwrap().as_slice(), ["next", "now-playing"]);
    }

    #[test]
    fn test_polling_cadence_and_cancel() {
        let api = Arc::new(FakeApi::default());
        let (mut coordinator, mut reconciler, rx) = setup(Some(api));

        coordinator.start_polling(T);
        coordinator.on_tick(&mut reconciler, T);
        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        coordinator.handle_outcome(&mut reconciler, outcome, T + 10);

        // Next poll is due five seconds after the first
        coordinator.on_tick(&mut reconciler, T + 4000);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        coordinator.cancel();
        coordinator.on_tick(&mut reconciler, T + 10_000);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_unauthorized_refresh_is_quiet() {
        let (mut coordinator, mut reconciler, _rx) = setup(None);
        let outcome = ApiOutcome::NowPlaying {
            generation: 0,
            result: Err(ApiError::Unauthorized),
        };
        assert!(!coordinator.handle_outcome(&mut reconciler, outcome, T));
    }
}
