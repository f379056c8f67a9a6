//! Color transition engine
//!
//! Animates the gradient between artwork colors. Time is injected: callers
//! pass `now_ms` and call `tick` once per render frame. The reset hold is a
//! deadline owned by the engine, so `cancel` is all teardown needs.

use crate::color::{gradient_for, interpolate_stops, GradientStops, Rgb, DEFAULT_GRADIENT};
use crate::config::ColorConfig;

#[derive(Clone, Debug)]
struct Transition {
    from: GradientStops,
    to: GradientStops,
    target: Option<Rgb>,
    started_at_ms: u64,
    duration_ms: u64,
}

impl Transition {
    fn progress(&self, now_ms: u64) -> f32 {
        if self.duration_ms == 0 {
            return 1.0;
        }
        (now_ms.saturating_sub(self.started_at_ms) as f32 / self.duration_ms as f32).clamp(0.0, 1.0)
    }
}

pub struct ColorTransitionEngine {
    config: ColorConfig,

    /// Stops as of the last tick
    stops: GradientStops,

    /// Color the settled gradient was built from (`None` = neutral)
    active: Option<Rgb>,

    transition: Option<Transition>,

    /// While set, new colors are remembered but not shown
    hold_until_ms: Option<u64>,

    /// Most recent artwork color, applied when a hold ends
    latest: Option<Rgb>,
}

impl ColorTransitionEngine {
    pub fn new(config: ColorConfig) -> Self {
        Self {
            config,
            stops: DEFAULT_GRADIENT,
            active: None,
            transition: None,
            hold_until_ms: None,
            latest: None,
        }
    }

    pub fn stops(&self) -> &GradientStops {
        &self.stops
    }

    pub fn active_color(&self) -> Option<Rgb> {
        self.active
    }

    pub fn is_animating(&self) -> bool {
        self.transition.is_some()
    }

    pub fn is_holding(&self) -> bool {
        self.hold_until_ms.is_some()
    }

    /// New artwork color. `None` means the artwork was cleared.
    pub fn on_artwork_color(&mut self, color: Option<Rgb>, now_ms: u64) {
        self.latest = color;

        if self.is_holding() {
            tracing::debug!("[Gradient] Holding after reset, deferring {:?}", color);
            return;
        }

        let duration = match color {
            Some(_) => self.config.transition_ms,
            None => self.config.clear_transition_ms,
        };
        self.transition_to(color, duration, now_ms);
    }

    /// Artwork could not be turned into a color: snap to neutral
    pub fn on_extraction_failed(&mut self, now_ms: u64) {
        self.latest = None;
        if !self.is_holding() {
            self.transition_to(None, 0, now_ms);
        }
    }

    /// Blend to neutral, then hold and ignore colors until the hold expires
    pub fn reset(&mut self, now_ms: u64) {
        self.hold_until_ms = Some(now_ms.saturating_add(self.config.reset_hold_ms));
        self.transition_to(None, self.config.reset_blend_ms, now_ms);
    }

    /// Advance animations and deadlines. Call once per render frame.
    pub fn tick(&mut self, now_ms: u64) -> GradientStops {
        if let Some(until) = self.hold_until_ms {
            if now_ms >= until {
                self.hold_until_ms = None;
                if let Some(color) = self.latest {
                    tracing::debug!("[Gradient] Hold over, resuming with {}", color.to_hex());
                    self.transition_to(Some(color), self.config.resume_transition_ms, now_ms);
                }
            }
        }

        if let Some(transition) = &self.transition {
            let progress = transition.progress(now_ms);
            if progress >= 1.0 {
                self.stops = transition.to;
                self.active = transition.target;
                self.transition = None;
            } else {
                self.stops = interpolate_stops(&transition.from, &transition.to, progress);
            }
        }

        self.stops
    }

    /// Drop the running animation and the hold deadline, keep what is on screen
    pub fn cancel(&mut self) {
        self.transition = None;
        self.hold_until_ms = None;
    }

    // ============ Private Implementation ============

    fn transition_to(&mut self, target: Option<Rgb>, duration_ms: u64, now_ms: u64) {
        if target.is_some() && target == self.active && self.transition.is_none() {
            return;
        }

        // Start from whatever is visible right now
        let from = match &self.transition {
            Some(t) => interpolate_stops(&t.from, &t.to, t.progress(now_ms)),
            None => self.stops,
        };
        let to = gradient_for(target);

        if duration_ms == 0 {
            self.stops = to;
            self.active = target;
            self.transition = None;
            return;
        }

        self.stops = from;
        self.transition = Some(Transition {
            from,
            to,
            target,
            started_at_ms: now_ms,
            duration_ms,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb = Rgb::from_rgb(200, 30, 30);
    const BLUE: Rgb = Rgb::from_rgb(30, 60, 200);

    fn engine() -> ColorTransitionEngine {
        ColorTransitionEngine::new(ColorConfig::default())
    }

    #[test]
    fn test_starts_neutral() {
        let mut e = engine();
        assert_eq!(e.tick(0), DEFAULT_GRADIENT);
        assert!(!e.is_animating());
    }

    #[test]
    fn test_color_transition_takes_400ms() {
        let mut e = engine();
        e.on_artwork_color(Some(RED), 1000);

        assert_eq!(e.tick(1000), DEFAULT_GRADIENT);
        let mid = e.tick(1200);
        assert_ne!(mid, DEFAULT_GRADIENT);
        assert_ne!(mid, gradient_for(Some(RED)));
        assert_eq!(e.tick(1400), gradient_for(Some(RED)));
        assert_eq!(e.active_color(), Some(RED));
        assert!(!e.is_animating());
    }

    #[test]
    fn test_same_color_does_not_restart() {
        let mut e = engine();
        e.on_artwork_color(Some(RED), 0);
        e.tick(400);

        e.on_artwork_color(Some(RED), 500);
        assert!(!e.is_animating());
    }

    #[test]
    fn test_cleared_artwork_fades_in_200ms() {
        let mut e = engine();
        e.on_artwork_color(Some(RED), 0);
        e.tick(400);

        e.on_artwork_color(None, 1000);
        assert!(e.is_animating());
        assert_eq!(e.tick(1200), DEFAULT_GRADIENT);
    }

    #[test]
    fn test_extraction_failure_is_immediate() {
        let mut e = engine();
        e.on_artwork_color(Some(RED), 0);
        e.tick(400);

        e.on_extraction_failed(500);
        assert_eq!(e.tick(500), DEFAULT_GRADIENT);
    }

    #[test]
    fn test_reset_holds_then_resumes_latest() {
        let mut e = engine();
        e.on_artwork_color(Some(RED), 0);
        e.tick(400);

        e.reset(1000);
        assert_eq!(e.tick(1350), DEFAULT_GRADIENT);

        // Colors during the hold are remembered but not shown
        e.on_artwork_color(Some(BLUE), 1500);
        e.on_artwork_color(Some(RED), 2000);
        e.on_artwork_color(Some(BLUE), 2500);
        assert_eq!(e.tick(3999), DEFAULT_GRADIENT);
        assert!(e.is_holding());

        // Hold ends at 4000, then a 600ms blend into the latest color
        e.tick(4000);
        assert!(!e.is_holding());
        assert!(e.is_animating());
        assert_ne!(e.tick(4300), gradient_for(Some(BLUE)));
        assert_eq!(e.tick(4600), gradient_for(Some(BLUE)));
    }

    #[test]
    fn test_reset_without_new_color_stays_neutral() {
        let mut e = engine();
        e.on_artwork_color(Some(RED), 0);
        e.tick(400);
        e.on_artwork_color(None, 500);
        e.tick(700);

        e.reset(1000);
        e.tick(4000);
        assert_eq!(e.tick(5000), DEFAULT_GRADIENT);
    }

    #[test]
    fn test_transition_restarts_from_visible_stops() {
        let mut e = engine();
        e.on_artwork_color(Some(RED), 0);
        let halfway = e.tick(200);

        e.on_artwork_color(Some(BLUE), 200);
        assert_eq!(e.tick(200), halfway);
        assert_eq!(e.tick(600), gradient_for(Some(BLUE)));
    }

    #[test]
    fn test_cancel_drops_hold_and_animation() {
        let mut e = engine();
        e.on_artwork_color(Some(RED), 0);
        e.tick(400);
        e.reset(1000);
        e.on_artwork_color(Some(BLUE), 1500);

        e.cancel();
        assert!(!e.is_holding());
        assert!(!e.is_animating());

        // Nothing fires later
        let frozen = e.tick(10_000);
        assert_eq!(e.tick(20_000), frozen);
    }
}
