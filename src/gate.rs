//! Auto-hide timer for the on-screen reader controls.
//!
//! Any pointer movement, key press, or page change shows the controls and
//! arms a single-shot five-second countdown; activity while the countdown
//! runs replaces it rather than stacking another. Expiry hides the controls
//! until the next qualifying event. The gate takes the current instant as an
//! argument so the host loop and the tests share one clock model.

use std::time::{Duration, Instant};

/// How long the controls stay visible after the last qualifying event.
pub const HIDE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

#[derive(Debug)]
pub struct ActivityGate {
    visibility: Visibility,
    hide_at: Option<Instant>,
}

impl ActivityGate {
    /// Controls start visible with the countdown armed.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            visibility: Visibility::Visible,
            hide_at: Some(now + HIDE_DELAY),
        }
    }

    /// A qualifying event: show the controls and restart the countdown.
    pub fn note_activity(&mut self, now: Instant) {
        self.visibility = Visibility::Visible;
        self.hide_at = Some(now + HIDE_DELAY);
    }

    /// Advance the clock. Returns the new visibility iff it changed.
    pub fn tick(&mut self, now: Instant) -> Option<Visibility> {
        match self.hide_at {
            Some(deadline) if self.visibility == Visibility::Visible && now >= deadline => {
                self.visibility = Visibility::Hidden;
                self.hide_at = None;
                Some(Visibility::Hidden)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visibility == Visibility::Visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn activity_just_before_expiry_keeps_controls_visible() {
        let t0 = Instant::now();
        let mut gate = ActivityGate::new(t0);

        assert_eq!(gate.tick(at(t0, 4900)), None);
        gate.note_activity(at(t0, 4900));

        // The replaced countdown now runs from t=4.9s.
        assert_eq!(gate.tick(at(t0, 9800)), None);
        assert!(gate.is_visible());
        assert_eq!(gate.tick(at(t0, 9900)), Some(Visibility::Hidden));
        assert!(!gate.is_visible());
    }

    #[test]
    fn countdown_expires_without_activity() {
        let t0 = Instant::now();
        let mut gate = ActivityGate::new(t0);

        assert_eq!(gate.tick(at(t0, 4999)), None);
        assert_eq!(gate.tick(at(t0, 5000)), Some(Visibility::Hidden));
        // Already hidden: no further transition.
        assert_eq!(gate.tick(at(t0, 6000)), None);
    }

    #[test]
    fn activity_while_hidden_shows_immediately() {
        let t0 = Instant::now();
        let mut gate = ActivityGate::new(t0);
        gate.tick(at(t0, 5000));
        assert!(!gate.is_visible());

        gate.note_activity(at(t0, 8000));
        assert!(gate.is_visible());
        assert_eq!(gate.tick(at(t0, 12999)), None);
        assert_eq!(gate.tick(at(t0, 13000)), Some(Visibility::Hidden));
    }

    #[test]
    fn timer_is_replaced_not_stacked() {
        let t0 = Instant::now();
        let mut gate = ActivityGate::new(t0);

        gate.note_activity(at(t0, 1000));
        gate.note_activity(at(t0, 2000));

        // Only the last countdown counts: hidden at t=7s, not at t=6s.
        assert_eq!(gate.tick(at(t0, 6999)), None);
        assert_eq!(gate.tick(at(t0, 7000)), Some(Visibility::Hidden));
    }
}
