//! Cooldown-gated dispatcher
//!
//! Decides when a stabilized count becomes a command. A held gesture
//! fires once; a different gesture fires only after the cooldown.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::executor::Action;

/// Default minimum time between two dispatched commands
#[cfg(test)]
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3);

/// Dispatch state for one camera session
#[derive(Debug, Clone)]
pub struct Dispatcher {
    cooldown: Duration,
    /// Count of the last dispatched command (0 before the first)
    last_fired_count: u8,
    /// When the last command was dispatched; `None` means never
    last_fired_at: Option<Instant>,
}

impl Dispatcher {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired_count: 0,
            last_fired_at: None,
        }
    }

    #[cfg(test)]
    pub fn last_fired_count(&self) -> u8 {
        self.last_fired_count
    }

    #[cfg(test)]
    pub fn last_fired_at(&self) -> Option<Instant> {
        self.last_fired_at
    }

    /// Feed a stabilized count observed at `at`
    ///
    /// Returns the action to dispatch, if any. State is updated before
    /// the action runs, so the executor's result never affects it.
    pub fn observe(&mut self, count: u8, at: Instant) -> Option<Action> {
        if count == 0 || count == self.last_fired_count {
            return None;
        }

        if let Some(prev) = self.last_fired_at {
            let elapsed = at.saturating_duration_since(prev);
            if elapsed <= self.cooldown {
                debug!(count, ?elapsed, "gesture suppressed by cooldown");
                return None;
            }
        }

        let action = Action::for_finger_count(count)?;

        self.last_fired_count = count;
        self.last_fired_at = Some(at);
        Some(action)
    }
}

#[cfg(test)]
impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(base: Instant, secs: f64) -> Instant {
        base + Duration::from_secs_f64(secs)
    }

    #[test]
    fn test_first_gesture_fires_immediately() {
        let base = Instant::now();
        let mut d = Dispatcher::default();
        assert_eq!(d.observe(1, base), Some(Action::Pull));
        assert_eq!(d.last_fired_count(), 1);
        assert_eq!(d.last_fired_at(), Some(base));
    }

    #[test]
    fn test_zero_never_fires() {
        let base = Instant::now();
        let mut d = Dispatcher::default();
        assert_eq!(d.observe(0, base), None);
        assert_eq!(d.observe(0, at(base, 10.0)), None);
        assert_eq!(d.last_fired_at(), None);
    }

    #[test]
    fn test_cooldown_sequence() {
        let base = Instant::now();
        let mut d = Dispatcher::default();

        let fired: Vec<_> = [(1, 0.0), (1, 0.5), (2, 1.0), (2, 4.2)]
            .into_iter()
            .map(|(count, secs)| d.observe(count, at(base, secs)))
            .collect();

        // 1.0 s is a new count inside the cooldown; by 4.2 s it has elapsed
        assert_eq!(fired, [Some(Action::Pull), None, None, Some(Action::Run)]);
        assert_eq!(d.last_fired_count(), 2);
        assert_eq!(d.last_fired_at(), Some(at(base, 4.2)));
    }

    #[test]
    fn test_repeat_after_cooldown_does_not_fire() {
        let base = Instant::now();
        let mut d = Dispatcher::default();

        assert_eq!(d.observe(1, at(base, 0.0)), Some(Action::Pull));
        assert_eq!(d.observe(1, at(base, 4.2)), None);
        assert_eq!(d.last_fired_at(), Some(base));
    }

    #[test]
    fn test_suppressed_change_fires_after_cooldown() {
        let base = Instant::now();
        let mut d = Dispatcher::default();

        assert_eq!(d.observe(1, at(base, 0.0)), Some(Action::Pull));
        assert_eq!(d.observe(2, at(base, 1.0)), None);
        assert_eq!(d.observe(2, at(base, 4.2)), Some(Action::Run));
        assert_eq!(d.last_fired_count(), 2);
    }

    #[test]
    fn test_cooldown_is_strict() {
        let base = Instant::now();
        let mut d = Dispatcher::default();

        d.observe(3, base);
        assert_eq!(d.observe(4, at(base, 3.0)), None);
        assert_eq!(d.observe(4, at(base, 3.001)), Some(Action::Start));
    }

    #[test]
    fn test_out_of_range_count_does_not_fire() {
        let base = Instant::now();
        let mut d = Dispatcher::default();
        assert_eq!(d.observe(6, base), None);
        assert_eq!(d.last_fired_count(), 0);
    }

    #[test]
    fn test_every_count_maps() {
        let base = Instant::now();
        let mut d = Dispatcher::new(Duration::ZERO);
        let fired: Vec<_> = (1..=5)
            .map(|c| d.observe(c, at(base, c as f64)))
            .collect();
        assert_eq!(
            fired,
            Action::ALL.iter().copied().map(Some).collect::<Vec<_>>()
        );
    }
}
