use std::time::Duration;

use tokio::time::Instant;

/// Debounce period following a context switch.
///
/// Once begun it runs to its original deadline: a second `begin` while
/// active is refused rather than extending it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelayWindow {
    ends_at: Option<Instant>,
}

impl DelayWindow {
    /// Starts a window of `duration` from `now`. Returns false, leaving the
    /// current deadline untouched, when a window is already active.
    pub fn begin(&mut self, now: Instant, duration: Duration) -> bool {
        if self.is_active(now) {
            return false;
        }
        self.ends_at = Some(now + duration);
        true
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.ends_at.is_some_and(|ends_at| now < ends_at)
    }

    pub fn ends_at(&self) -> Option<Instant> {
        self.ends_at
    }

    pub fn clear(&mut self) {
        self.ends_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_does_not_extend() {
        let t0 = Instant::now();
        let mut window = DelayWindow::default();

        assert!(window.begin(t0, Duration::from_secs(3)));
        assert!(!window.begin(t0 + Duration::from_millis(1500), Duration::from_secs(3)));
        assert_eq!(window.ends_at(), Some(t0 + Duration::from_secs(3)));
    }

    #[test]
    fn expires_exactly_at_deadline() {
        let t0 = Instant::now();
        let mut window = DelayWindow::default();
        window.begin(t0, Duration::from_secs(3));

        assert!(window.is_active(t0 + Duration::from_millis(2999)));
        assert!(!window.is_active(t0 + Duration::from_secs(3)));

        // A lapsed window can be restarted without clearing first.
        assert!(window.begin(t0 + Duration::from_secs(4), Duration::from_secs(3)));
        assert_eq!(window.ends_at(), Some(t0 + Duration::from_secs(7)));
    }

    #[test]
    fn clear_deactivates() {
        let t0 = Instant::now();
        let mut window = DelayWindow::default();
        window.begin(t0, Duration::from_secs(3));
        window.clear();
        assert!(!window.is_active(t0));
        assert_eq!(window.ends_at(), None);
    }
}
