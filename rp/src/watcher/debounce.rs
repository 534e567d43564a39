//! Debounce state machine
//!
//! Pure and clock-free: callers pass the current instant in, so tests drive
//! it with constructed instants instead of sleeping.

use std::time::Duration;

use tokio::time::Instant;

/// Coalesces bursts of notifications into one fire after a quiet period
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
    pending: usize,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            pending: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Note one notification; pushes the deadline out to `now + window`
    pub fn record(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
        self.pending += 1;
    }

    /// When the next fire is due, if anything is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Notifications absorbed since the last fire
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Fire if the quiet period has elapsed; resets to idle when it does
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.pending = 0;
                true
            }
            _ => false,
        }
    }

    /// Drop anything pending without firing
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(400);

    #[test]
    fn test_idle_never_fires() {
        let mut d = Debouncer::new(WINDOW);
        let now = Instant::now();
        assert!(!d.is_pending());
        assert!(!d.poll(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_burst_fires_once() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        for i in 0..10 {
            d.record(t0 + Duration::from_millis(i * 50));
        }
        assert_eq!(d.pending(), 10);

        // 399ms after the last notification: still quiet period
        let last = t0 + Duration::from_millis(450);
        assert!(!d.poll(last + Duration::from_millis(399)));
        assert!(d.poll(last + WINDOW));
        assert!(!d.poll(last + WINDOW * 2));
        assert_eq!(d.pending(), 0);
    }

    #[test]
    fn test_each_notification_resets_window() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.record(t0);
        d.record(t0 + Duration::from_millis(300));
        assert!(!d.poll(t0 + WINDOW));
        assert_eq!(d.deadline(), Some(t0 + Duration::from_millis(700)));
    }

    #[test]
    fn test_cancel_clears_pending() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.record(t0);
        d.cancel();
        assert!(!d.poll(t0 + WINDOW));
        assert!(d.deadline().is_none());
    }

    #[test]
    fn test_record_after_fire_starts_new_window() {
        let mut d = Debouncer::new(WINDOW);
        let t0 = Instant::now();
        d.record(t0);
        assert!(d.poll(t0 + WINDOW));
        d.record(t0 + Duration::from_secs(1));
        assert!(d.poll(t0 + Duration::from_secs(1) + WINDOW));
    }
}
