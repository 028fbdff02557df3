//! Process-wide network backoff gate.
//!
//! After an upstream failure every estimation attempt is suppressed until the
//! cooldown elapses. This is a plain timestamp gate: no half-open probing.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15);

pub struct NetworkBackoff {
    cooldown: Duration,
    tripped_at: Mutex<Option<Instant>>,
}

impl NetworkBackoff {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            tripped_at: Mutex::new(None),
        }
    }

    pub fn trip(&self, reason: &str) {
        warn!(
            "Network failure ({reason}), suppressing refreshes for {:?}",
            self.cooldown
        );
        *self.tripped_at.lock().expect("backoff lock poisoned") = Some(Instant::now());
    }

    /// Time left before refreshes are allowed again, if the gate is closed.
    pub fn remaining(&self) -> Option<Duration> {
        let tripped_at = (*self.tripped_at.lock().expect("backoff lock poisoned"))?;
        self.cooldown
            .checked_sub(tripped_at.elapsed())
            .filter(|left| !left.is_zero())
    }

    pub fn is_active(&self) -> bool {
        self.remaining().is_some()
    }

    pub fn reset(&self) {
        *self.tripped_at.lock().expect("backoff lock poisoned") = None;
    }
}

impl Default for NetworkBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_opens_after_cooldown() {
        let backoff = NetworkBackoff::new(Duration::from_millis(20));
        assert!(!backoff.is_active());

        backoff.trip("connection reset");
        assert!(backoff.is_active());
        assert!(backoff.remaining().unwrap() <= Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!backoff.is_active());
    }

    #[test]
    fn test_reset_clears_gate() {
        let backoff = NetworkBackoff::default();
        backoff.trip("timeout");
        assert!(backoff.is_active());
        backoff.reset();
        assert!(backoff.remaining().is_none());
    }
}
