//! Opaque timer handles polled once per tick (§9 REDESIGN FLAGS: "model
//! timers as opaque handles returned by a single Timer service").

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

pub struct Timer {
    deadline: Instant,
}

impl Timer {
    pub fn arm(now: Instant, duration: Duration) -> Self {
        Self { deadline: now + duration }
    }

    pub fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    pub fn force_expire(&mut self, now: Instant) {
        self.deadline = now;
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_not_expired_before_deadline() {
        let now = Instant::now();
        let t = Timer::arm(now, Duration::from_secs(10));
        assert!(!t.expired(now));
    }

    #[test]
    fn force_expire_fires_immediately() {
        let now = Instant::now();
        let mut t = Timer::arm(now, Duration::from_secs(10));
        t.force_expire(now);
        assert!(t.expired(now));
    }
}
