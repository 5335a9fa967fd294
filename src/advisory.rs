/// Minimum-interval gate for one kind of user advisory.
///
/// Each advisory (fast rotation, touch announcement) owns its own limiter,
/// timestamps are caller-supplied milliseconds.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval_ms: u64,
    last_fired_ms: Option<u64>,
}

impl RateLimiter {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fired_ms: None,
        }
    }

    /// Returns `true` and records `now_ms` if the interval has passed.
    pub fn try_fire(&mut self, now_ms: u64) -> bool {
        if self.would_fire(now_ms) {
            self.last_fired_ms = Some(now_ms);
            true
        } else {
            false
        }
    }

    #[inline]
    pub fn would_fire(&self, now_ms: u64) -> bool {
        match self.last_fired_ms {
            // clock going backwards counts as elapsed
            Some(last) => now_ms < last || now_ms - last >= self.interval_ms,
            None => true,
        }
    }

    #[inline]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn reset(&mut self) {
        self.last_fired_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_interval() {
        let mut rl = RateLimiter::new(5000);
        assert!(rl.try_fire(1_000));
        assert!(!rl.try_fire(2_000));
        assert!(!rl.try_fire(5_999));
        assert!(rl.try_fire(6_000));
    }

    #[test]
    fn reset_rearms() {
        let mut rl = RateLimiter::new(1800);
        assert!(rl.try_fire(0));
        rl.reset();
        assert!(rl.try_fire(10));
    }
}
