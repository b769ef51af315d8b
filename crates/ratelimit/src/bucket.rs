use std::time::Duration;

use serde::Serialize;

use crate::config::Limit;

/// Result of [`Bucket::reserve`].
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub ok: bool,
    /// Wait until one token is available. Zero when `ok`.
    pub delay: Duration,
}

/// A single token bucket. Times are monotonic offsets from the clock origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub tokens: f64,
    pub capacity: u32,
    pub refill_rate: f64,
    pub last_refill: Duration,
    pub last_seen: Duration,
}

impl Bucket {
    /// Full bucket.
    pub fn new(limit: Limit, now: Duration) -> Self {
        Self {
            tokens: f64::from(limit.burst),
            capacity: limit.burst,
            refill_rate: limit.rps,
            last_refill: now,
            last_seen: now,
        }
    }

    /// Adopt a changed limit without granting extra tokens.
    pub fn retune(&mut self, limit: Limit) {
        self.capacity = limit.burst;
        self.refill_rate = limit.rps;
        self.tokens = self.tokens.min(f64::from(limit.burst));
    }

    pub fn refill(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + self.refill_rate * elapsed).min(f64::from(self.capacity));
        self.last_refill = self.last_refill.max(now);
        self.last_seen = self.last_seen.max(now);
    }

    pub fn try_take(&mut self, n: u32) -> bool {
        let n = f64::from(n);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Time until one token is available.
    pub fn delay(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_rate).unwrap_or(Duration::MAX)
    }

    pub fn reserve(&mut self) -> Reservation {
        if self.try_take(1) {
            Reservation { ok: true, delay: Duration::ZERO }
        } else {
            Reservation { ok: false, delay: self.delay() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refill_is_capped_at_capacity() {
        let mut b = Bucket::new(Limit::new(10.0, 5), Duration::ZERO);
        assert!(b.try_take(5));
        b.refill(Duration::from_secs(60));
        assert_eq!(b.tokens, 5.0);
    }

    #[test]
    fn delay_is_time_to_next_token() {
        let mut b = Bucket::new(Limit::new(4.0, 1), Duration::ZERO);
        assert!(b.reserve().ok);
        let r = b.reserve();
        assert!(!r.ok);
        assert_eq!(r.delay, Duration::from_millis(250));
        assert_eq!(b.tokens, 0.0);
    }

    #[test]
    fn retune_never_adds_tokens() {
        let mut b = Bucket::new(Limit::new(1.0, 10), Duration::ZERO);
        b.retune(Limit::new(1.0, 3));
        assert_eq!(b.tokens, 3.0);
        b.retune(Limit::new(1.0, 20));
        assert_eq!(b.tokens, 3.0);
    }
}
