use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Refill rate and bucket size for one class of keys.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    /// Tokens per second.
    pub rps: f64,
    /// Bucket capacity; also the initial token count.
    pub burst: u32,
}

impl Limit {
    pub fn new(rps: f64, burst: u32) -> Self {
        Self { rps, burst }
    }
}

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Limit applied to general API traffic.
    pub default_limit: Limit,
    /// Tighter limit for login attempts.
    pub login_limit: Limit,
    /// How often the sweeper runs.
    pub cleanup_interval: Duration,
    /// Buckets untouched for longer than this are dropped by the sweeper.
    pub idle_ttl: Duration,
    /// Upper bound on live buckets; least recently used are evicted beyond it.
    pub max_keys: usize,
    /// Number of independently locked shards.
    pub shards: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_limit: Limit::new(20.0, 40),
            login_limit: Limit::new(0.2, 5),
            cleanup_interval: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(600),
            max_keys: 100_000,
            shards: 16,
        }
    }
}

impl RateLimitConfig {
    pub fn with_default_limit(mut self, limit: Limit) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn with_login_limit(mut self, limit: Limit) -> Self {
        self.login_limit = limit;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    pub fn with_max_keys(mut self, max: usize) -> Self {
        self.max_keys = max;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }
}

/// Failed-login lockout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures within `window` that trigger a lock.
    pub threshold: u32,
    pub window: Duration,
    /// How long a triggered lock lasts.
    pub duration: Duration,
    /// Upper bound on tracked identifiers. Locked identifiers are never
    /// evicted to make room.
    pub max_identifiers: usize,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(900),
            duration: Duration::from_secs(900),
            max_identifiers: 100_000,
        }
    }
}

impl LockoutPolicy {
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_max_identifiers(mut self, max: usize) -> Self {
        self.max_identifiers = max;
        self
    }
}
