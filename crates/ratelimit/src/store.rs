use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use stockroom_core::{Clock, DomainError, DomainResult};

use crate::bucket::{Bucket, Reservation};
use crate::config::{Limit, RateLimitConfig};
use crate::sweeper::Sweep;

/// Per-key token-bucket limiter.
///
/// Handlers depend on this trait, not on [`TokenBucketStore`], so tests can
/// substitute a double.
pub trait RateLimiter: Send + Sync {
    fn allow(&self, key: &str, limit: Limit) -> bool;

    /// Take `n` tokens at once. `n` above the burst can never succeed and is
    /// reported as `CAPACITY_EXCEEDED`.
    fn allow_n(&self, key: &str, n: u32, limit: Limit) -> DomainResult<bool>;

    /// Like `allow`, but reports how long to wait when denied.
    fn reserve(&self, key: &str, limit: Limit) -> Reservation;

    fn reset(&self, key: &str);

    /// `RATE_LIMITED` with a retry hint when denied.
    fn check(&self, key: &str, limit: Limit) -> DomainResult<()> {
        let r = self.reserve(key, limit);
        if r.ok {
            Ok(())
        } else {
            Err(DomainError::RateLimited { retry_after: r.delay })
        }
    }
}

/// Recency key: last-seen time, then a per-shard sequence to break ties.
type Stamp = (Duration, u64);

#[derive(Debug)]
struct Slot {
    bucket: Bucket,
    stamp: Stamp,
}

#[derive(Debug, Default)]
struct Shard {
    buckets: HashMap<String, Slot>,
    lru: BTreeMap<Stamp, String>,
    seq: u64,
}

impl Shard {
    /// Find or create the bucket for `key`, refill it, run `f`, and move the
    /// key to the recent end of the LRU index.
    fn access<R>(
        &mut self,
        key: &str,
        limit: Limit,
        now: Duration,
        f: impl FnOnce(&mut Bucket) -> R,
    ) -> R {
        self.seq += 1;
        let slot = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Slot { bucket: Bucket::new(limit, now), stamp: (now, 0) });
        let bucket = &mut slot.bucket;
        if bucket.capacity != limit.burst || bucket.refill_rate != limit.rps {
            bucket.retune(limit);
        }
        bucket.refill(now);
        let out = f(bucket);

        // Sequence 0 is never issued, so a fresh slot has no index entry yet.
        let stamp = (slot.bucket.last_seen, self.seq);
        self.lru.remove(&slot.stamp);
        self.lru.insert(stamp, key.to_string());
        slot.stamp = stamp;
        out
    }

    fn oldest(&self) -> Option<(Stamp, String)> {
        self.lru.first_key_value().map(|(stamp, key)| (*stamp, key.clone()))
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.buckets.remove(key) {
            Some(slot) => {
                self.lru.remove(&slot.stamp);
                true
            }
            None => false,
        }
    }
}

/// Sharded in-memory bucket store.
///
/// `max_keys` bounds the live buckets across all shards. A new key arriving
/// at the cap evicts the least recently used bucket store-wide.
pub struct TokenBucketStore {
    shards: Vec<Mutex<Shard>>,
    max_keys: usize,
    live: AtomicUsize,
    idle_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenBucketStore {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let shards = config.shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            max_keys: config.max_keys.max(1),
            live: AtomicUsize::new(0),
            idle_ttl: config.idle_ttl,
            clock,
        }
    }

    fn shard_index(&self, key: &str) -> usize {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        (h.finish() % self.shards.len() as u64) as usize
    }

    fn lock(&self, idx: usize) -> MutexGuard<'_, Shard> {
        // A poisoned shard only means another thread panicked mid-update of a
        // bucket; the counters are still usable.
        self.shards[idx].lock().unwrap_or_else(|e| e.into_inner())
    }

    fn shard(&self, key: &str) -> MutexGuard<'_, Shard> {
        self.lock(self.shard_index(key))
    }

    fn claim_slot(&self) -> bool {
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.max_keys).then_some(n + 1))
            .is_ok()
    }

    /// Drop the least recently used bucket across all shards.
    ///
    /// Shards are locked one at a time, so the candidate may be touched or
    /// removed before it is evicted; the caller retries in that case.
    fn evict_oldest(&self) {
        let victim = (0..self.shards.len())
            .filter_map(|idx| self.lock(idx).oldest().map(|(stamp, key)| (stamp, idx, key)))
            .min();
        let Some((stamp, idx, key)) = victim else {
            return;
        };
        let mut shard = self.lock(idx);
        if shard.buckets.get(&key).is_some_and(|slot| slot.stamp == stamp) && shard.remove(&key) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(key = %key, "rate-limit bucket evicted");
        }
    }

    /// Find or create the bucket for `key`, refill it, and run `f` on it.
    fn with_bucket<R>(&self, key: &str, limit: Limit, f: impl FnOnce(&mut Bucket) -> R) -> R {
        let now = self.clock.monotonic();
        let idx = self.shard_index(key);
        loop {
            {
                let mut shard = self.lock(idx);
                if shard.buckets.contains_key(key) || self.claim_slot() {
                    return shard.access(key, limit, now, f);
                }
            }
            self.evict_oldest();
        }
    }

    /// Number of live buckets across all shards.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current token count for `key`, without refilling.
    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.shard(key).buckets.get(key).map(|slot| slot.bucket.tokens)
    }
}

impl RateLimiter for TokenBucketStore {
    fn allow(&self, key: &str, limit: Limit) -> bool {
        let allowed = self.with_bucket(key, limit, |b| b.try_take(1));
        if !allowed {
            tracing::debug!(key, "rate limited");
        }
        allowed
    }

    fn allow_n(&self, key: &str, n: u32, limit: Limit) -> DomainResult<bool> {
        if n == 0 {
            return Err(DomainError::invalid("token count must be positive"));
        }
        if n > limit.burst {
            return Err(DomainError::capacity_exceeded(format!(
                "{n} tokens requested, bucket holds {}",
                limit.burst
            )));
        }
        Ok(self.with_bucket(key, limit, |b| b.try_take(n)))
    }

    fn reserve(&self, key: &str, limit: Limit) -> Reservation {
        let r = self.with_bucket(key, limit, |b| b.reserve());
        if !r.ok {
            tracing::debug!(key, retry_after_ms = r.delay.as_millis() as u64, "rate limited");
        }
        r
    }

    fn reset(&self, key: &str) {
        if self.shard(key).remove(key) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Sweep for TokenBucketStore {
    fn sweep(&self) -> usize {
        let now = self.clock.monotonic();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|e| e.into_inner());
            // The LRU index is ordered by last use, so idle buckets sit at the front.
            while let Some((stamp, key)) = shard.oldest() {
                if now.saturating_sub(stamp.0) <= self.idle_ttl {
                    break;
                }
                shard.remove(&key);
                removed += 1;
            }
        }
        self.live.fetch_sub(removed, Ordering::SeqCst);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockroom_core::{ErrorKind, ManualClock};

    fn test_store(clock: Arc<ManualClock>) -> TokenBucketStore {
        TokenBucketStore::new(&RateLimitConfig::default(), clock)
    }

    #[test]
    fn burst_then_refill() {
        let clock = Arc::new(ManualClock::default());
        let store = test_store(clock.clone());
        let limit = Limit::new(10.0, 5);

        for _ in 0..5 {
            assert!(store.allow("client:1.2.3.4", limit));
        }
        assert!(!store.allow("client:1.2.3.4", limit));

        clock.advance(Duration::from_millis(150));
        assert!(store.allow("client:1.2.3.4", limit));
        assert!(!store.allow("client:1.2.3.4", limit));
    }

    #[test]
    fn keys_are_independent() {
        let clock = Arc::new(ManualClock::default());
        let store = test_store(clock);
        let limit = Limit::new(1.0, 1);
        assert!(store.allow("a", limit));
        assert!(!store.allow("a", limit));
        assert!(store.allow("b", limit));
    }

    #[test]
    fn allow_n_and_reset() {
        let clock = Arc::new(ManualClock::default());
        let store = test_store(clock);
        let limit = Limit::new(1.0, 4);

        assert!(store.allow_n("k", 3, limit).unwrap());
        assert!(!store.allow_n("k", 2, limit).unwrap());
        assert_eq!(
            store.allow_n("k", 5, limit).unwrap_err().kind(),
            ErrorKind::CapacityExceeded
        );
        store.reset("k");
        assert!(store.allow_n("k", 4, limit).unwrap());
    }

    #[test]
    fn reserve_reports_delay_and_keeps_tokens() {
        let clock = Arc::new(ManualClock::default());
        let store = test_store(clock);
        let limit = Limit::new(2.0, 1);

        assert!(store.reserve("k", limit).ok);
        let r = store.reserve("k", limit);
        assert!(!r.ok);
        assert_eq!(r.delay, Duration::from_millis(500));
        assert_eq!(store.tokens("k"), Some(0.0));

        let err = store.check("k", limit).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[test]
    fn lru_eviction_beyond_max_keys() {
        let clock = Arc::new(ManualClock::default());
        let cfg = RateLimitConfig::default().with_max_keys(2).with_shards(1);
        let store = TokenBucketStore::new(&cfg, clock.clone());
        let limit = Limit::new(1.0, 1);

        store.allow("old", limit);
        clock.advance(Duration::from_millis(1));
        store.allow("mid", limit);
        clock.advance(Duration::from_millis(1));
        store.allow("new", limit);

        assert_eq!(store.len(), 2);
        assert_eq!(store.tokens("old"), None);
        assert!(store.tokens("mid").is_some());
    }

    #[test]
    fn max_keys_is_global_across_shards() {
        let clock = Arc::new(ManualClock::default());
        let cfg = RateLimitConfig::default().with_max_keys(2);
        assert!(cfg.shards > 2);
        let store = TokenBucketStore::new(&cfg, clock.clone());
        let limit = Limit::new(1.0, 1);

        for i in 0..64 {
            store.allow(&format!("client:{i}"), limit);
            clock.advance(Duration::from_millis(1));
            assert!(store.len() <= 2);
        }

        let live: usize = (0..store.shards.len()).map(|i| store.lock(i).buckets.len()).sum();
        assert_eq!(live, 2);
        assert!(store.tokens("client:63").is_some());
        assert!(store.tokens("client:62").is_some());
        assert_eq!(store.tokens("client:0"), None);
    }

    #[test]
    fn recent_use_protects_a_bucket_from_eviction() {
        let clock = Arc::new(ManualClock::default());
        let cfg = RateLimitConfig::default().with_max_keys(2);
        let store = TokenBucketStore::new(&cfg, clock.clone());
        let limit = Limit::new(1.0, 5);

        store.allow("a", limit);
        clock.advance(Duration::from_millis(1));
        store.allow("b", limit);
        clock.advance(Duration::from_millis(1));
        store.allow("a", limit);
        clock.advance(Duration::from_millis(1));
        store.allow("c", limit);

        assert!(store.tokens("a").is_some());
        assert_eq!(store.tokens("b"), None);
        assert!(store.tokens("c").is_some());
    }

    #[test]
    fn reset_and_sweep_free_capacity() {
        let clock = Arc::new(ManualClock::default());
        let cfg = RateLimitConfig::default()
            .with_max_keys(2)
            .with_idle_ttl(Duration::from_secs(10));
        let store = TokenBucketStore::new(&cfg, clock.clone());
        let limit = Limit::new(1.0, 1);

        store.allow("a", limit);
        store.allow("b", limit);
        store.reset("a");
        assert_eq!(store.len(), 1);
        store.allow("c", limit);
        assert!(store.tokens("b").is_some());

        clock.advance(Duration::from_secs(11));
        assert_eq!(store.sweep(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn sweep_drops_idle_buckets() {
        let clock = Arc::new(ManualClock::default());
        let cfg = RateLimitConfig::default().with_idle_ttl(Duration::from_secs(10));
        let store = TokenBucketStore::new(&cfg, clock.clone());
        let limit = Limit::new(1.0, 1);

        store.allow("idle", limit);
        clock.advance(Duration::from_secs(6));
        store.allow("busy", limit);
        clock.advance(Duration::from_secs(6));

        assert_eq!(store.sweep(), 1);
        assert_eq!(store.tokens("idle"), None);
        assert!(store.tokens("busy").is_some());
    }

    #[test]
    fn concurrent_callers_never_exceed_burst() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(test_store(clock));
        let limit = Limit::new(1.0, 50);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || (0..20).filter(|_| store.allow("shared", limit)).count())
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 50);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn accepted_never_exceeds_burst_plus_refill(
            rps in 1u32..50,
            burst in 1u32..20,
            steps in proptest::collection::vec((0u64..300, 0usize..10), 1..60),
        ) {
            let clock = Arc::new(ManualClock::default());
            let store = test_store(clock.clone());
            let limit = Limit::new(f64::from(rps), burst);

            let mut accepted_at: Vec<Duration> = Vec::new();
            for (advance_ms, calls) in steps {
                clock.advance(Duration::from_millis(advance_ms));
                for _ in 0..calls {
                    if store.allow("k", limit) {
                        accepted_at.push(clock.monotonic());
                    }
                }
            }

            for i in 0..accepted_at.len() {
                for j in i..accepted_at.len() {
                    let window = (accepted_at[j] - accepted_at[i]).as_secs_f64();
                    let count = (j - i + 1) as f64;
                    prop_assert!(count <= f64::from(burst) + f64::from(rps) * window + 1e-6);
                }
            }
        }
    }
}
