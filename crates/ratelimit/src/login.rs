//! Login throttling: a dedicated bucket per client address plus a sliding
//! window of failures per account identifier.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use stockroom_core::{Clock, DomainError, DomainResult};

use crate::config::{Limit, LockoutPolicy};
use crate::store::RateLimiter;
use crate::sweeper::Sweep;

type Stamp = (DateTime<Utc>, u64);

#[derive(Debug, Default)]
struct Failures {
    attempts: VecDeque<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
    /// Position in the eviction index; `None` while locked.
    stamp: Option<Stamp>,
}

/// Failure windows keyed by identifier, with unlocked entries ordered by
/// their latest failure for eviction.
#[derive(Debug, Default)]
struct FailureTable {
    entries: HashMap<String, Failures>,
    unlocked: BTreeMap<Stamp, String>,
    seq: u64,
}

impl FailureTable {
    /// The unlock time of an active lock. An expired lock drops the entry,
    /// since its attempts were cleared when it locked.
    fn active_lock(&mut self, identifier: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let until = self.entries.get(identifier)?.locked_until?;
        if now < until {
            return Some(until);
        }
        self.remove(identifier);
        None
    }

    fn touch(&mut self, identifier: &str, at: DateTime<Utc>) {
        self.seq += 1;
        let stamp = (at, self.seq);
        if let Some(entry) = self.entries.get_mut(identifier) {
            if let Some(old) = entry.stamp.replace(stamp) {
                self.unlocked.remove(&old);
            }
            self.unlocked.insert(stamp, identifier.to_string());
        }
    }

    fn unindex(&mut self, identifier: &str) {
        if let Some(old) = self.entries.get_mut(identifier).and_then(|e| e.stamp.take()) {
            self.unlocked.remove(&old);
        }
    }

    fn remove(&mut self, identifier: &str) {
        if let Some(entry) = self.entries.remove(identifier) {
            if let Some(stamp) = entry.stamp {
                self.unlocked.remove(&stamp);
            }
        }
    }

    /// Make space for one more identifier, evicting the unlocked entry with
    /// the oldest failure. False when every tracked identifier is locked.
    fn make_room(&mut self, cap: usize) -> bool {
        if self.entries.len() < cap.max(1) {
            return true;
        }
        match self.unlocked.pop_first() {
            Some((_, evicted)) => {
                self.entries.remove(&evicted);
                tracing::debug!(identifier = %evicted, "failed-login window evicted");
                true
            }
            None => false,
        }
    }
}

pub struct LoginGuard {
    limiter: Arc<dyn RateLimiter>,
    login_limit: Limit,
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
    failures: Mutex<FailureTable>,
}

impl LoginGuard {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        login_limit: Limit,
        policy: LockoutPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limiter,
            login_limit,
            policy,
            clock,
            failures: Mutex::new(FailureTable::default()),
        }
    }

    fn table(&self) -> MutexGuard<'_, FailureTable> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.policy.window).unwrap_or_else(|_| chrono::Duration::days(3650))
    }

    fn lock_for(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.policy.duration).unwrap_or_else(|_| chrono::Duration::days(3650))
    }

    /// Consume one token from the `login:<ip>` bucket.
    pub fn allow_login(&self, ip: &str) -> DomainResult<()> {
        self.limiter.check(&format!("login:{ip}"), self.login_limit)
    }

    /// Returns the unlock time when this failure triggers (or extends into) a lock.
    pub fn record_failed_login(&self, identifier: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let cutoff = now - self.window();
        let mut table = self.table();

        if let Some(until) = table.active_lock(identifier, now) {
            return Some(until);
        }
        if !table.entries.contains_key(identifier) && !table.make_room(self.policy.max_identifiers) {
            tracing::warn!(identifier, "every tracked identifier is locked; failure not recorded");
            return None;
        }

        let entry = table.entries.entry(identifier.to_string()).or_default();
        entry.attempts.push_back(now);
        while entry.attempts.front().is_some_and(|t| *t <= cutoff) {
            entry.attempts.pop_front();
        }

        if entry.attempts.len() >= self.policy.threshold as usize {
            let until = now + self.lock_for();
            entry.locked_until = Some(until);
            entry.attempts.clear();
            table.unindex(identifier);
            tracing::warn!(identifier, unlock_time = %until, "account locked after failed logins");
            return Some(until);
        }
        table.touch(identifier, now);
        None
    }

    /// Clear the failure window after a successful login. An active lock stays.
    pub fn record_successful_login(&self, identifier: &str) {
        let now = self.clock.now();
        let mut table = self.table();
        if table.active_lock(identifier, now).is_none() {
            table.remove(identifier);
        }
    }

    pub fn is_account_locked(&self, identifier: &str) -> (bool, Option<DateTime<Utc>>) {
        let now = self.clock.now();
        match self.table().active_lock(identifier, now) {
            Some(until) => (true, Some(until)),
            None => (false, None),
        }
    }

    /// `ACCOUNT_LOCKED` while a lock is active.
    pub fn ensure_unlocked(&self, identifier: &str) -> DomainResult<()> {
        match self.is_account_locked(identifier) {
            (true, Some(unlock_time)) => Err(DomainError::AccountLocked { unlock_time }),
            _ => Ok(()),
        }
    }

    /// Drop failures and any lock for `identifier`.
    pub fn reset(&self, identifier: &str) {
        self.table().remove(identifier);
    }

    /// Identifiers with a failure window or lock in memory.
    pub fn tracked_identifiers(&self) -> usize {
        self.table().entries.len()
    }
}

impl Sweep for LoginGuard {
    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now - self.window();
        let mut table = self.table();
        let mut removed = 0;

        // Unlocked entries are ordered by latest failure, so stale ones lead.
        while table.unlocked.first_key_value().is_some_and(|((at, _), _)| *at <= cutoff) {
            if let Some((_, identifier)) = table.unlocked.pop_first() {
                table.entries.remove(&identifier);
                removed += 1;
            }
        }

        let expired: Vec<String> = table
            .entries
            .iter()
            .filter(|(_, f)| f.locked_until.is_some_and(|u| now >= u))
            .map(|(k, _)| k.clone())
            .collect();
        for identifier in &expired {
            table.remove(identifier);
        }
        removed + expired.len()
    }
}
