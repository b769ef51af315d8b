//! Transaction runner: one unit of work with bounded retry and cancellation.
//!
//! ## Execution Flow
//!
//! 1. `begin()` a [`StockTx`] (raced against cancellation and the deadline)
//! 2. Run the body against it (raced the same way)
//! 3. On success, `commit()`; commit itself is never interrupted
//! 4. On any error, `rollback()`
//! 5. If the error is `CONFLICT` and retries remain, back off and replay from 1
//!
//! The body is replayed from scratch on every attempt, so it must re-read all
//! state it depends on. Nothing from a failed attempt is ever visible.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use stockroom_core::{DomainError, DomainResult};

use crate::store::{Persistence, StockTx};

/// Retry and deadline settings for [`run_in_transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Replays after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Deadline for the whole operation, retries included.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
            timeout: Some(Duration::from_millis(5000)),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Delay before retry number `retry` (1-based): base · 2^(retry-1), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Await `fut` unless the token fires or the deadline passes first.
async fn guarded<T>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    fut: impl Future<Output = DomainResult<T>>,
) -> DomainResult<T> {
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DomainError::cancelled("operation cancelled")),
        _ = expired => Err(DomainError::cancelled("operation deadline exceeded")),
        out = fut => out,
    }
}

async fn attempt<T, F>(
    persistence: &dyn Persistence,
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    body: &mut F,
) -> DomainResult<T>
where
    F: for<'t> FnMut(&'t mut dyn StockTx) -> BoxFuture<'t, DomainResult<T>> + Send,
    T: Send,
{
    let mut tx = guarded(cancel, deadline, persistence.begin()).await?;
    let outcome = guarded(cancel, deadline, body(tx.as_mut())).await;
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rb) = tx.rollback().await {
                warn!(error = %rb, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Run `body` inside one transaction, replaying it on `CONFLICT`.
///
/// Returns `CANCELLED` if `cancel` fires (or the policy deadline passes) before
/// commit is issued. Once commit is issued it runs to completion.
pub async fn run_in_transaction<T, F>(
    persistence: &dyn Persistence,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    mut body: F,
) -> DomainResult<T>
where
    F: for<'t> FnMut(&'t mut dyn StockTx) -> BoxFuture<'t, DomainResult<T>> + Send,
    T: Send,
{
    let deadline = retry.timeout.map(|t| Instant::now() + t);
    let mut retries = 0;
    loop {
        match attempt(persistence, cancel, deadline, &mut body).await {
            Err(err) if err.kind().is_retryable() && retries < retry.max_retries => {
                retries += 1;
                let delay = retry.backoff(retries);
                warn!(
                    retry = retries,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "transaction conflict, replaying"
                );
                guarded(cancel, deadline, async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }
            Err(err) => {
                debug!(error = %err, retries, "transaction failed");
                return Err(err);
            }
            Ok(value) => return Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use stockroom_core::{ErrorKind, UserId, WarehouseId};
    use stockroom_inventory::{Address, NewWarehouse, Warehouse};

    use crate::store::{InMemoryPersistence, WarehouseRepository};

    fn test_policy() -> RetryPolicy {
        RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(2))
    }

    fn test_warehouse(code: &str) -> Warehouse {
        Warehouse::create(
            WarehouseId::new(),
            NewWarehouse {
                code: code.to_string(),
                name: "Main".to_string(),
                address: Address {
                    line1: "1 Dock Road".to_string(),
                    line2: None,
                    city: "Leeds".to_string(),
                    state: None,
                    postal_code: "LS1 4AP".to_string(),
                    country: "GB".to_string(),
                },
                manager_id: None::<UserId>,
                phone: None,
                email: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    async fn insert(store: &InMemoryPersistence, policy: &RetryPolicy, wh: Warehouse) -> DomainResult<()> {
        run_in_transaction(store, policy, &CancellationToken::new(), move |tx| {
            let wh = wh.clone();
            Box::pin(async move { tx.create_warehouse(&wh).await })
        })
        .await
    }

    async fn count(store: &InMemoryPersistence) -> u64 {
        run_in_transaction(store, &test_policy(), &CancellationToken::new(), |tx| {
            Box::pin(async move { tx.count_warehouses(&Default::default()).await })
        })
        .await
        .unwrap()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_millis(10));
        assert_eq!(p.backoff(2), Duration::from_millis(20));
        assert_eq!(p.backoff(5), Duration::from_millis(160));
        assert_eq!(p.backoff(6), Duration::from_millis(200));
        assert_eq!(p.backoff(40), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn conflicts_are_replayed_until_commit() {
        let store = InMemoryPersistence::new();
        store.inject_conflicts(2);
        insert(&store, &test_policy(), test_warehouse("WH-01")).await.unwrap();
        assert_eq!(count(&store).await, 1);
        assert_eq!(store.begin_count(), 4);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_conflict() {
        let store = InMemoryPersistence::new();
        store.inject_conflicts(10);
        let err = insert(&store, &test_policy().with_max_retries(2), test_warehouse("WH-01"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.begin_count(), 3);
        store.inject_conflicts(0);
        assert_eq!(count(&store).await, 0);
    }

    #[tokio::test]
    async fn body_errors_roll_back_without_retry() {
        let store = InMemoryPersistence::new();
        let err = run_in_transaction(&store, &test_policy(), &CancellationToken::new(), |tx| {
            Box::pin(async move {
                tx.create_warehouse(&test_warehouse("WH-01")).await?;
                Err::<(), _>(DomainError::invalid_state("refused"))
            })
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(store.begin_count(), 1);
        assert_eq!(count(&store).await, 0);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_work() {
        let store = Arc::new(InMemoryPersistence::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let wh = test_warehouse("WH-01");
        let err = run_in_transaction(store.as_ref(), &test_policy(), &cancel, move |tx| {
            let wh = wh.clone();
            Box::pin(async move { tx.create_warehouse(&wh).await })
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(count(&store).await, 0);
    }

    #[tokio::test]
    async fn deadline_rolls_back_a_slow_body() {
        let store = InMemoryPersistence::new();
        let policy = test_policy().with_timeout(Some(Duration::from_millis(20)));
        let err = run_in_transaction(&store, &policy, &CancellationToken::new(), |tx| {
            Box::pin(async move {
                tx.create_warehouse(&test_warehouse("WH-01")).await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(count(&store).await, 0);
    }
}
