//! Inventory service.
//!
//! Every public operation follows the same shape:
//!
//! 1. Validate the input (bounds, enum membership, sort columns, pagination).
//!    Nothing touches persistence until this passes.
//! 2. Run one unit of work through [`run_in_transaction`], re-reading every
//!    row it depends on, so a replay after `CONFLICT` is always safe.
//!
//! Multi-row writes (transfers) lock rows in ascending
//! `(product_id, warehouse_id)` order before mutating them.

mod reports;
mod stock;
mod warehouses;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use stockroom_core::{
    Clock, Cost, DomainError, DomainResult, IdGenerator, InventoryId, ProductId, SystemClock,
    TransactionId, UserId, UuidV7Generator, WarehouseId,
};
use stockroom_inventory::{Inventory, InventoryTransaction, NewTransaction, Warehouse};

use crate::store::{
    InventoryRepository, Persistence, StockTx, TransactionRepository, WarehouseRepository,
};
use crate::tx::{RetryPolicy, run_in_transaction};

pub use reports::{Availability, ExpiringBatch, Valuation};
pub use stock::{
    AdjustStock, BulkAdjustItem, BulkAdjustResult, BulkOutcome, CycleCount, CycleCountOutcome,
    Movement, Reconcile, ReconcileOutcome, ReserveStock, StockMovement, TransferOutcome,
    TransferStock,
};
pub use warehouses::{Utilization, WarehouseDetails};

/// Service-level settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upper bound on free-text reasons.
    pub max_reason_len: usize,
    pub retry: RetryPolicy,
    /// Default window for [`InventoryService::expiring_batches`].
    pub near_expiry_days: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_reason_len: 500,
            retry: RetryPolicy::default(),
            near_expiry_days: stockroom_inventory::NEAR_EXPIRY_DAYS,
        }
    }
}

impl ServiceConfig {
    pub fn with_max_reason_len(mut self, max: usize) -> Self {
        self.max_reason_len = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_near_expiry_days(mut self, days: i64) -> Self {
        self.near_expiry_days = days;
        self
    }
}

/// What a transaction body needs besides the open transaction. Cheap to clone
/// into each attempt.
#[derive(Clone)]
pub(crate) struct OpContext {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: ServiceConfig,
}

impl OpContext {
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn inventory_id(&self) -> InventoryId {
        InventoryId::from_uuid(self.ids.next_uuid())
    }

    pub(crate) fn uuid(&self) -> uuid::Uuid {
        self.ids.next_uuid()
    }

    /// Validate and stamp a ledger row.
    pub(crate) fn transaction(
        &self,
        new: NewTransaction,
        now: DateTime<Utc>,
    ) -> DomainResult<InventoryTransaction> {
        InventoryTransaction::create(
            TransactionId::from_uuid(self.ids.next_uuid()),
            new,
            now,
            self.config.max_reason_len,
        )
    }

    /// An operator-applied row: written already approved by its creator.
    pub(crate) fn applied_transaction(
        &self,
        new: NewTransaction,
        now: DateTime<Utc>,
    ) -> DomainResult<InventoryTransaction> {
        let by = new.created_by;
        let mut record = self.transaction(new, now)?;
        if record.requires_approval() {
            record.approve(by, now)?;
        }
        Ok(record)
    }
}

#[derive(Clone)]
pub struct InventoryService {
    persistence: Arc<dyn Persistence>,
    ctx: OpContext,
}

impl InventoryService {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            persistence,
            ctx: OpContext { clock, ids, config },
        }
    }

    /// System clock, UUIDv7 ids, default config.
    pub fn with_defaults(persistence: Arc<dyn Persistence>) -> Self {
        Self::new(
            persistence,
            Arc::new(SystemClock::new()),
            Arc::new(UuidV7Generator),
            ServiceConfig::default(),
        )
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.ctx.config
    }

    fn run<'a, T, F>(
        &'a self,
        cancel: &'a CancellationToken,
        body: F,
    ) -> impl Future<Output = DomainResult<T>> + Send + 'a
    where
        F: for<'t> FnMut(&'t mut dyn StockTx) -> BoxFuture<'t, DomainResult<T>> + Send + 'a,
        T: Send + 'a,
    {
        run_in_transaction(self.persistence.as_ref(), &self.ctx.config.retry, cancel, body)
    }
}

pub(crate) async fn ensure_warehouse(
    tx: &mut dyn StockTx,
    id: WarehouseId,
) -> DomainResult<Warehouse> {
    tx.get_warehouse(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))
}

/// Fetch the row for (product, warehouse), creating a zero row when absent and
/// reopening a tombstoned one.
pub(crate) async fn ensure_inventory(
    tx: &mut dyn StockTx,
    ctx: &OpContext,
    product: ProductId,
    warehouse: WarehouseId,
    now: DateTime<Utc>,
) -> DomainResult<Inventory> {
    match tx.find_inventory(product, warehouse).await? {
        Some(mut inv) if inv.is_deleted() => {
            inv.reopen(now);
            tx.update_inventory(&inv).await?;
            Ok(inv)
        }
        Some(inv) => Ok(inv),
        None => {
            ensure_warehouse(tx, warehouse).await?;
            let inv = Inventory::new(ctx.inventory_id(), product, warehouse, now);
            tx.create_inventory(&inv).await?;
            Ok(inv)
        }
    }
}

/// Live row by id; tombstones count as absent.
pub(crate) async fn live_inventory(
    tx: &mut dyn StockTx,
    id: InventoryId,
) -> DomainResult<Inventory> {
    tx.get_inventory(id)
        .await?
        .filter(|inv| !inv.is_deleted())
        .ok_or_else(|| DomainError::not_found(format!("inventory {id}")))
}

pub(crate) async fn load_transaction(
    tx: &mut dyn StockTx,
    id: TransactionId,
) -> DomainResult<InventoryTransaction> {
    tx.get_transaction(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("transaction {id}")))
}

/// Apply a stock delta to a row already read in this transaction. Stock-in
/// goes through weighted-average costing.
pub(crate) async fn apply_delta(
    tx: &mut dyn StockTx,
    mut inv: Inventory,
    delta: i64,
    unit_cost: Option<Cost>,
    now: DateTime<Utc>,
    actor: UserId,
) -> DomainResult<Inventory> {
    if delta == 0 {
        return Ok(inv);
    }
    if delta > 0 {
        inv.receive(delta, unit_cost, now)?;
        inv.set_updated_by(actor);
        tx.update_inventory(&inv).await?;
        Ok(inv)
    } else {
        tx.adjust_stock(inv.product_id(), inv.warehouse_id(), delta, now, actor)
            .await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    use stockroom_core::ManualClock;
    use stockroom_inventory::{Address, NewWarehouse};

    use crate::store::InMemoryPersistence;
    use std::time::Duration as StdDuration;

    pub fn test_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    pub struct Harness {
        pub store: InMemoryPersistence,
        pub clock: Arc<ManualClock>,
        pub service: InventoryService,
        pub actor: UserId,
        pub cancel: CancellationToken,
    }

    impl Harness {
        pub fn advance(&self, minutes: u64) {
            self.clock.advance(StdDuration::from_secs(minutes * 60));
        }

        pub async fn warehouse(&self, code: &str) -> WarehouseId {
            let details = self
                .service
                .create_warehouse(test_new_warehouse(code), None, &self.cancel)
                .await
                .unwrap();
            *stockroom_core::Entity::id(&details.warehouse)
        }

        pub async fn stock(&self, product: ProductId, warehouse: WarehouseId, q: i64) {
            self.service
                .adjust(
                    AdjustStock {
                        product_id: product,
                        warehouse_id: warehouse,
                        delta: q,
                        reason: "opening balance".into(),
                    },
                    self.actor,
                    &self.cancel,
                )
                .await
                .unwrap();
        }

        pub async fn row(&self, product: ProductId, warehouse: WarehouseId) -> Option<Inventory> {
            self.service
                .list_inventory(
                    crate::query::InventoryFilter {
                        product_id: Some(product),
                        warehouse_id: Some(warehouse),
                        ..Default::default()
                    },
                    Default::default(),
                    &self.cancel,
                )
                .await
                .unwrap()
                .items
                .into_iter()
                .next()
        }

        pub async fn on_hand(&self, product: ProductId, warehouse: WarehouseId) -> i64 {
            self.row(product, warehouse).await.map(|i| i.on_hand()).unwrap_or(0)
        }

        /// Σ stock_delta over the pair's ledger.
        pub async fn ledger_total(&self, product: ProductId, warehouse: WarehouseId) -> i64 {
            self.service
                .ledger(product, warehouse, &self.cancel)
                .await
                .unwrap()
                .iter()
                .map(|t| t.stock_delta())
                .sum()
        }
    }

    pub fn test_new_warehouse(code: &str) -> NewWarehouse {
        NewWarehouse {
            code: code.to_string(),
            name: format!("Warehouse {code}"),
            address: Address {
                line1: "1 Dock Road".to_string(),
                line2: None,
                city: "Leeds".to_string(),
                state: None,
                postal_code: "LS1 4AP".to_string(),
                country: "GB".to_string(),
            },
            manager_id: None,
            phone: None,
            email: None,
        }
    }

    pub fn test_harness() -> Harness {
        let store = InMemoryPersistence::new();
        let clock = Arc::new(ManualClock::new(test_now()));
        let retry = RetryPolicy::default()
            .with_backoff(StdDuration::from_millis(1), StdDuration::from_millis(2));
        let service = InventoryService::new(
            Arc::new(store.clone()),
            clock.clone(),
            Arc::new(UuidV7Generator),
            ServiceConfig::default().with_retry(retry),
        );
        Harness {
            store,
            clock,
            service,
            actor: UserId::new(),
            cancel: CancellationToken::new(),
        }
    }
}
