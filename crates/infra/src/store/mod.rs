//! Persistence contract.
//!
//! The service layer depends only on these traits. A [`Persistence`] hands out
//! one [`StockTx`] per unit of work; every repository call made through it runs
//! inside that same open transaction, and nothing becomes visible to other
//! transactions before [`StockTx::commit`].
//!
//! ## Atomic stock operations
//!
//! `adjust_stock`, `reserve_stock` and `release_stock` have provided
//! implementations written against `find_inventory` / `update_inventory`.
//! Backends that can do better (a guarded `UPDATE .. RETURNING` in Postgres)
//! override them; either way the domain entity decides which error a refused
//! operation reports.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use stockroom_core::{
    DomainError, DomainResult, InventoryId, ProductId, TransactionId, UserId, WarehouseId,
};
use stockroom_inventory::{
    Inventory, InventoryTransaction, Reconciliation, Warehouse, WarehouseExtension,
};

use crate::query::{
    InventoryFilter, Pagination, SortSpec, TransactionFilter, WarehouseFilter,
};

pub use memory::InMemoryPersistence;
pub use postgres::PostgresPersistence;

/// Aggregate figures over live inventory rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryTotals {
    pub items: u64,
    pub units: i64,
    pub reserved: i64,
    /// Σ on_hand · average_cost.
    pub value: Decimal,
}

fn missing_row(product: ProductId, warehouse: WarehouseId) -> DomainError {
    DomainError::not_found(format!(
        "no inventory for product {product} at warehouse {warehouse}"
    ))
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn begin(&self) -> DomainResult<Box<dyn StockTx>>;
}

/// An open transaction exposing every repository.
#[async_trait]
pub trait StockTx:
    WarehouseRepository + InventoryRepository + TransactionRepository + ReconciliationRepository + Send
{
    async fn commit(self: Box<Self>) -> DomainResult<()>;

    async fn rollback(self: Box<Self>) -> DomainResult<()>;
}

#[async_trait]
pub trait WarehouseRepository: Send {
    /// `ALREADY_EXISTS` when the code is taken.
    async fn create_warehouse(&mut self, warehouse: &Warehouse) -> DomainResult<()>;

    async fn get_warehouse(&mut self, id: WarehouseId) -> DomainResult<Option<Warehouse>>;

    async fn get_warehouse_by_code(&mut self, code: &str) -> DomainResult<Option<Warehouse>>;

    /// Writes everything except the code, which never changes.
    async fn update_warehouse(&mut self, warehouse: &Warehouse) -> DomainResult<()>;

    /// Removes the warehouse, its extension and its (empty) inventory rows.
    async fn delete_warehouse(&mut self, id: WarehouseId) -> DomainResult<()>;

    async fn list_warehouses(
        &mut self,
        filter: &WarehouseFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<Warehouse>>;

    async fn count_warehouses(&mut self, filter: &WarehouseFilter) -> DomainResult<u64>;

    /// Insert or replace the extension record.
    async fn put_extension(
        &mut self,
        id: WarehouseId,
        ext: &WarehouseExtension,
    ) -> DomainResult<()>;

    async fn get_extension(&mut self, id: WarehouseId) -> DomainResult<Option<WarehouseExtension>>;

    /// Σ on_hand over live rows at the warehouse.
    async fn current_stock(&mut self, id: WarehouseId) -> DomainResult<i64>;
}

#[async_trait]
pub trait InventoryRepository: Send {
    async fn get_inventory(&mut self, id: InventoryId) -> DomainResult<Option<Inventory>>;

    /// Includes tombstoned rows; callers decide what a tombstone means.
    async fn find_inventory(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
    ) -> DomainResult<Option<Inventory>>;

    /// `ALREADY_EXISTS` when the (product, warehouse) row exists.
    async fn create_inventory(&mut self, inventory: &Inventory) -> DomainResult<()>;

    async fn update_inventory(&mut self, inventory: &Inventory) -> DomainResult<()>;

    async fn list_inventory(
        &mut self,
        filter: &InventoryFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<Inventory>>;

    async fn count_inventory(&mut self, filter: &InventoryFilter) -> DomainResult<u64>;

    /// Lock the given rows for the rest of the transaction. `keys` must be in
    /// ascending `(product_id, warehouse_id)` order.
    async fn lock_rows(&mut self, keys: &[(ProductId, WarehouseId)]) -> DomainResult<()>;

    async fn inventory_totals(&mut self, warehouse: Option<WarehouseId>)
    -> DomainResult<InventoryTotals>;

    async fn get_available_stock(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
    ) -> DomainResult<i64> {
        Ok(self
            .find_inventory(product, warehouse)
            .await?
            .filter(|inv| !inv.is_deleted())
            .map(|inv| inv.available())
            .unwrap_or(0))
    }

    async fn adjust_stock(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
        delta: i64,
        now: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<Inventory> {
        let mut inv = live_row(self.find_inventory(product, warehouse).await?, product, warehouse)?;
        inv.adjust(delta, now)?;
        inv.set_updated_by(by);
        self.update_inventory(&inv).await?;
        Ok(inv)
    }

    async fn reserve_stock(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
        quantity: i64,
        now: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<Inventory> {
        let mut inv = live_row(self.find_inventory(product, warehouse).await?, product, warehouse)?;
        inv.reserve(quantity, now)?;
        inv.set_updated_by(by);
        self.update_inventory(&inv).await?;
        Ok(inv)
    }

    async fn release_stock(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
        quantity: i64,
        now: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<Inventory> {
        let mut inv = live_row(self.find_inventory(product, warehouse).await?, product, warehouse)?;
        inv.release(quantity, now)?;
        inv.set_updated_by(by);
        self.update_inventory(&inv).await?;
        Ok(inv)
    }
}

/// Treat an absent or tombstoned row as `NOT_FOUND`.
pub(crate) fn live_row(
    row: Option<Inventory>,
    product: ProductId,
    warehouse: WarehouseId,
) -> DomainResult<Inventory> {
    row.filter(|inv| !inv.is_deleted())
        .ok_or_else(|| missing_row(product, warehouse))
}

#[async_trait]
pub trait TransactionRepository: Send {
    /// `ALREADY_EXISTS` on a duplicate id.
    async fn append_transaction(&mut self, tx: &InventoryTransaction) -> DomainResult<()>;

    async fn get_transaction(&mut self, id: TransactionId)
    -> DomainResult<Option<InventoryTransaction>>;

    /// Stamp the approval pair. `NOT_FOUND` for an unknown id, `INVALID_STATE`
    /// when the row is already approved.
    async fn mark_approved(
        &mut self,
        id: TransactionId,
        at: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<()>;

    async fn list_transactions(
        &mut self,
        filter: &TransactionFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<InventoryTransaction>>;

    async fn count_transactions(&mut self, filter: &TransactionFilter) -> DomainResult<u64>;

    /// Full ledger of one (product, warehouse) pair, oldest first.
    async fn list_pair(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
    ) -> DomainResult<Vec<InventoryTransaction>>;
}

#[async_trait]
pub trait ReconciliationRepository: Send {
    async fn create_reconciliation(&mut self, rec: &Reconciliation) -> DomainResult<()>;

    /// Newest first.
    async fn list_reconciliations(
        &mut self,
        inventory_id: InventoryId,
    ) -> DomainResult<Vec<Reconciliation>>;
}
