//! Read-side operations: listings, availability, valuation and expiry.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use stockroom_core::{
    DomainResult, InventoryId, ProductId, TransactionId, WarehouseId, check_positive,
};
use stockroom_inventory::{
    Inventory, InventoryTransaction, LedgerSummary, Reconciliation, validate,
};

use super::{InventoryService, live_inventory, load_transaction};
use crate::query::{
    InventoryFilter, ListParams, Page, SortSpec, TransactionFilter,
};
use crate::store::{InventoryRepository, ReconciliationRepository, TransactionRepository};

/// Longest window accepted by [`InventoryService::expiring_batches`].
const MAX_EXPIRY_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    /// Anything at all is available.
    pub available: bool,
    pub requested: i64,
    pub available_qty: i64,
    pub can_fulfill: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Valuation {
    pub warehouse_id: Option<WarehouseId>,
    pub items: u64,
    pub units: i64,
    pub reserved: i64,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiringBatch {
    pub transaction: InventoryTransaction,
    pub days_to_expiry: i64,
}

impl InventoryService {
    pub async fn list_inventory(
        &self,
        filter: InventoryFilter,
        params: ListParams,
        cancel: &CancellationToken,
    ) -> DomainResult<Page<Inventory>> {
        let sort = SortSpec::inventory(params.sort_by.as_deref(), params.sort_dir.as_deref())?;
        let page = params.pagination()?;
        self.run(cancel, move |tx| {
            let filter = filter.clone();
            Box::pin(async move {
                let total = tx.count_inventory(&filter).await?;
                let items = tx.list_inventory(&filter, sort, page).await?;
                Ok(Page::new(items, total, page))
            })
        })
        .await
    }

    pub async fn get_inventory(
        &self,
        id: InventoryId,
        cancel: &CancellationToken,
    ) -> DomainResult<Inventory> {
        self.run(cancel, move |tx| Box::pin(async move { live_inventory(tx, id).await }))
            .await
    }

    /// Rows with `on_hand <= reorder_level`, optionally at one warehouse.
    pub async fn low_stock_items(
        &self,
        warehouse: Option<WarehouseId>,
        params: ListParams,
        cancel: &CancellationToken,
    ) -> DomainResult<Page<Inventory>> {
        let filter = InventoryFilter {
            warehouse_id: warehouse,
            low_stock_only: true,
            ..Default::default()
        };
        self.list_inventory(filter, params, cancel).await
    }

    #[instrument(skip(self, cancel), err)]
    pub async fn check_availability(
        &self,
        product: ProductId,
        warehouse: WarehouseId,
        requested: i64,
        cancel: &CancellationToken,
    ) -> DomainResult<Availability> {
        check_positive("quantity", requested)?;
        let available_qty = self
            .run(cancel, move |tx| {
                Box::pin(async move { tx.get_available_stock(product, warehouse).await })
            })
            .await?;
        let can_fulfill = available_qty >= requested;
        Ok(Availability {
            available: available_qty > 0,
            requested,
            available_qty,
            can_fulfill,
            reason: (!can_fulfill)
                .then(|| format!("only {available_qty} available, {requested} requested")),
        })
    }

    /// Full ledger of one (product, warehouse) pair, oldest first.
    pub async fn ledger(
        &self,
        product: ProductId,
        warehouse: WarehouseId,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        self.run(cancel, move |tx| {
            Box::pin(async move { tx.list_pair(product, warehouse).await })
        })
        .await
    }

    pub async fn ledger_summary(
        &self,
        product: ProductId,
        warehouse: WarehouseId,
        cancel: &CancellationToken,
    ) -> DomainResult<LedgerSummary> {
        let rows = self.ledger(product, warehouse, cancel).await?;
        Ok(LedgerSummary::from_transactions(&rows))
    }

    /// Σ on_hand · average_cost over live rows.
    pub async fn valuation(
        &self,
        warehouse: Option<WarehouseId>,
        cancel: &CancellationToken,
    ) -> DomainResult<Valuation> {
        let totals = self
            .run(cancel, move |tx| {
                Box::pin(async move { tx.inventory_totals(warehouse).await })
            })
            .await?;
        Ok(Valuation {
            warehouse_id: warehouse,
            items: totals.items,
            units: totals.units,
            reserved: totals.reserved,
            total_value: totals.value,
        })
    }

    /// Stock-in rows whose batch expires within `within_days` (config default
    /// when `None`), soonest first. Already expired batches are left out.
    pub async fn expiring_batches(
        &self,
        within_days: Option<i64>,
        warehouse: Option<WarehouseId>,
        params: ListParams,
        cancel: &CancellationToken,
    ) -> DomainResult<Page<ExpiringBatch>> {
        let days = within_days.unwrap_or(self.ctx.config.near_expiry_days);
        validate::range("within_days", days, 1, MAX_EXPIRY_WINDOW_DAYS)?;
        let page = params.pagination()?;
        let sort = SortSpec::expiring(params.sort_by.as_deref(), params.sort_dir.as_deref())?;

        let now = self.ctx.now();
        let filter = TransactionFilter {
            warehouse_id: warehouse,
            expires_from: Some(now),
            expires_to: Some(now + Duration::days(days)),
            stock_in_only: true,
            ..Default::default()
        };
        let listed = self
            .run(cancel, move |tx| {
                let filter = filter.clone();
                Box::pin(async move {
                    let total = tx.count_transactions(&filter).await?;
                    let items = tx.list_transactions(&filter, sort, page).await?;
                    Ok(Page::new(items, total, page))
                })
            })
            .await?;

        Ok(listed.map(|t| ExpiringBatch {
            days_to_expiry: t.days_to_expiry(now).unwrap_or_default(),
            transaction: t,
        }))
    }

    pub async fn list_transactions(
        &self,
        filter: TransactionFilter,
        params: ListParams,
        cancel: &CancellationToken,
    ) -> DomainResult<Page<InventoryTransaction>> {
        let sort = SortSpec::transactions(params.sort_by.as_deref(), params.sort_dir.as_deref())?;
        let page = params.pagination()?;
        if let (Some(from), Some(to)) = (filter.created_from, filter.created_to) {
            if from > to {
                return Err(stockroom_core::DomainError::invalid(
                    "created_from must not be after created_to",
                ));
            }
        }
        self.run(cancel, move |tx| {
            let filter = filter.clone();
            Box::pin(async move {
                let total = tx.count_transactions(&filter).await?;
                let items = tx.list_transactions(&filter, sort, page).await?;
                Ok(Page::new(items, total, page))
            })
        })
        .await
    }

    pub async fn get_transaction(
        &self,
        id: TransactionId,
        cancel: &CancellationToken,
    ) -> DomainResult<InventoryTransaction> {
        self.run(cancel, move |tx| Box::pin(async move { load_transaction(tx, id).await }))
            .await
    }

    /// Reconciliation history of one row, newest first.
    pub async fn list_reconciliations(
        &self,
        inventory_id: InventoryId,
        cancel: &CancellationToken,
    ) -> DomainResult<Vec<Reconciliation>> {
        self.run(cancel, move |tx| {
            Box::pin(async move { tx.list_reconciliations(inventory_id).await })
        })
        .await
    }
}
