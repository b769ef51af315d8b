//! Stock movements: adjust, reserve/release, transfer, receive, generic
//! movements, approvals, cycle counts and reconciliations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use stockroom_core::{
    Cost, DomainError, DomainResult, Entity, ErrorKind, InventoryId, ProductId, ReconciliationId,
    TransactionId, UserId, WarehouseId, check_level, check_movement, check_positive,
};
use stockroom_inventory::{
    Inventory, InventoryTransaction, NewTransaction, Reconciliation, StockLevels, TransactionType,
    validate,
};

use super::{
    InventoryService, apply_delta, ensure_inventory, ensure_warehouse, live_inventory,
    load_transaction,
};
use crate::store::{
    InventoryRepository, ReconciliationRepository, TransactionRepository,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub delta: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub product_id: ProductId,
    pub from_warehouse: WarehouseId,
    pub to_warehouse: WarehouseId,
    pub quantity: i64,
    #[serde(default)]
    pub reason: String,
}

/// A typed movement. `receive` takes the stock-in kinds; `record_movement`
/// takes anything except counts and transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub unit_cost: Option<Decimal>,
    pub total_cost: Option<Decimal>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: String,
}

impl Movement {
    fn describe(&self, actor: UserId) -> DomainResult<NewTransaction> {
        let unit_cost = self.unit_cost.map(Cost::new).transpose()?;
        Ok(NewTransaction {
            reference_type: self.reference_type.clone(),
            reference_id: self.reference_id,
            unit_cost,
            total_cost: self.total_cost,
            batch_number: self.batch_number.clone(),
            serial_number: self.serial_number.clone(),
            expiry_date: self.expiry_date,
            ..NewTransaction::new(
                self.product_id,
                self.warehouse_id,
                self.transaction_type,
                self.quantity,
                self.reason.clone(),
                actor,
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCount {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub counted: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconcile {
    pub system_quantity: i64,
    pub physical_quantity: i64,
    pub reason: String,
}

/// A ledger row together with the stock row it moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockMovement {
    pub transaction: InventoryTransaction,
    pub inventory: Inventory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    /// Shared `reference_id` of both ledger rows.
    pub transfer_id: Uuid,
    pub out_transaction: InventoryTransaction,
    pub in_transaction: InventoryTransaction,
    pub source: Inventory,
    pub destination: Inventory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BulkOutcome {
    Ok { transaction_id: TransactionId },
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkAdjustItem {
    pub index: usize,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    #[serde(flatten)]
    pub outcome: BulkOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkAdjustResult {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub details: Vec<BulkAdjustItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleCountOutcome {
    pub count_transaction: InventoryTransaction,
    /// Present when the count differed from on hand.
    pub adjustment: Option<InventoryTransaction>,
    pub inventory: Inventory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub reconciliation: Reconciliation,
    pub adjustment: Option<InventoryTransaction>,
    pub inventory: Inventory,
}

fn check_reason(service: &InventoryService, reason: &str) -> DomainResult<()> {
    validate::max_len("reason", reason, service.ctx.config.max_reason_len)
}

impl InventoryService {
    /// Operator adjustment. The Adjustment row is written already approved
    /// by `actor`, so it takes effect at once.
    #[instrument(
        skip(self, input, cancel),
        fields(product_id = %input.product_id, warehouse_id = %input.warehouse_id, delta = input.delta, actor = %actor),
        err
    )]
    pub async fn adjust(
        &self,
        input: AdjustStock,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<StockMovement> {
        check_movement("delta", input.delta)?;
        check_reason(self, &input.reason)?;

        let ctx = self.ctx.clone();
        let out = self
            .run(cancel, move |tx| {
                let ctx = ctx.clone();
                let input = input.clone();
                Box::pin(async move {
                    let now = ctx.now();
                    let record = ctx.applied_transaction(
                        NewTransaction::new(
                            input.product_id,
                            input.warehouse_id,
                            TransactionType::Adjustment,
                            input.delta,
                            input.reason,
                            actor,
                        ),
                        now,
                    )?;
                    ensure_inventory(tx, &ctx, input.product_id, input.warehouse_id, now).await?;
                    tx.append_transaction(&record).await?;
                    let inventory = tx
                        .adjust_stock(input.product_id, input.warehouse_id, input.delta, now, actor)
                        .await?;
                    Ok(StockMovement { transaction: record, inventory })
                })
            })
            .await?;
        info!(transaction_id = %out.transaction.id, on_hand = out.inventory.on_hand(), "stock adjusted");
        Ok(out)
    }

    /// Hold stock against a future movement. No ledger row is written.
    #[instrument(skip(self, cancel), err)]
    pub async fn reserve(
        &self,
        input: ReserveStock,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<Inventory> {
        check_positive("quantity", input.quantity)?;
        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            Box::pin(async move {
                tx.reserve_stock(input.product_id, input.warehouse_id, input.quantity, ctx.now(), actor)
                    .await
            })
        })
        .await
    }

    /// Keyed counterpart of [`InventoryService::reserve`].
    #[instrument(skip(self, cancel), err)]
    pub async fn release_stock(
        &self,
        input: ReserveStock,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<Inventory> {
        check_positive("quantity", input.quantity)?;
        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            Box::pin(async move {
                tx.release_stock(input.product_id, input.warehouse_id, input.quantity, ctx.now(), actor)
                    .await
            })
        })
        .await
    }

    /// Release by reservation id. Reservations are not tracked individually,
    /// so there is nothing to look the id up in.
    pub async fn release(
        &self,
        reservation_id: Uuid,
        quantity: i64,
        reason: &str,
    ) -> DomainResult<Inventory> {
        debug!(%reservation_id, quantity, reason, "release by reservation requested");
        Err(DomainError::not_implemented(
            "release by reservation id requires reservation tracking",
        ))
    }

    /// Move stock between two warehouses as one TransferOut/TransferIn pair.
    #[instrument(
        skip(self, input, cancel),
        fields(
            product_id = %input.product_id,
            from = %input.from_warehouse,
            to = %input.to_warehouse,
            quantity = input.quantity,
            actor = %actor
        ),
        err
    )]
    pub async fn transfer(
        &self,
        input: TransferStock,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<TransferOutcome> {
        if input.from_warehouse == input.to_warehouse {
            return Err(DomainError::invalid(
                "source and destination warehouses cannot be the same",
            ));
        }
        check_positive("quantity", input.quantity)?;
        check_reason(self, &input.reason)?;

        let ctx = self.ctx.clone();
        let out = self
            .run(cancel, move |tx| {
                let ctx = ctx.clone();
                let input = input.clone();
                Box::pin(async move {
                    let TransferStock { product_id: p, from_warehouse: from, to_warehouse: to, quantity: q, reason } = input;
                    let now = ctx.now();

                    let mut keys = [(p, from), (p, to)];
                    keys.sort();
                    tx.lock_rows(&keys).await?;

                    ensure_warehouse(tx, from).await?;
                    let available = tx.get_available_stock(p, from).await?;
                    if available < q {
                        return Err(DomainError::insufficient_stock(format!(
                            "requested {q}, available {available} at warehouse {from}"
                        )));
                    }
                    let source_cost = tx
                        .find_inventory(p, from)
                        .await?
                        .map(|inv| inv.average_cost())
                        .filter(|c| !c.is_zero());
                    let destination = ensure_inventory(tx, &ctx, p, to, now).await?;

                    let transfer_id = ctx.uuid();
                    let leg = |t: TransactionType, wh: WarehouseId, quantity: i64| NewTransaction {
                        reference_type: Some("transfer".to_string()),
                        reference_id: Some(transfer_id),
                        unit_cost: source_cost,
                        ..NewTransaction::new(p, wh, t, quantity, reason.clone(), actor)
                            .with_transfer(from, to)
                    };
                    let out_tx = ctx.transaction(leg(TransactionType::TransferOut, from, -q), now)?;
                    let in_tx = ctx.transaction(leg(TransactionType::TransferIn, to, q), now)?;
                    tx.append_transaction(&out_tx).await?;
                    tx.append_transaction(&in_tx).await?;

                    let mut source = None;
                    let mut dest = Some(destination);
                    for (_, wh) in keys {
                        if wh == from {
                            source = Some(tx.adjust_stock(p, from, -q, now, actor).await?);
                        } else if let Some(row) = dest.take() {
                            dest = Some(apply_delta(tx, row, q, source_cost, now, actor).await?);
                        }
                    }
                    let (Some(source), Some(destination)) = (source, dest) else {
                        return Err(DomainError::internal("transfer legs were not both applied"));
                    };
                    Ok(TransferOutcome {
                        transfer_id,
                        out_transaction: out_tx,
                        in_transaction: in_tx,
                        source,
                        destination,
                    })
                })
            })
            .await?;
        info!(transfer_id = %out.transfer_id, "stock transferred");
        Ok(out)
    }

    /// Adjust each entry in its own transaction. Failures are collected, never raised.
    #[instrument(skip(self, items, cancel), fields(items = items.len(), actor = %actor))]
    pub async fn bulk_adjust(
        &self,
        items: Vec<AdjustStock>,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> BulkAdjustResult {
        let mut result = BulkAdjustResult { total: items.len(), ..Default::default() };
        for (index, item) in items.into_iter().enumerate() {
            let (product_id, warehouse_id) = (item.product_id, item.warehouse_id);
            let outcome = match self.adjust(item, actor, cancel).await {
                Ok(done) => {
                    result.succeeded += 1;
                    BulkOutcome::Ok { transaction_id: done.transaction.id }
                }
                Err(err) => {
                    result.failed += 1;
                    BulkOutcome::Error { kind: err.kind(), message: err.message() }
                }
            };
            result.details.push(BulkAdjustItem { index, product_id, warehouse_id, outcome });
        }
        info!(succeeded = result.succeeded, failed = result.failed, "bulk adjustment finished");
        result
    }

    /// Stock-in (Purchase, Return, Production) with weighted-average costing.
    #[instrument(
        skip(self, input, cancel),
        fields(product_id = %input.product_id, warehouse_id = %input.warehouse_id, transaction_type = %input.transaction_type),
        err
    )]
    pub async fn receive(
        &self,
        input: Movement,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<StockMovement> {
        if !matches!(
            input.transaction_type,
            TransactionType::Purchase | TransactionType::Return | TransactionType::Production
        ) {
            return Err(DomainError::invalid(format!(
                "{} is not a receiving transaction type",
                input.transaction_type
            )));
        }
        check_positive("quantity", input.quantity)?;
        self.book_movement(input, actor, cancel).await
    }

    /// Record a typed movement. Approval-gated types are written pending and
    /// leave stock untouched until approved.
    #[instrument(
        skip(self, input, cancel),
        fields(product_id = %input.product_id, warehouse_id = %input.warehouse_id, transaction_type = %input.transaction_type),
        err
    )]
    pub async fn record_movement(
        &self,
        input: Movement,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<StockMovement> {
        match input.transaction_type {
            TransactionType::Count => {
                return Err(DomainError::invalid("count rows are written by cycle counts"));
            }
            t if t.is_transfer() => {
                return Err(DomainError::invalid("transfer rows are written by transfers"));
            }
            _ => {}
        }
        self.book_movement(input, actor, cancel).await
    }

    async fn book_movement(
        &self,
        input: Movement,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<StockMovement> {
        let new = input.describe(actor)?;
        // Dry run so a malformed movement never opens a transaction.
        self.ctx.transaction(new.clone(), self.ctx.now())?;

        let ctx = self.ctx.clone();
        let out = self
            .run(cancel, move |tx| {
                let ctx = ctx.clone();
                let new = new.clone();
                Box::pin(async move {
                    let now = ctx.now();
                    let record = ctx.transaction(new, now)?;
                    let inv =
                        ensure_inventory(tx, &ctx, record.product_id, record.warehouse_id, now).await?;
                    tx.append_transaction(&record).await?;
                    let inventory = if record.requires_approval() {
                        inv
                    } else {
                        apply_delta(tx, inv, record.quantity, record.unit_cost, now, actor).await?
                    };
                    Ok(StockMovement { transaction: record, inventory })
                })
            })
            .await?;
        info!(
            transaction_id = %out.transaction.id,
            pending = !out.transaction.is_effective(),
            "movement recorded"
        );
        Ok(out)
    }

    /// Approve a pending gated movement and apply it to stock in the same
    /// transaction.
    #[instrument(skip(self, cancel), err)]
    pub async fn approve(
        &self,
        transaction_id: TransactionId,
        approver: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<StockMovement> {
        let ctx = self.ctx.clone();
        let out = self
            .run(cancel, move |tx| {
                let ctx = ctx.clone();
                Box::pin(async move {
                    let now = ctx.now();
                    let mut record = load_transaction(tx, transaction_id).await?;
                    record.approve(approver, now)?;
                    let inv =
                        ensure_inventory(tx, &ctx, record.product_id, record.warehouse_id, now).await?;
                    let inventory =
                        apply_delta(tx, inv, record.stock_delta(), record.unit_cost, now, approver)
                            .await?;
                    tx.mark_approved(transaction_id, now, approver).await?;
                    Ok(StockMovement { transaction: record, inventory })
                })
            })
            .await?;
        info!(%transaction_id, on_hand = out.inventory.on_hand(), "transaction approved");
        Ok(out)
    }

    /// Record a physical count: one Count row always, plus an applied
    /// Adjustment for the difference when there is one.
    #[instrument(skip(self, cancel), err)]
    pub async fn cycle_count(
        &self,
        input: CycleCount,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<CycleCountOutcome> {
        check_level("counted", input.counted)?;
        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let CycleCount { product_id: p, warehouse_id: w, counted } = input;
                let now = ctx.now();
                let mut inv = ensure_inventory(tx, &ctx, p, w, now).await?;
                if counted < inv.reserved() {
                    return Err(DomainError::invalid_state(format!(
                        "counted {counted} is below the {} reserved units",
                        inv.reserved()
                    )));
                }
                let delta = counted - inv.on_hand();

                let count_tx = ctx.transaction(
                    NewTransaction::new(p, w, TransactionType::Count, counted, "cycle count", actor),
                    now,
                )?;
                tx.append_transaction(&count_tx).await?;

                let adjustment = if delta != 0 {
                    let adj = ctx.applied_transaction(
                        NewTransaction {
                            reference_type: Some("cycle_count".to_string()),
                            reference_id: Some(*count_tx.id.as_uuid()),
                            ..NewTransaction::new(
                                p,
                                w,
                                TransactionType::Adjustment,
                                delta,
                                "cycle count variance",
                                actor,
                            )
                        },
                        now,
                    )?;
                    tx.append_transaction(&adj).await?;
                    Some(adj)
                } else {
                    None
                };

                inv.record_cycle_count(counted, actor, now)?;
                inv.set_updated_by(actor);
                tx.update_inventory(&inv).await?;
                Ok(CycleCountOutcome { count_transaction: count_tx, adjustment, inventory: inv })
            })
        })
        .await
    }

    /// Reconcile a row against a physical count. `system_quantity` must match
    /// the current on hand, otherwise the caller worked from a stale read.
    #[instrument(skip(self, input, cancel), fields(variance = input.physical_quantity - input.system_quantity), err)]
    pub async fn reconcile(
        &self,
        inventory_id: InventoryId,
        input: Reconcile,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<ReconcileOutcome> {
        check_level("system_quantity", input.system_quantity)?;
        check_level("physical_quantity", input.physical_quantity)?;
        validate::not_blank("reason", &input.reason)?;
        check_reason(self, &input.reason)?;

        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            let input = input.clone();
            Box::pin(async move {
                let now = ctx.now();
                let mut inv = live_inventory(tx, inventory_id).await?;
                if inv.on_hand() != input.system_quantity {
                    return Err(DomainError::invalid_state(format!(
                        "stale system quantity: {} given, {} on hand",
                        input.system_quantity,
                        inv.on_hand()
                    )));
                }
                let mut rec = Reconciliation::new(
                    ReconciliationId::from_uuid(ctx.uuid()),
                    *inv.id(),
                    inv.key(),
                    input.system_quantity,
                    input.physical_quantity,
                    input.reason.clone(),
                    actor,
                    now,
                )?;

                let adjustment = if rec.has_variance() {
                    let adj = ctx.applied_transaction(
                        NewTransaction {
                            reference_type: Some("reconciliation".to_string()),
                            reference_id: Some(*rec.id.as_uuid()),
                            ..NewTransaction::new(
                                inv.product_id(),
                                inv.warehouse_id(),
                                TransactionType::Adjustment,
                                rec.variance,
                                input.reason,
                                actor,
                            )
                        },
                        now,
                    )?;
                    inv.set(input.physical_quantity, now)?;
                    inv.set_updated_by(actor);
                    tx.append_transaction(&adj).await?;
                    tx.update_inventory(&inv).await?;
                    rec.adjustment_id = Some(adj.id);
                    Some(adj)
                } else {
                    None
                };
                tx.create_reconciliation(&rec).await?;
                Ok(ReconcileOutcome { reconciliation: rec, adjustment, inventory: inv })
            })
        })
        .await
    }

    #[instrument(skip(self, cancel), err)]
    pub async fn update_stock_levels(
        &self,
        inventory_id: InventoryId,
        levels: StockLevels,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<Inventory> {
        for (name, value) in [
            ("min_stock", levels.min_stock.flatten()),
            ("max_stock", levels.max_stock.flatten()),
            ("reorder_level", levels.reorder_level),
        ] {
            if let Some(v) = value {
                check_level(name, v)?;
            }
        }
        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let mut inv = live_inventory(tx, inventory_id).await?;
                inv.update_stock_levels(levels, ctx.now())?;
                inv.set_updated_by(actor);
                tx.update_inventory(&inv).await?;
                Ok(inv)
            })
        })
        .await
    }

    /// Tombstone an empty row. The ledger is kept.
    #[instrument(skip(self, cancel), err)]
    pub async fn remove_inventory(
        &self,
        inventory_id: InventoryId,
        actor: UserId,
        cancel: &CancellationToken,
    ) -> DomainResult<Inventory> {
        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let mut inv = live_inventory(tx, inventory_id).await?;
                inv.mark_deleted(ctx.now())?;
                inv.set_updated_by(actor);
                tx.update_inventory(&inv).await?;
                Ok(inv)
            })
        })
        .await
    }
}
