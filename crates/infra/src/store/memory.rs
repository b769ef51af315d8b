//! In-memory persistence backend.
//!
//! Single-writer: a transaction holds the store lock from `begin` until it
//! commits or rolls back, and works on a private copy of the state that
//! replaces the committed state on commit. Dropping a transaction without
//! committing discards the copy.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use stockroom_core::{
    DomainError, DomainResult, Entity, InventoryId, ProductId, TransactionId, UserId, WarehouseId,
};
use stockroom_inventory::{
    Inventory, InventoryTransaction, Reconciliation, Warehouse, WarehouseExtension,
};

use crate::error::StoreError;
use crate::query::{
    ApprovalFilter, InventoryFilter, Pagination, SortSpec, TransactionFilter, WarehouseFilter,
};
use crate::store::{
    InventoryRepository, InventoryTotals, Persistence, ReconciliationRepository, StockTx,
    TransactionRepository, WarehouseRepository,
};

#[derive(Debug, Clone, Default)]
struct MemState {
    warehouses: BTreeMap<WarehouseId, Warehouse>,
    extensions: HashMap<WarehouseId, WarehouseExtension>,
    inventory: HashMap<InventoryId, Inventory>,
    by_key: HashMap<(ProductId, WarehouseId), InventoryId>,
    transactions: Vec<InventoryTransaction>,
    tx_index: HashMap<TransactionId, usize>,
    reconciliations: Vec<Reconciliation>,
}

#[derive(Debug, Default)]
struct Counters {
    begins: AtomicUsize,
    pending_conflicts: AtomicUsize,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    state: Arc<Mutex<MemState>>,
    counters: Arc<Counters>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with `CONFLICT`. `0` clears the queue.
    pub fn inject_conflicts(&self, n: usize) {
        self.counters.pending_conflicts.store(n, AtomicOrdering::SeqCst);
    }

    /// Transactions begun so far.
    pub fn begin_count(&self) -> usize {
        self.counters.begins.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn begin(&self) -> DomainResult<Box<dyn StockTx>> {
        let guard = self.state.clone().lock_owned().await;
        self.counters.begins.fetch_add(1, AtomicOrdering::SeqCst);
        let work = guard.clone();
        Ok(Box::new(MemTx {
            guard,
            work,
            counters: self.counters.clone(),
        }))
    }
}

struct MemTx {
    guard: OwnedMutexGuard<MemState>,
    work: MemState,
    counters: Arc<Counters>,
}

impl MemTx {
    fn take_injected_conflict(&self) -> bool {
        self.counters
            .pending_conflicts
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn live_inventory(&self) -> impl Iterator<Item = &Inventory> {
        self.work.inventory.values().filter(|inv| !inv.is_deleted())
    }
}

#[async_trait]
impl StockTx for MemTx {
    async fn commit(self: Box<Self>) -> DomainResult<()> {
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict("injected serialization failure".into()).into());
        }
        let MemTx { mut guard, work, .. } = *self;
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        Ok(())
    }
}

fn paginate<T>(items: Vec<T>, page: Pagination) -> Vec<T> {
    items
        .into_iter()
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(page.limit as usize)
        .collect()
}

fn directed(ord: Ordering, sort: SortSpec) -> Ordering {
    if sort.descending { ord.reverse() } else { ord }
}

fn cmp_inventory(a: &Inventory, b: &Inventory, sort: SortSpec) -> Ordering {
    let (ra, rb) = (a.record(), b.record());
    let ord = match sort.column {
        "id" => ra.id.cmp(&rb.id),
        "product_id" => ra.product_id.cmp(&rb.product_id),
        "warehouse_id" => ra.warehouse_id.cmp(&rb.warehouse_id),
        "quantity_on_hand" => ra.quantity_on_hand.cmp(&rb.quantity_on_hand),
        "quantity_reserved" => ra.quantity_reserved.cmp(&rb.quantity_reserved),
        "reorder_level" => ra.reorder_level.cmp(&rb.reorder_level),
        "average_cost" => ra.average_cost.cmp(&rb.average_cost),
        "updated_at" => ra.updated_at.cmp(&rb.updated_at),
        _ => Ordering::Equal,
    };
    directed(ord, sort).then_with(|| ra.id.cmp(&rb.id))
}

fn cmp_transaction(a: &InventoryTransaction, b: &InventoryTransaction, sort: SortSpec) -> Ordering {
    let ord = match sort.column {
        "created_at" => a.created_at.cmp(&b.created_at),
        "quantity" => a.quantity.cmp(&b.quantity),
        "transaction_type" => a.transaction_type.as_str().cmp(b.transaction_type.as_str()),
        "product_id" => a.product_id.cmp(&b.product_id),
        "warehouse_id" => a.warehouse_id.cmp(&b.warehouse_id),
        "approved_at" => a.approved_at.cmp(&b.approved_at),
        "expiry_date" => a.expiry_date.cmp(&b.expiry_date),
        _ => Ordering::Equal,
    };
    directed(ord, sort).then_with(|| a.id.cmp(&b.id))
}

fn cmp_warehouse(a: &Warehouse, b: &Warehouse, sort: SortSpec) -> Ordering {
    let (ra, rb) = (a.record(), b.record());
    let ord = match sort.column {
        "code" => ra.code.cmp(&rb.code),
        "name" => ra.name.cmp(&rb.name),
        "created_at" => ra.created_at.cmp(&rb.created_at),
        "updated_at" => ra.updated_at.cmp(&rb.updated_at),
        _ => Ordering::Equal,
    };
    directed(ord, sort).then_with(|| ra.id.cmp(&rb.id))
}

fn inventory_matches(inv: &Inventory, f: &InventoryFilter) -> bool {
    (f.include_deleted || !inv.is_deleted())
        && f.product_id.is_none_or(|p| inv.product_id() == p)
        && f.warehouse_id.is_none_or(|w| inv.warehouse_id() == w)
        && (!f.low_stock_only || inv.is_low_stock())
}

fn transaction_matches(tx: &InventoryTransaction, f: &TransactionFilter) -> bool {
    let approval = match f.approval {
        ApprovalFilter::Any => true,
        ApprovalFilter::Pending => tx.requires_approval() && !tx.is_approved(),
        ApprovalFilter::Approved => tx.is_approved(),
    };
    let expiry = match (f.expires_from, f.expires_to) {
        (None, None) => true,
        (from, to) => tx.expiry_date.is_some_and(|e| {
            from.is_none_or(|from| e >= from) && to.is_none_or(|to| e <= to)
        }),
    };
    approval
        && expiry
        && (!f.stock_in_only || tx.is_stock_in())
        && f.product_id.is_none_or(|p| tx.product_id == p)
        && f.warehouse_id.is_none_or(|w| tx.warehouse_id == w)
        && (f.types.is_empty() || f.types.contains(&tx.transaction_type))
        && f.created_from.is_none_or(|from| tx.created_at >= from)
        && f.created_to.is_none_or(|to| tx.created_at <= to)
        && f.reference_type.as_ref().is_none_or(|r| tx.reference_type.as_ref() == Some(r))
        && f.reference_id.is_none_or(|r| tx.reference_id == Some(r))
        && f.batch_number.as_ref().is_none_or(|b| tx.batch_number.as_ref() == Some(b))
        && f.created_by.is_none_or(|u| tx.created_by == u)
}

fn warehouse_matches(wh: &Warehouse, f: &WarehouseFilter) -> bool {
    let search = f.search.as_ref().is_none_or(|s| {
        let s = s.to_lowercase();
        wh.code().to_lowercase().contains(&s) || wh.name().to_lowercase().contains(&s)
    });
    search && (!f.active_only || wh.is_active())
}

#[async_trait]
impl WarehouseRepository for MemTx {
    async fn create_warehouse(&mut self, warehouse: &Warehouse) -> DomainResult<()> {
        if self.work.warehouses.values().any(|w| w.code() == warehouse.code()) {
            return Err(StoreError::AlreadyExists(format!(
                "warehouse code '{}' is taken",
                warehouse.code()
            ))
            .into());
        }
        if self.work.warehouses.contains_key(warehouse.id()) {
            return Err(StoreError::AlreadyExists(format!("warehouse {}", warehouse.id())).into());
        }
        self.work.warehouses.insert(*warehouse.id(), warehouse.clone());
        Ok(())
    }

    async fn get_warehouse(&mut self, id: WarehouseId) -> DomainResult<Option<Warehouse>> {
        Ok(self.work.warehouses.get(&id).cloned())
    }

    async fn get_warehouse_by_code(&mut self, code: &str) -> DomainResult<Option<Warehouse>> {
        Ok(self.work.warehouses.values().find(|w| w.code() == code).cloned())
    }

    async fn update_warehouse(&mut self, warehouse: &Warehouse) -> DomainResult<()> {
        let slot = self
            .work
            .warehouses
            .get_mut(warehouse.id())
            .ok_or_else(|| StoreError::NotFound(format!("warehouse {}", warehouse.id())))?;
        let mut rec = warehouse.record().clone();
        rec.code = slot.code().to_string();
        *slot = Warehouse::restore(rec)?;
        Ok(())
    }

    async fn delete_warehouse(&mut self, id: WarehouseId) -> DomainResult<()> {
        if !self.work.warehouses.contains_key(&id) {
            return Err(StoreError::NotFound(format!("warehouse {id}")).into());
        }
        // Same restriction as the inventory foreign key: rows with history stay.
        if self.work.transactions.iter().any(|t| t.warehouse_id == id) {
            return Err(StoreError::Conflict(format!("warehouse {id} has ledger rows")).into());
        }
        self.work.warehouses.remove(&id);
        self.work.extensions.remove(&id);
        let doomed: Vec<InventoryId> = self
            .work
            .inventory
            .values()
            .filter(|inv| inv.warehouse_id() == id)
            .map(|inv| inv.record().id)
            .collect();
        for inv_id in doomed {
            if let Some(inv) = self.work.inventory.remove(&inv_id) {
                self.work.by_key.remove(&inv.key());
            }
        }
        Ok(())
    }

    async fn list_warehouses(
        &mut self,
        filter: &WarehouseFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<Warehouse>> {
        let mut rows: Vec<Warehouse> = self
            .work
            .warehouses
            .values()
            .filter(|w| warehouse_matches(w, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| cmp_warehouse(a, b, sort));
        Ok(paginate(rows, page))
    }

    async fn count_warehouses(&mut self, filter: &WarehouseFilter) -> DomainResult<u64> {
        Ok(self.work.warehouses.values().filter(|w| warehouse_matches(w, filter)).count() as u64)
    }

    async fn put_extension(
        &mut self,
        id: WarehouseId,
        ext: &WarehouseExtension,
    ) -> DomainResult<()> {
        if !self.work.warehouses.contains_key(&id) {
            return Err(StoreError::NotFound(format!("warehouse {id}")).into());
        }
        self.work.extensions.insert(id, ext.clone());
        Ok(())
    }

    async fn get_extension(&mut self, id: WarehouseId) -> DomainResult<Option<WarehouseExtension>> {
        Ok(self.work.extensions.get(&id).cloned())
    }

    async fn current_stock(&mut self, id: WarehouseId) -> DomainResult<i64> {
        Ok(self
            .live_inventory()
            .filter(|inv| inv.warehouse_id() == id)
            .map(|inv| inv.on_hand())
            .sum())
    }
}

#[async_trait]
impl InventoryRepository for MemTx {
    async fn get_inventory(&mut self, id: InventoryId) -> DomainResult<Option<Inventory>> {
        Ok(self.work.inventory.get(&id).cloned())
    }

    async fn find_inventory(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
    ) -> DomainResult<Option<Inventory>> {
        Ok(self
            .work
            .by_key
            .get(&(product, warehouse))
            .and_then(|id| self.work.inventory.get(id))
            .cloned())
    }

    async fn create_inventory(&mut self, inventory: &Inventory) -> DomainResult<()> {
        let key = inventory.key();
        let id = inventory.record().id;
        if self.work.by_key.contains_key(&key) || self.work.inventory.contains_key(&id) {
            return Err(StoreError::AlreadyExists(format!(
                "inventory for product {} at warehouse {}",
                key.0, key.1
            ))
            .into());
        }
        if !self.work.warehouses.contains_key(&key.1) {
            return Err(StoreError::Internal(format!("warehouse {} does not exist", key.1)).into());
        }
        self.work.by_key.insert(key, id);
        self.work.inventory.insert(id, inventory.clone());
        Ok(())
    }

    async fn update_inventory(&mut self, inventory: &Inventory) -> DomainResult<()> {
        let id = inventory.record().id;
        let slot = self
            .work
            .inventory
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("inventory {id}")))?;
        if slot.key() != inventory.key() {
            return Err(DomainError::invalid("inventory key cannot change"));
        }
        *slot = inventory.clone();
        Ok(())
    }

    async fn list_inventory(
        &mut self,
        filter: &InventoryFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<Inventory>> {
        let mut rows: Vec<Inventory> = self
            .work
            .inventory
            .values()
            .filter(|inv| inventory_matches(inv, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| cmp_inventory(a, b, sort));
        Ok(paginate(rows, page))
    }

    async fn count_inventory(&mut self, filter: &InventoryFilter) -> DomainResult<u64> {
        Ok(self
            .work
            .inventory
            .values()
            .filter(|inv| inventory_matches(inv, filter))
            .count() as u64)
    }

    async fn lock_rows(&mut self, keys: &[(ProductId, WarehouseId)]) -> DomainResult<()> {
        // The whole store is already held exclusively; only the order is checked.
        if keys.windows(2).any(|w| w[0] > w[1]) {
            return Err(DomainError::internal("row locks must be taken in key order"));
        }
        Ok(())
    }

    async fn inventory_totals(
        &mut self,
        warehouse: Option<WarehouseId>,
    ) -> DomainResult<InventoryTotals> {
        let mut totals = InventoryTotals::default();
        for inv in self
            .live_inventory()
            .filter(|inv| warehouse.is_none_or(|w| inv.warehouse_id() == w))
        {
            totals.items += 1;
            totals.units += inv.on_hand();
            totals.reserved += inv.reserved();
            totals.value += inv.value();
        }
        totals.value = totals.value.round_dp(2);
        Ok(totals)
    }
}

#[async_trait]
impl TransactionRepository for MemTx {
    async fn append_transaction(&mut self, tx: &InventoryTransaction) -> DomainResult<()> {
        if self.work.tx_index.contains_key(&tx.id) {
            return Err(StoreError::AlreadyExists(format!("transaction {}", tx.id)).into());
        }
        self.work.tx_index.insert(tx.id, self.work.transactions.len());
        self.work.transactions.push(tx.clone());
        Ok(())
    }

    async fn get_transaction(
        &mut self,
        id: TransactionId,
    ) -> DomainResult<Option<InventoryTransaction>> {
        Ok(self
            .work
            .tx_index
            .get(&id)
            .map(|&i| self.work.transactions[i].clone()))
    }

    async fn mark_approved(
        &mut self,
        id: TransactionId,
        at: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<()> {
        let idx = *self
            .work
            .tx_index
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;
        let row = &mut self.work.transactions[idx];
        if row.approved_at.is_some() {
            return Err(DomainError::invalid_state("transaction already approved"));
        }
        row.approved_at = Some(at);
        row.approved_by = Some(by);
        Ok(())
    }

    async fn list_transactions(
        &mut self,
        filter: &TransactionFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        let mut rows: Vec<InventoryTransaction> = self
            .work
            .transactions
            .iter()
            .filter(|tx| transaction_matches(tx, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| cmp_transaction(a, b, sort));
        Ok(paginate(rows, page))
    }

    async fn count_transactions(&mut self, filter: &TransactionFilter) -> DomainResult<u64> {
        Ok(self
            .work
            .transactions
            .iter()
            .filter(|tx| transaction_matches(tx, filter))
            .count() as u64)
    }

    async fn list_pair(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        // Append order is creation order.
        Ok(self
            .work
            .transactions
            .iter()
            .filter(|tx| tx.product_id == product && tx.warehouse_id == warehouse)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReconciliationRepository for MemTx {
    async fn create_reconciliation(&mut self, rec: &Reconciliation) -> DomainResult<()> {
        if self.work.reconciliations.iter().any(|r| r.id == rec.id) {
            return Err(StoreError::AlreadyExists(format!("reconciliation {}", rec.id)).into());
        }
        self.work.reconciliations.push(rec.clone());
        Ok(())
    }

    async fn list_reconciliations(
        &mut self,
        inventory_id: InventoryId,
    ) -> DomainResult<Vec<Reconciliation>> {
        Ok(self
            .work
            .reconciliations
            .iter()
            .rev()
            .filter(|r| r.inventory_id == inventory_id)
            .cloned()
            .collect())
    }
}
