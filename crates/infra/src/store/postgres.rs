//! Postgres-backed persistence.
//!
//! Every [`PgTx`] is a `SERIALIZABLE` transaction. Concurrent writers that
//! would observe each other's effects are aborted by Postgres and surface as
//! `CONFLICT`, which the transaction runner replays.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | Result | Scenario |
//! |------------|----------------------|--------|----------|
//! | Database (serialization failure) | `40001` | `CONFLICT` | Concurrent transaction touched the same rows |
//! | Database (deadlock detected) | `40P01` | `CONFLICT` | Lock cycle between transactions |
//! | Database (unique violation) | `23505` | `ALREADY_EXISTS` | Duplicate warehouse code or inventory key |
//! | Database (other) | Any other | `INTERNAL` | Check/foreign key violations, trigger errors |
//! | RowNotFound | N/A | `NOT_FOUND` | `fetch_one` without a row |
//! | Other | N/A | `INTERNAL` | Pool closed, network errors, etc. |
//!
//! ## Sorting
//!
//! `ORDER BY` is only ever built from [`SortSpec::column`], which is a
//! `&'static str` taken from the allow-list. Every value goes through
//! `push_bind`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockroom_core::{
    Cost, DomainError, DomainResult, Entity, InventoryId, ProductId, ReconciliationId,
    TransactionId, UserId, WarehouseId, check_movement, check_positive,
};
use stockroom_inventory::{
    Address, Inventory, InventoryRecord, InventoryTransaction, Reconciliation, TransactionType,
    Warehouse, WarehouseExtension, WarehouseRecord,
};

use crate::error::StoreError;
use crate::query::{
    ApprovalFilter, InventoryFilter, Pagination, SortSpec, TransactionFilter, WarehouseFilter,
};
use crate::store::{
    InventoryRepository, InventoryTotals, Persistence, ReconciliationRepository, StockTx,
    TransactionRepository, WarehouseRepository, live_row,
};

/// Schema applied by [`PostgresPersistence::migrate`].
pub const SCHEMA: &str = include_str!("../../migrations/0001_inventory_core.sql");

macro_rules! inventory_columns {
    () => {
        "id, product_id, warehouse_id, quantity_on_hand, quantity_reserved, reorder_level, \
         min_stock, max_stock, average_cost, last_counted_at, last_counted_by, created_at, \
         updated_at, updated_by, deleted_at"
    };
}

macro_rules! warehouse_columns {
    () => {
        "id, code, name, address_line1, address_line2, city, state, postal_code, country, \
         manager_id, phone, email, is_active, created_at, updated_at"
    };
}

macro_rules! transaction_columns {
    () => {
        "id, product_id, warehouse_id, transaction_type, quantity, reference_type, reference_id, \
         reason, unit_cost, total_cost, batch_number, serial_number, expiry_date, from_warehouse, \
         to_warehouse, created_at, created_by, approved_at, approved_by"
    };
}

macro_rules! reconciliation_columns {
    () => {
        "id, inventory_id, product_id, warehouse_id, system_quantity, physical_quantity, \
         variance, reason, reconciled_by, reconciled_at, adjustment_id"
    };
}

/// Map SQLx errors onto the domain error kinds.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    let store = match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                Some("23505") => StoreError::AlreadyExists(msg),
                Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Internal(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("row not found in {operation}")),
        sqlx::Error::PoolClosed => {
            StoreError::Internal(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Internal(format!("sqlx error in {operation}: {other}")),
    };
    store.into()
}

fn decode_error(what: &str, err: sqlx::Error) -> DomainError {
    DomainError::internal(format!("failed to decode {what} row: {err}"))
}

#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> DomainResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply [`SCHEMA`]. Every statement in it is idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> DomainResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn begin(&self) -> DomainResult<Box<dyn StockTx>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// One open `SERIALIZABLE` transaction.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StockTx for PgTx {
    async fn commit(self: Box<Self>) -> DomainResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

impl PgTx {
    /// A guarded update matched no row. Re-read the row and let the entity
    /// say why the operation is refused.
    async fn explain_refusal<F>(&mut self, product: ProductId, warehouse: WarehouseId, op: F) -> DomainError
    where
        F: FnOnce(&mut Inventory) -> DomainResult<()> + Send,
    {
        let row = match self.find_inventory(product, warehouse).await {
            Ok(row) => row,
            Err(e) => return e,
        };
        match live_row(row, product, warehouse) {
            Err(e) => e,
            Ok(mut inv) => match op(&mut inv) {
                Err(e) => e,
                Ok(()) => DomainError::conflict("inventory row changed during the operation"),
            },
        }
    }

    async fn fetch_inventory(&mut self, query: &'static str, operation: &str, binds: (Uuid, Option<Uuid>)) -> DomainResult<Option<Inventory>> {
        let mut q = sqlx::query(query).bind(binds.0);
        if let Some(second) = binds.1 {
            q = q.bind(second);
        }
        let row = q
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(|r| decode_inventory(&r)).transpose()
    }
}

// Filters

fn push_inventory_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &InventoryFilter) {
    if !f.include_deleted {
        qb.push(" AND deleted_at IS NULL");
    }
    if let Some(p) = f.product_id {
        qb.push(" AND product_id = ").push_bind(Uuid::from(p));
    }
    if let Some(w) = f.warehouse_id {
        qb.push(" AND warehouse_id = ").push_bind(Uuid::from(w));
    }
    if f.low_stock_only {
        qb.push(" AND quantity_on_hand <= reorder_level");
    }
}

fn push_transaction_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &TransactionFilter) {
    if let Some(p) = f.product_id {
        qb.push(" AND product_id = ").push_bind(Uuid::from(p));
    }
    if let Some(w) = f.warehouse_id {
        qb.push(" AND warehouse_id = ").push_bind(Uuid::from(w));
    }
    if !f.types.is_empty() {
        let types: Vec<String> = f.types.iter().map(|t| t.as_str().to_string()).collect();
        qb.push(" AND transaction_type = ANY(").push_bind(types).push(")");
    }
    if let Some(from) = f.created_from {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = f.created_to {
        qb.push(" AND created_at <= ").push_bind(to);
    }
    if let Some(r) = &f.reference_type {
        qb.push(" AND reference_type = ").push_bind(r.clone());
    }
    if let Some(r) = f.reference_id {
        qb.push(" AND reference_id = ").push_bind(r);
    }
    if let Some(b) = &f.batch_number {
        qb.push(" AND batch_number = ").push_bind(b.clone());
    }
    match f.approval {
        ApprovalFilter::Any => {}
        ApprovalFilter::Pending => {
            let gated: Vec<String> = TransactionType::ALL
                .iter()
                .filter(|t| t.is_approvable())
                .map(|t| t.as_str().to_string())
                .collect();
            qb.push(" AND approved_at IS NULL AND transaction_type = ANY(")
                .push_bind(gated)
                .push(")");
        }
        ApprovalFilter::Approved => {
            qb.push(" AND approved_at IS NOT NULL");
        }
    }
    if let Some(u) = f.created_by {
        qb.push(" AND created_by = ").push_bind(Uuid::from(u));
    }
    if let Some(from) = f.expires_from {
        qb.push(" AND expiry_date >= ").push_bind(from);
    }
    if let Some(to) = f.expires_to {
        qb.push(" AND expiry_date <= ").push_bind(to);
    }
    if f.stock_in_only {
        qb.push(" AND quantity > 0 AND transaction_type <> ")
            .push_bind(TransactionType::Count.as_str());
    }
}

fn push_warehouse_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &WarehouseFilter) {
    if f.active_only {
        qb.push(" AND is_active");
    }
    if let Some(s) = &f.search {
        let escaped = s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        qb.push(" AND (code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn push_order_and_page(qb: &mut QueryBuilder<'_, Postgres>, sort: SortSpec, page: Pagination) {
    qb.push(" ORDER BY ")
        .push(sort.column)
        .push(" ")
        .push(sort.direction())
        .push(", id ASC LIMIT ")
        .push_bind(i64::from(page.limit))
        .push(" OFFSET ")
        .push_bind(i64::try_from(page.offset()).unwrap_or(i64::MAX));
}

fn count_from(row: &PgRow) -> DomainResult<u64> {
    let total: i64 = row.try_get("total").map_err(|e| decode_error("count", e))?;
    Ok(total.max(0) as u64)
}

#[async_trait]
impl WarehouseRepository for PgTx {
    #[instrument(skip_all, fields(operation = "create_warehouse", code = %warehouse.code()), err)]
    async fn create_warehouse(&mut self, warehouse: &Warehouse) -> DomainResult<()> {
        let r = warehouse.record();
        sqlx::query(
            r#"
            INSERT INTO warehouses (
                id, code, name, address_line1, address_line2, city, state, postal_code,
                country, manager_id, phone, email, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(r.id.as_uuid())
        .bind(&r.code)
        .bind(&r.name)
        .bind(&r.address.line1)
        .bind(&r.address.line2)
        .bind(&r.address.city)
        .bind(&r.address.state)
        .bind(&r.address.postal_code)
        .bind(&r.address.country)
        .bind(r.manager_id.map(Uuid::from))
        .bind(&r.phone)
        .bind(&r.email)
        .bind(r.is_active)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_warehouse", e))?;
        Ok(())
    }

    async fn get_warehouse(&mut self, id: WarehouseId) -> DomainResult<Option<Warehouse>> {
        let row = sqlx::query(concat!("SELECT ", warehouse_columns!(), " FROM warehouses WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_warehouse", e))?;
        row.map(|r| decode_warehouse(&r)).transpose()
    }

    async fn get_warehouse_by_code(&mut self, code: &str) -> DomainResult<Option<Warehouse>> {
        let row = sqlx::query(concat!("SELECT ", warehouse_columns!(), " FROM warehouses WHERE code = $1"))
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("get_warehouse_by_code", e))?;
        row.map(|r| decode_warehouse(&r)).transpose()
    }

    #[instrument(skip_all, fields(operation = "update_warehouse", warehouse_id = %warehouse.id()), err)]
    async fn update_warehouse(&mut self, warehouse: &Warehouse) -> DomainResult<()> {
        let r = warehouse.record();
        let done = sqlx::query(
            r#"
            UPDATE warehouses
            SET name = $2, address_line1 = $3, address_line2 = $4, city = $5, state = $6,
                postal_code = $7, country = $8, manager_id = $9, phone = $10, email = $11,
                is_active = $12, updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(r.id.as_uuid())
        .bind(&r.name)
        .bind(&r.address.line1)
        .bind(&r.address.line2)
        .bind(&r.address.city)
        .bind(&r.address.state)
        .bind(&r.address.postal_code)
        .bind(&r.address.country)
        .bind(r.manager_id.map(Uuid::from))
        .bind(&r.phone)
        .bind(&r.email)
        .bind(r.is_active)
        .bind(r.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_warehouse", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("warehouse {}", r.id)).into());
        }
        Ok(())
    }

    #[instrument(skip(self), fields(operation = "delete_warehouse"), err)]
    async fn delete_warehouse(&mut self, id: WarehouseId) -> DomainResult<()> {
        // Inventory rows restrict the delete; only rows without history reach here.
        sqlx::query(
            "DELETE FROM inventory i WHERE i.warehouse_id = $1 AND NOT EXISTS \
             (SELECT 1 FROM inventory_transactions t \
              WHERE t.product_id = i.product_id AND t.warehouse_id = i.warehouse_id)",
        )
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_warehouse", e))?;
        let done = sqlx::query("DELETE FROM warehouses WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_warehouse", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("warehouse {id}")).into());
        }
        Ok(())
    }

    async fn list_warehouses(
        &mut self,
        filter: &WarehouseFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<Warehouse>> {
        let mut qb = QueryBuilder::<Postgres>::new(concat!(
            "SELECT ",
            warehouse_columns!(),
            " FROM warehouses WHERE TRUE"
        ));
        push_warehouse_filter(&mut qb, filter);
        push_order_and_page(&mut qb, sort, page);
        let rows = qb
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_warehouses", e))?;
        rows.iter().map(decode_warehouse).collect()
    }

    async fn count_warehouses(&mut self, filter: &WarehouseFilter) -> DomainResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM warehouses WHERE TRUE");
        push_warehouse_filter(&mut qb, filter);
        let row = qb
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_warehouses", e))?;
        count_from(&row)
    }

    async fn put_extension(
        &mut self,
        id: WarehouseId,
        ext: &WarehouseExtension,
    ) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO warehouse_extensions (
                warehouse_id, kind, capacity, square_footage, dock_count,
                temperature_controlled, security_level
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (warehouse_id)
            DO UPDATE SET
                kind = EXCLUDED.kind,
                capacity = EXCLUDED.capacity,
                square_footage = EXCLUDED.square_footage,
                dock_count = EXCLUDED.dock_count,
                temperature_controlled = EXCLUDED.temperature_controlled,
                security_level = EXCLUDED.security_level
            "#,
        )
        .bind(id.as_uuid())
        .bind(ext.kind.as_str())
        .bind(ext.capacity)
        .bind(ext.square_footage)
        .bind(ext.dock_count)
        .bind(ext.temperature_controlled)
        .bind(ext.security_level)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_extension", e))?;
        Ok(())
    }

    async fn get_extension(&mut self, id: WarehouseId) -> DomainResult<Option<WarehouseExtension>> {
        let row = sqlx::query(
            r#"
            SELECT kind, capacity, square_footage, dock_count, temperature_controlled, security_level
            FROM warehouse_extensions
            WHERE warehouse_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_extension", e))?;
        row.map(|r| {
            ExtensionRow::from_row(&r)
                .map_err(|e| decode_error("warehouse_extensions", e))?
                .into_domain()
        })
        .transpose()
    }

    async fn current_stock(&mut self, id: WarehouseId) -> DomainResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity_on_hand), 0)::BIGINT AS total
            FROM inventory
            WHERE warehouse_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("current_stock", e))?;
        row.try_get("total").map_err(|e| decode_error("current_stock", e))
    }
}

#[async_trait]
impl InventoryRepository for PgTx {
    async fn get_inventory(&mut self, id: InventoryId) -> DomainResult<Option<Inventory>> {
        self.fetch_inventory(
            concat!("SELECT ", inventory_columns!(), " FROM inventory WHERE id = $1"),
            "get_inventory",
            (Uuid::from(id), None),
        )
        .await
    }

    async fn find_inventory(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
    ) -> DomainResult<Option<Inventory>> {
        self.fetch_inventory(
            concat!(
                "SELECT ",
                inventory_columns!(),
                " FROM inventory WHERE product_id = $1 AND warehouse_id = $2"
            ),
            "find_inventory",
            (Uuid::from(product), Some(Uuid::from(warehouse))),
        )
        .await
    }

    #[instrument(skip_all, fields(operation = "create_inventory", inventory_id = %inventory.record().id), err)]
    async fn create_inventory(&mut self, inventory: &Inventory) -> DomainResult<()> {
        let r = inventory.record();
        sqlx::query(
            r#"
            INSERT INTO inventory (
                id, product_id, warehouse_id, quantity_on_hand, quantity_reserved, reorder_level,
                min_stock, max_stock, average_cost, last_counted_at, last_counted_by, created_at,
                updated_at, updated_by, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(r.id.as_uuid())
        .bind(r.product_id.as_uuid())
        .bind(r.warehouse_id.as_uuid())
        .bind(r.quantity_on_hand)
        .bind(r.quantity_reserved)
        .bind(r.reorder_level)
        .bind(r.min_stock)
        .bind(r.max_stock)
        .bind(r.average_cost.amount())
        .bind(r.last_counted_at)
        .bind(r.last_counted_by.map(Uuid::from))
        .bind(r.created_at)
        .bind(r.updated_at)
        .bind(r.updated_by.map(Uuid::from))
        .bind(r.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_inventory", e))?;
        Ok(())
    }

    #[instrument(skip_all, fields(operation = "update_inventory", inventory_id = %inventory.record().id), err)]
    async fn update_inventory(&mut self, inventory: &Inventory) -> DomainResult<()> {
        let r = inventory.record();
        let done = sqlx::query(
            r#"
            UPDATE inventory
            SET quantity_on_hand = $2, quantity_reserved = $3, reorder_level = $4,
                min_stock = $5, max_stock = $6, average_cost = $7, last_counted_at = $8,
                last_counted_by = $9, updated_at = $10, updated_by = $11, deleted_at = $12
            WHERE id = $1
            "#,
        )
        .bind(r.id.as_uuid())
        .bind(r.quantity_on_hand)
        .bind(r.quantity_reserved)
        .bind(r.reorder_level)
        .bind(r.min_stock)
        .bind(r.max_stock)
        .bind(r.average_cost.amount())
        .bind(r.last_counted_at)
        .bind(r.last_counted_by.map(Uuid::from))
        .bind(r.updated_at)
        .bind(r.updated_by.map(Uuid::from))
        .bind(r.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_inventory", e))?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("inventory {}", r.id)).into());
        }
        Ok(())
    }

    async fn list_inventory(
        &mut self,
        filter: &InventoryFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<Inventory>> {
        let mut qb = QueryBuilder::<Postgres>::new(concat!(
            "SELECT ",
            inventory_columns!(),
            " FROM inventory WHERE TRUE"
        ));
        push_inventory_filter(&mut qb, filter);
        push_order_and_page(&mut qb, sort, page);
        let rows = qb
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_inventory", e))?;
        rows.iter().map(decode_inventory).collect()
    }

    async fn count_inventory(&mut self, filter: &InventoryFilter) -> DomainResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) AS total FROM inventory WHERE TRUE");
        push_inventory_filter(&mut qb, filter);
        let row = qb
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_inventory", e))?;
        count_from(&row)
    }

    #[instrument(skip_all, fields(operation = "lock_rows", rows = keys.len()), err)]
    async fn lock_rows(&mut self, keys: &[(ProductId, WarehouseId)]) -> DomainResult<()> {
        if keys.windows(2).any(|w| w[0] > w[1]) {
            return Err(DomainError::internal("row locks must be taken in key order"));
        }
        for (product, warehouse) in keys {
            sqlx::query(
                "SELECT id FROM inventory WHERE product_id = $1 AND warehouse_id = $2 FOR UPDATE",
            )
            .bind(product.as_uuid())
            .bind(warehouse.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_rows", e))?;
        }
        Ok(())
    }

    async fn inventory_totals(
        &mut self,
        warehouse: Option<WarehouseId>,
    ) -> DomainResult<InventoryTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS items,
                COALESCE(SUM(quantity_on_hand), 0)::BIGINT AS units,
                COALESCE(SUM(quantity_reserved), 0)::BIGINT AS reserved,
                ROUND(COALESCE(SUM(quantity_on_hand * average_cost), 0), 2) AS value
            FROM inventory
            WHERE deleted_at IS NULL AND ($1::uuid IS NULL OR warehouse_id = $1)
            "#,
        )
        .bind(warehouse.map(Uuid::from))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("inventory_totals", e))?;
        let items: i64 = row.try_get("items").map_err(|e| decode_error("totals", e))?;
        Ok(InventoryTotals {
            items: items.max(0) as u64,
            units: row.try_get("units").map_err(|e| decode_error("totals", e))?,
            reserved: row.try_get("reserved").map_err(|e| decode_error("totals", e))?,
            value: row.try_get("value").map_err(|e| decode_error("totals", e))?,
        })
    }

    #[instrument(skip(self, now), fields(operation = "adjust_stock"), err)]
    async fn adjust_stock(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
        delta: i64,
        now: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<Inventory> {
        check_movement("delta", delta)?;
        let row = sqlx::query(concat!(
            "UPDATE inventory ",
            "SET quantity_on_hand = quantity_on_hand + $3, updated_at = $4, updated_by = $5 ",
            "WHERE product_id = $1 AND warehouse_id = $2 AND deleted_at IS NULL ",
            "AND quantity_on_hand + $3 >= quantity_reserved ",
            "AND quantity_on_hand + $3 <= 1000000000 ",
            "RETURNING ",
            inventory_columns!()
        ))
        .bind(product.as_uuid())
        .bind(warehouse.as_uuid())
        .bind(delta)
        .bind(now)
        .bind(by.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_stock", e))?;
        match row {
            Some(row) => decode_inventory(&row),
            None => Err(self.explain_refusal(product, warehouse, |inv| inv.adjust(delta, now)).await),
        }
    }

    #[instrument(skip(self, now), fields(operation = "reserve_stock"), err)]
    async fn reserve_stock(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
        quantity: i64,
        now: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<Inventory> {
        check_positive("quantity", quantity)?;
        let row = sqlx::query(concat!(
            "UPDATE inventory ",
            "SET quantity_reserved = quantity_reserved + $3, updated_at = $4, updated_by = $5 ",
            "WHERE product_id = $1 AND warehouse_id = $2 AND deleted_at IS NULL ",
            "AND quantity_on_hand - quantity_reserved >= $3 ",
            "RETURNING ",
            inventory_columns!()
        ))
        .bind(product.as_uuid())
        .bind(warehouse.as_uuid())
        .bind(quantity)
        .bind(now)
        .bind(by.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("reserve_stock", e))?;
        match row {
            Some(row) => decode_inventory(&row),
            None => Err(self.explain_refusal(product, warehouse, |inv| inv.reserve(quantity, now)).await),
        }
    }

    #[instrument(skip(self, now), fields(operation = "release_stock"), err)]
    async fn release_stock(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
        quantity: i64,
        now: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<Inventory> {
        check_positive("quantity", quantity)?;
        let row = sqlx::query(concat!(
            "UPDATE inventory ",
            "SET quantity_reserved = quantity_reserved - $3, updated_at = $4, updated_by = $5 ",
            "WHERE product_id = $1 AND warehouse_id = $2 AND deleted_at IS NULL ",
            "AND quantity_reserved >= $3 ",
            "RETURNING ",
            inventory_columns!()
        ))
        .bind(product.as_uuid())
        .bind(warehouse.as_uuid())
        .bind(quantity)
        .bind(now)
        .bind(by.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("release_stock", e))?;
        match row {
            Some(row) => decode_inventory(&row),
            None => Err(self.explain_refusal(product, warehouse, |inv| inv.release(quantity, now)).await),
        }
    }
}

#[async_trait]
impl TransactionRepository for PgTx {
    #[instrument(
        skip_all,
        fields(
            operation = "append_transaction",
            transaction_id = %tx.id,
            transaction_type = %tx.transaction_type
        ),
        err
    )]
    async fn append_transaction(&mut self, tx: &InventoryTransaction) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_transactions (
                id, product_id, warehouse_id, transaction_type, quantity, reference_type,
                reference_id, reason, unit_cost, total_cost, batch_number, serial_number,
                expiry_date, from_warehouse, to_warehouse, created_at, created_by,
                approved_at, approved_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(tx.id.as_uuid())
        .bind(tx.product_id.as_uuid())
        .bind(tx.warehouse_id.as_uuid())
        .bind(tx.transaction_type.as_str())
        .bind(tx.quantity)
        .bind(&tx.reference_type)
        .bind(tx.reference_id)
        .bind(&tx.reason)
        .bind(tx.unit_cost.map(|c| c.amount()))
        .bind(tx.total_cost)
        .bind(&tx.batch_number)
        .bind(&tx.serial_number)
        .bind(tx.expiry_date)
        .bind(tx.from_warehouse.map(Uuid::from))
        .bind(tx.to_warehouse.map(Uuid::from))
        .bind(tx.created_at)
        .bind(tx.created_by.as_uuid())
        .bind(tx.approved_at)
        .bind(tx.approved_by.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_transaction", e))?;
        Ok(())
    }

    async fn get_transaction(
        &mut self,
        id: TransactionId,
    ) -> DomainResult<Option<InventoryTransaction>> {
        let row = sqlx::query(concat!(
            "SELECT ",
            transaction_columns!(),
            " FROM inventory_transactions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("get_transaction", e))?;
        row.map(|r| decode_transaction(&r)).transpose()
    }

    #[instrument(skip(self, at), fields(operation = "mark_approved"), err)]
    async fn mark_approved(
        &mut self,
        id: TransactionId,
        at: DateTime<Utc>,
        by: UserId,
    ) -> DomainResult<()> {
        let done = sqlx::query(
            r#"
            UPDATE inventory_transactions
            SET approved_at = $2, approved_by = $3
            WHERE id = $1 AND approved_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .bind(by.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("mark_approved", e))?;
        if done.rows_affected() == 1 {
            return Ok(());
        }
        match self.get_transaction(id).await? {
            None => Err(StoreError::NotFound(format!("transaction {id}")).into()),
            Some(_) => Err(DomainError::invalid_state("transaction already approved")),
        }
    }

    async fn list_transactions(
        &mut self,
        filter: &TransactionFilter,
        sort: SortSpec,
        page: Pagination,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        let mut qb = QueryBuilder::<Postgres>::new(concat!(
            "SELECT ",
            transaction_columns!(),
            " FROM inventory_transactions WHERE TRUE"
        ));
        push_transaction_filter(&mut qb, filter);
        push_order_and_page(&mut qb, sort, page);
        let rows = qb
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("list_transactions", e))?;
        rows.iter().map(decode_transaction).collect()
    }

    async fn count_transactions(&mut self, filter: &TransactionFilter) -> DomainResult<u64> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) AS total FROM inventory_transactions WHERE TRUE",
        );
        push_transaction_filter(&mut qb, filter);
        let row = qb
            .build()
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_transactions", e))?;
        count_from(&row)
    }

    async fn list_pair(
        &mut self,
        product: ProductId,
        warehouse: WarehouseId,
    ) -> DomainResult<Vec<InventoryTransaction>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            transaction_columns!(),
            " FROM inventory_transactions WHERE product_id = $1 AND warehouse_id = $2 ",
            "ORDER BY created_at ASC, id ASC"
        ))
        .bind(product.as_uuid())
        .bind(warehouse.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_pair", e))?;
        rows.iter().map(decode_transaction).collect()
    }
}

#[async_trait]
impl ReconciliationRepository for PgTx {
    #[instrument(skip_all, fields(operation = "create_reconciliation", reconciliation_id = %rec.id), err)]
    async fn create_reconciliation(&mut self, rec: &Reconciliation) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inventory_reconciliations (
                id, inventory_id, product_id, warehouse_id, system_quantity, physical_quantity,
                variance, reason, reconciled_by, reconciled_at, adjustment_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(rec.id.as_uuid())
        .bind(rec.inventory_id.as_uuid())
        .bind(rec.product_id.as_uuid())
        .bind(rec.warehouse_id.as_uuid())
        .bind(rec.system_quantity)
        .bind(rec.physical_quantity)
        .bind(rec.variance)
        .bind(&rec.reason)
        .bind(rec.reconciled_by.as_uuid())
        .bind(rec.reconciled_at)
        .bind(rec.adjustment_id.map(Uuid::from))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("create_reconciliation", e))?;
        Ok(())
    }

    async fn list_reconciliations(
        &mut self,
        inventory_id: InventoryId,
    ) -> DomainResult<Vec<Reconciliation>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            reconciliation_columns!(),
            " FROM inventory_reconciliations WHERE inventory_id = $1 ",
            "ORDER BY reconciled_at DESC, id DESC"
        ))
        .bind(inventory_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("list_reconciliations", e))?;
        rows.iter()
            .map(|r| {
                ReconciliationRow::from_row(r)
                    .map(ReconciliationRow::into_domain)
                    .map_err(|e| decode_error("inventory_reconciliations", e))
            })
            .collect()
    }
}

// SQLx row types

fn decode_inventory(row: &PgRow) -> DomainResult<Inventory> {
    InventoryRow::from_row(row)
        .map_err(|e| decode_error("inventory", e))?
        .into_domain()
}

fn decode_warehouse(row: &PgRow) -> DomainResult<Warehouse> {
    WarehouseRow::from_row(row)
        .map_err(|e| decode_error("warehouses", e))?
        .into_domain()
}

fn decode_transaction(row: &PgRow) -> DomainResult<InventoryTransaction> {
    TransactionRow::from_row(row)
        .map_err(|e| decode_error("inventory_transactions", e))?
        .into_domain()
}

fn stored_cost(value: Decimal) -> DomainResult<Cost> {
    Cost::new(value).map_err(|e| DomainError::internal(format!("stored cost {value}: {}", e.message())))
}

#[derive(Debug)]
struct InventoryRow {
    id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    quantity_on_hand: i64,
    quantity_reserved: i64,
    reorder_level: i64,
    min_stock: Option<i64>,
    max_stock: Option<i64>,
    average_cost: Decimal,
    last_counted_at: Option<DateTime<Utc>>,
    last_counted_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    updated_by: Option<Uuid>,
    deleted_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for InventoryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InventoryRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            quantity_on_hand: row.try_get("quantity_on_hand")?,
            quantity_reserved: row.try_get("quantity_reserved")?,
            reorder_level: row.try_get("reorder_level")?,
            min_stock: row.try_get("min_stock")?,
            max_stock: row.try_get("max_stock")?,
            average_cost: row.try_get("average_cost")?,
            last_counted_at: row.try_get("last_counted_at")?,
            last_counted_by: row.try_get("last_counted_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            updated_by: row.try_get("updated_by")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl InventoryRow {
    fn into_domain(self) -> DomainResult<Inventory> {
        Inventory::restore(InventoryRecord {
            id: InventoryId::from_uuid(self.id),
            product_id: ProductId::from_uuid(self.product_id),
            warehouse_id: WarehouseId::from_uuid(self.warehouse_id),
            quantity_on_hand: self.quantity_on_hand,
            quantity_reserved: self.quantity_reserved,
            reorder_level: self.reorder_level,
            min_stock: self.min_stock,
            max_stock: self.max_stock,
            average_cost: stored_cost(self.average_cost)?,
            last_counted_at: self.last_counted_at,
            last_counted_by: self.last_counted_by.map(UserId::from_uuid),
            created_at: self.created_at,
            updated_at: self.updated_at,
            updated_by: self.updated_by.map(UserId::from_uuid),
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(Debug)]
struct WarehouseRow {
    id: Uuid,
    code: String,
    name: String,
    address_line1: String,
    address_line2: Option<String>,
    city: String,
    state: Option<String>,
    postal_code: String,
    country: String,
    manager_id: Option<Uuid>,
    phone: Option<String>,
    email: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for WarehouseRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(WarehouseRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            address_line1: row.try_get("address_line1")?,
            address_line2: row.try_get("address_line2")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            postal_code: row.try_get("postal_code")?,
            country: row.try_get("country")?,
            manager_id: row.try_get("manager_id")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl WarehouseRow {
    fn into_domain(self) -> DomainResult<Warehouse> {
        Warehouse::restore(WarehouseRecord {
            id: WarehouseId::from_uuid(self.id),
            code: self.code,
            name: self.name,
            address: Address {
                line1: self.address_line1,
                line2: self.address_line2,
                city: self.city,
                state: self.state,
                postal_code: self.postal_code,
                country: self.country,
            },
            manager_id: self.manager_id.map(UserId::from_uuid),
            phone: self.phone,
            email: self.email,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug)]
struct ExtensionRow {
    kind: String,
    capacity: Option<i64>,
    square_footage: Option<i64>,
    dock_count: Option<i32>,
    temperature_controlled: bool,
    security_level: i32,
}

impl<'r> FromRow<'r, PgRow> for ExtensionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ExtensionRow {
            kind: row.try_get("kind")?,
            capacity: row.try_get("capacity")?,
            square_footage: row.try_get("square_footage")?,
            dock_count: row.try_get("dock_count")?,
            temperature_controlled: row.try_get("temperature_controlled")?,
            security_level: row.try_get("security_level")?,
        })
    }
}

impl ExtensionRow {
    fn into_domain(self) -> DomainResult<WarehouseExtension> {
        Ok(WarehouseExtension {
            kind: self.kind.parse()?,
            capacity: self.capacity,
            square_footage: self.square_footage,
            dock_count: self.dock_count,
            temperature_controlled: self.temperature_controlled,
            security_level: self.security_level,
        })
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    transaction_type: String,
    quantity: i64,
    reference_type: Option<String>,
    reference_id: Option<Uuid>,
    reason: String,
    unit_cost: Option<Decimal>,
    total_cost: Option<Decimal>,
    batch_number: Option<String>,
    serial_number: Option<String>,
    expiry_date: Option<DateTime<Utc>>,
    from_warehouse: Option<Uuid>,
    to_warehouse: Option<Uuid>,
    created_at: DateTime<Utc>,
    created_by: Uuid,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            transaction_type: row.try_get("transaction_type")?,
            quantity: row.try_get("quantity")?,
            reference_type: row.try_get("reference_type")?,
            reference_id: row.try_get("reference_id")?,
            reason: row.try_get("reason")?,
            unit_cost: row.try_get("unit_cost")?,
            total_cost: row.try_get("total_cost")?,
            batch_number: row.try_get("batch_number")?,
            serial_number: row.try_get("serial_number")?,
            expiry_date: row.try_get("expiry_date")?,
            from_warehouse: row.try_get("from_warehouse")?,
            to_warehouse: row.try_get("to_warehouse")?,
            created_at: row.try_get("created_at")?,
            created_by: row.try_get("created_by")?,
            approved_at: row.try_get("approved_at")?,
            approved_by: row.try_get("approved_by")?,
        })
    }
}

impl TransactionRow {
    // Rows were validated on the way in; the schema's CHECKs hold the rest.
    fn into_domain(self) -> DomainResult<InventoryTransaction> {
        Ok(InventoryTransaction {
            id: TransactionId::from_uuid(self.id),
            product_id: ProductId::from_uuid(self.product_id),
            warehouse_id: WarehouseId::from_uuid(self.warehouse_id),
            transaction_type: self.transaction_type.parse()?,
            quantity: self.quantity,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            reason: self.reason,
            unit_cost: self.unit_cost.map(stored_cost).transpose()?,
            total_cost: self.total_cost,
            batch_number: self.batch_number,
            serial_number: self.serial_number,
            expiry_date: self.expiry_date,
            from_warehouse: self.from_warehouse.map(WarehouseId::from_uuid),
            to_warehouse: self.to_warehouse.map(WarehouseId::from_uuid),
            created_at: self.created_at,
            created_by: UserId::from_uuid(self.created_by),
            approved_at: self.approved_at,
            approved_by: self.approved_by.map(UserId::from_uuid),
        })
    }
}

#[derive(Debug)]
struct ReconciliationRow {
    id: Uuid,
    inventory_id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    system_quantity: i64,
    physical_quantity: i64,
    variance: i64,
    reason: String,
    reconciled_by: Uuid,
    reconciled_at: DateTime<Utc>,
    adjustment_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for ReconciliationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReconciliationRow {
            id: row.try_get("id")?,
            inventory_id: row.try_get("inventory_id")?,
            product_id: row.try_get("product_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            system_quantity: row.try_get("system_quantity")?,
            physical_quantity: row.try_get("physical_quantity")?,
            variance: row.try_get("variance")?,
            reason: row.try_get("reason")?,
            reconciled_by: row.try_get("reconciled_by")?,
            reconciled_at: row.try_get("reconciled_at")?,
            adjustment_id: row.try_get("adjustment_id")?,
        })
    }
}

impl ReconciliationRow {
    fn into_domain(self) -> Reconciliation {
        Reconciliation {
            id: ReconciliationId::from_uuid(self.id),
            inventory_id: InventoryId::from_uuid(self.inventory_id),
            product_id: ProductId::from_uuid(self.product_id),
            warehouse_id: WarehouseId::from_uuid(self.warehouse_id),
            system_quantity: self.system_quantity,
            physical_quantity: self.physical_quantity,
            variance: self.variance,
            reason: self.reason,
            reconciled_by: UserId::from_uuid(self.reconciled_by),
            reconciled_at: self.reconciled_at,
            adjustment_id: self.adjustment_id.map(TransactionId::from_uuid),
        }
    }
}
