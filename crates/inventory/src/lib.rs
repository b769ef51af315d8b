//! Inventory domain module.
//!
//! This crate contains business rules for stock records, the movement ledger
//! and warehouses, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage).

pub mod inventory;
pub mod ledger;
pub mod reconciliation;
pub mod transaction;
pub mod validate;
pub mod warehouse;

pub use inventory::{Inventory, InventoryRecord, StockLevels, StockStatus};
pub use ledger::LedgerSummary;
pub use reconciliation::Reconciliation;
pub use transaction::{
    InventoryTransaction, NEAR_EXPIRY_DAYS, NewTransaction, Sign, TransactionType,
};
pub use warehouse::{
    Address, NewWarehouse, Warehouse, WarehouseExtended, WarehouseExtension, WarehouseKind,
    WarehousePatch, WarehouseRecord,
};
