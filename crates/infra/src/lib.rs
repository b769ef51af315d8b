//! Infrastructure layer: persistence backends, the transaction runner and the
//! inventory service that composes them.
//!
//! - [`store`]: repository traits plus in-memory and Postgres backends
//! - [`tx`]: `run_in_transaction` with bounded retry and cancellation
//! - [`query`]: whitelisted sorting, pagination and list filters
//! - [`service`]: [`InventoryService`], the operations callers use

pub mod error;
pub mod query;
pub mod service;
pub mod store;
pub mod tx;

pub use error::StoreError;
pub use query::{
    ApprovalFilter, InventoryFilter, ListParams, Page, Pagination, SortSpec, TransactionFilter,
    WarehouseFilter,
};
pub use service::{InventoryService, ServiceConfig};
pub use store::{InMemoryPersistence, Persistence, PostgresPersistence, StockTx};
pub use tx::{RetryPolicy, run_in_transaction};
