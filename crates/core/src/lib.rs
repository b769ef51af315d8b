//! `stockroom-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, costs and quantity bounds, the error model and the injectable
//! clock.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{
    IdGenerator, InventoryId, ProductId, ReconciliationId, TransactionId, UserId, UuidV7Generator,
    WarehouseId,
};
pub use money::{Cost, MAX_QUANTITY, check_level, check_movement, check_positive, round_cents};
