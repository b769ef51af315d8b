//! Inventory transactions: the append-only movement ledger.
//!
//! A transaction is validated once, at creation. Afterwards the approval pair
//! (`approved_at`, `approved_by`) is the only thing that may change.

use core::str::FromStr;

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockroom_core::{
    Cost, DomainError, DomainResult, Entity, MAX_QUANTITY, ProductId, TransactionId, UserId,
    WarehouseId, check_movement, money::cost_tolerance, round_cents,
};

use crate::validate;

/// Default window for [`InventoryTransaction::is_near_expiry`].
pub const NEAR_EXPIRY_DAYS: i64 = 30;

/// Expiry dates further out than this (at creation) are rejected.
const MAX_EXPIRY_MONTHS: u32 = 120;

/// Required quantity sign for a transaction type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sign {
    Positive,
    Negative,
    Either,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Sale,
    Adjustment,
    TransferIn,
    TransferOut,
    Return,
    Damage,
    Theft,
    Expiry,
    Production,
    Consumption,
    Count,
}

impl TransactionType {
    pub const ALL: [TransactionType; 12] = [
        TransactionType::Purchase,
        TransactionType::Sale,
        TransactionType::Adjustment,
        TransactionType::TransferIn,
        TransactionType::TransferOut,
        TransactionType::Return,
        TransactionType::Damage,
        TransactionType::Theft,
        TransactionType::Expiry,
        TransactionType::Production,
        TransactionType::Consumption,
        TransactionType::Count,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Sale => "sale",
            TransactionType::Adjustment => "adjustment",
            TransactionType::TransferIn => "transfer_in",
            TransactionType::TransferOut => "transfer_out",
            TransactionType::Return => "return",
            TransactionType::Damage => "damage",
            TransactionType::Theft => "theft",
            TransactionType::Expiry => "expiry",
            TransactionType::Production => "production",
            TransactionType::Consumption => "consumption",
            TransactionType::Count => "count",
        }
    }

    pub fn sign(self) -> Sign {
        match self {
            TransactionType::Purchase
            | TransactionType::TransferIn
            | TransactionType::Return
            | TransactionType::Production
            | TransactionType::Count => Sign::Positive,
            TransactionType::Sale
            | TransactionType::TransferOut
            | TransactionType::Damage
            | TransactionType::Theft
            | TransactionType::Expiry
            | TransactionType::Consumption => Sign::Negative,
            TransactionType::Adjustment => Sign::Either,
        }
    }

    /// Approval-gated types: written pending, effective once approved.
    pub fn is_approvable(self) -> bool {
        matches!(
            self,
            TransactionType::Adjustment
                | TransactionType::Damage
                | TransactionType::Theft
                | TransactionType::Expiry
        )
    }

    pub fn is_transfer(self) -> bool {
        matches!(self, TransactionType::TransferIn | TransactionType::TransferOut)
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::invalid(format!("unknown transaction type '{s}'")))
    }
}

/// Input for [`InventoryTransaction::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub reason: String,
    pub unit_cost: Option<Cost>,
    pub total_cost: Option<Decimal>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub from_warehouse: Option<WarehouseId>,
    pub to_warehouse: Option<WarehouseId>,
    pub created_by: UserId,
}

impl NewTransaction {
    /// Bare movement; optional fields are filled in with struct update syntax.
    pub fn new(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        transaction_type: TransactionType,
        quantity: i64,
        reason: impl Into<String>,
        created_by: UserId,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            transaction_type,
            quantity,
            reference_type: None,
            reference_id: None,
            reason: reason.into(),
            unit_cost: None,
            total_cost: None,
            batch_number: None,
            serial_number: None,
            expiry_date: None,
            from_warehouse: None,
            to_warehouse: None,
            created_by,
        }
    }

    pub fn with_transfer(mut self, from: WarehouseId, to: WarehouseId) -> Self {
        self.from_warehouse = Some(from);
        self.to_warehouse = Some(to);
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: Cost) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryTransaction {
    pub id: TransactionId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub reason: String,
    pub unit_cost: Option<Cost>,
    pub total_cost: Option<Decimal>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub from_warehouse: Option<WarehouseId>,
    pub to_warehouse: Option<WarehouseId>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<UserId>,
}

impl InventoryTransaction {
    /// Validate `new` and stamp it.
    ///
    /// Count rows are snapshots and may carry zero. When only a unit cost is
    /// given, the total is derived as `unit · |q|`.
    pub fn create(
        id: TransactionId,
        new: NewTransaction,
        now: DateTime<Utc>,
        max_reason_len: usize,
    ) -> DomainResult<Self> {
        let t = new.transaction_type;

        if t == TransactionType::Count {
            if new.quantity < 0 || new.quantity > MAX_QUANTITY {
                return Err(DomainError::invalid(format!(
                    "count quantity must be between 0 and {MAX_QUANTITY}"
                )));
            }
        } else {
            check_movement("quantity", new.quantity)?;
            match t.sign() {
                Sign::Positive if new.quantity < 0 => {
                    return Err(DomainError::invalid(format!("{t} quantity must be positive")));
                }
                Sign::Negative if new.quantity > 0 => {
                    return Err(DomainError::invalid(format!("{t} quantity must be negative")));
                }
                _ => {}
            }
        }

        validate::max_len("reason", &new.reason, max_reason_len)?;

        match (&new.reference_type, new.reference_id) {
            (Some(kind), Some(_)) => validate::reference_type(kind)?,
            (None, None) => {}
            _ => {
                return Err(DomainError::invalid(
                    "reference_type and reference_id must be given together",
                ));
            }
        }

        if let Some(batch) = &new.batch_number {
            validate::lot_token("batch_number", batch)?;
        }
        if let Some(serial) = &new.serial_number {
            validate::lot_token("serial_number", serial)?;
        }
        if let Some(expiry) = new.expiry_date {
            if expiry <= now {
                return Err(DomainError::invalid("expiry_date must be in the future"));
            }
            let horizon = now
                .checked_add_months(Months::new(MAX_EXPIRY_MONTHS))
                .ok_or_else(|| DomainError::internal("expiry horizon overflow"))?;
            if expiry > horizon {
                return Err(DomainError::invalid("expiry_date cannot be more than 10 years ahead"));
            }
        }

        let total_cost = match (new.unit_cost, new.total_cost) {
            (_, Some(total)) if total < Decimal::ZERO => {
                return Err(DomainError::invalid("total_cost cannot be negative"));
            }
            (Some(unit), Some(total)) => {
                let total = round_cents(total);
                let expected = unit.amount() * Decimal::from(new.quantity.unsigned_abs());
                if (total - expected).abs() > cost_tolerance() {
                    return Err(DomainError::invalid(format!(
                        "total_cost {total} does not match unit_cost {unit} x {}",
                        new.quantity.abs()
                    )));
                }
                Some(total)
            }
            (Some(unit), None) => Some(unit.extend(new.quantity)),
            (None, total) => total.map(round_cents),
        };

        if t.is_transfer() {
            let (Some(from), Some(to)) = (new.from_warehouse, new.to_warehouse) else {
                return Err(DomainError::invalid(
                    "transfers must carry both from_warehouse and to_warehouse",
                ));
            };
            if from == to {
                return Err(DomainError::invalid(
                    "source and destination warehouses cannot be the same",
                ));
            }
            let own = if t == TransactionType::TransferOut { from } else { to };
            if new.warehouse_id != own {
                return Err(DomainError::invalid(format!(
                    "{t} row must be booked at warehouse {own}"
                )));
            }
        } else if new.from_warehouse.is_some() || new.to_warehouse.is_some() {
            return Err(DomainError::invalid(format!("{t} cannot carry transfer warehouses")));
        }

        Ok(Self {
            id,
            product_id: new.product_id,
            warehouse_id: new.warehouse_id,
            transaction_type: t,
            quantity: new.quantity,
            reference_type: new.reference_type,
            reference_id: new.reference_id,
            reason: new.reason,
            unit_cost: new.unit_cost,
            total_cost,
            batch_number: new.batch_number,
            serial_number: new.serial_number,
            expiry_date: new.expiry_date,
            from_warehouse: new.from_warehouse,
            to_warehouse: new.to_warehouse,
            created_at: now,
            created_by: new.created_by,
            approved_at: None,
            approved_by: None,
        })
    }

    pub fn requires_approval(&self) -> bool {
        self.transaction_type.is_approvable()
    }

    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }

    pub fn approve(&mut self, by: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.requires_approval() {
            return Err(DomainError::invalid_state(format!(
                "{} transactions do not require approval",
                self.transaction_type
            )));
        }
        if self.is_approved() {
            return Err(DomainError::invalid_state("transaction already approved"));
        }
        self.approved_at = Some(now);
        self.approved_by = Some(by);
        Ok(())
    }

    /// Counts toward derived totals: not gated, or gated and approved.
    pub fn is_effective(&self) -> bool {
        !self.requires_approval() || self.is_approved()
    }

    /// Contribution to on-hand stock. Count rows are snapshots and contribute nothing.
    pub fn stock_delta(&self) -> i64 {
        if self.transaction_type == TransactionType::Count || !self.is_effective() {
            0
        } else {
            self.quantity
        }
    }

    pub fn is_stock_in(&self) -> bool {
        self.transaction_type != TransactionType::Count && self.quantity > 0
    }

    pub fn is_stock_out(&self) -> bool {
        self.quantity < 0
    }

    pub fn is_transfer(&self) -> bool {
        self.transaction_type.is_transfer()
    }

    /// The other warehouse of a transfer.
    pub fn transfer_partner(&self) -> Option<WarehouseId> {
        match self.transaction_type {
            TransactionType::TransferOut => self.to_warehouse,
            TransactionType::TransferIn => self.from_warehouse,
            _ => None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|e| e <= now)
    }

    /// Whole days until expiry; negative once expired.
    pub fn days_to_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiry_date.map(|e| (e - now).num_days())
    }

    pub fn is_near_expiry(&self, now: DateTime<Utc>, within_days: i64) -> bool {
        !self.is_expired(now)
            && self.days_to_expiry(now).is_some_and(|d| d <= within_days)
    }
}

impl Entity for InventoryTransaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.approved_at.unwrap_or(self.created_at)
    }
}
