use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    DomainResult, InventoryId, ProductId, ReconciliationId, TransactionId, UserId, WarehouseId,
    check_level,
};

use crate::validate;

/// Outcome of comparing the system quantity against a physical count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub id: ReconciliationId,
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub system_quantity: i64,
    pub physical_quantity: i64,
    pub variance: i64,
    pub reason: String,
    pub reconciled_by: UserId,
    pub reconciled_at: DateTime<Utc>,
    /// Adjustment emitted for a non-zero variance.
    pub adjustment_id: Option<TransactionId>,
}

impl Reconciliation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ReconciliationId,
        inventory_id: InventoryId,
        key: (ProductId, WarehouseId),
        system_quantity: i64,
        physical_quantity: i64,
        reason: String,
        by: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        check_level("system_quantity", system_quantity)?;
        check_level("physical_quantity", physical_quantity)?;
        validate::not_blank("reason", &reason)?;
        Ok(Self {
            id,
            inventory_id,
            product_id: key.0,
            warehouse_id: key.1,
            system_quantity,
            physical_quantity,
            variance: physical_quantity - system_quantity,
            reason,
            reconciled_by: by,
            reconciled_at: now,
            adjustment_id: None,
        })
    }

    pub fn has_variance(&self) -> bool {
        self.variance != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_is_physical_minus_system() {
        let r = Reconciliation::new(
            ReconciliationId::new(),
            InventoryId::new(),
            (ProductId::new(), WarehouseId::new()),
            100,
            93,
            "quarterly audit".into(),
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(r.variance, -7);
        assert!(r.has_variance());
        assert_eq!(r.adjustment_id, None);
    }

    #[test]
    fn rejects_negative_quantities_and_blank_reason() {
        let key = (ProductId::new(), WarehouseId::new());
        let mk = |sys, phys, reason: &str| {
            Reconciliation::new(
                ReconciliationId::new(),
                InventoryId::new(),
                key,
                sys,
                phys,
                reason.to_string(),
                UserId::new(),
                Utc::now(),
            )
        };
        assert!(mk(-1, 0, "x").is_err());
        assert!(mk(0, -1, "x").is_err());
        assert!(mk(1, 1, "  ").is_err());
        assert!(!mk(1, 1, "ok").unwrap().has_variance());
    }
}
