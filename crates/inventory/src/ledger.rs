use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::round_cents;

use crate::transaction::InventoryTransaction;

/// Fold over a run of ledger rows.
///
/// Only effective rows count (pending approvals are ignored); Count rows are
/// snapshots and are neither in nor out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_in: i64,
    pub total_out: i64,
    pub net: i64,
    /// Σ total_cost of stock-in rows.
    pub total_value: Decimal,
    /// `total_value / total_in`, when anything came in.
    pub weighted_average_cost: Option<Decimal>,
    pub transaction_count: u64,
    pub last_movement_at: Option<DateTime<Utc>>,
}

impl LedgerSummary {
    pub fn from_transactions<'a, I>(txs: I) -> Self
    where
        I: IntoIterator<Item = &'a InventoryTransaction>,
    {
        let mut s = LedgerSummary::default();
        for tx in txs {
            if !tx.is_effective() {
                continue;
            }
            s.transaction_count += 1;
            s.last_movement_at = s.last_movement_at.max(Some(tx.created_at));
            if tx.is_stock_in() {
                s.total_in += tx.quantity;
                if let Some(total) = tx.total_cost {
                    s.total_value += total;
                }
            } else if tx.is_stock_out() {
                s.total_out += -tx.quantity;
            }
        }
        s.net = s.total_in - s.total_out;
        if s.total_in > 0 {
            s.weighted_average_cost = Some(round_cents(s.total_value / Decimal::from(s.total_in)));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{NewTransaction, TransactionType};
    use stockroom_core::{Cost, ProductId, TransactionId, UserId, WarehouseId};

    fn test_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn tx(t: TransactionType, q: i64, cents: Option<i64>, minutes: i64) -> InventoryTransaction {
        let mut new = NewTransaction::new(ProductId::new(), WarehouseId::new(), t, q, "", UserId::new());
        new.unit_cost = cents.map(|c| Cost::from_cents(c).unwrap());
        InventoryTransaction::create(
            TransactionId::new(),
            new,
            test_now() + chrono::Duration::minutes(minutes),
            500,
        )
        .unwrap()
    }

    #[test]
    fn empty_ledger() {
        let rows: Vec<InventoryTransaction> = Vec::new();
        let s = LedgerSummary::from_transactions(&rows);
        assert_eq!(s, LedgerSummary::default());
        assert_eq!(s.weighted_average_cost, None);
    }

    #[test]
    fn folds_effective_rows_only() {
        let mut approved = tx(TransactionType::Damage, -2, None, 3);
        approved.approve(UserId::new(), test_now()).unwrap();
        let rows = vec![
            tx(TransactionType::Purchase, 10, Some(1000), 0),
            tx(TransactionType::Purchase, 30, Some(2000), 1),
            tx(TransactionType::Sale, -5, None, 2),
            approved,
            tx(TransactionType::Theft, -7, None, 4),
            tx(TransactionType::Count, 33, None, 5),
        ];
        let s = LedgerSummary::from_transactions(&rows);
        assert_eq!(s.total_in, 40);
        assert_eq!(s.total_out, 7);
        assert_eq!(s.net, 33);
        assert_eq!(s.total_value, Decimal::new(70000, 2));
        assert_eq!(s.weighted_average_cost, Some(Decimal::new(1750, 2)));
        assert_eq!(s.transaction_count, 5);
        assert_eq!(s.last_movement_at, Some(test_now() + chrono::Duration::minutes(5)));
    }
}
