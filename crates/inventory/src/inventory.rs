use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use stockroom_core::{
    Cost, DomainError, DomainResult, Entity, InventoryId, MAX_QUANTITY, ProductId, UserId,
    WarehouseId, check_level, check_movement, check_positive, round_cents,
};

/// Derived stock classification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    OutOfStock,
    Understock,
    LowStock,
    Overstock,
    Normal,
}

impl StockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StockStatus::OutOfStock => "OUT_OF_STOCK",
            StockStatus::Understock => "UNDERSTOCK",
            StockStatus::LowStock => "LOW_STOCK",
            StockStatus::Overstock => "OVERSTOCK",
            StockStatus::Normal => "NORMAL",
        }
    }

    pub fn classify(on_hand: i64, reorder_level: i64, min: Option<i64>, max: Option<i64>) -> Self {
        if on_hand == 0 {
            StockStatus::OutOfStock
        } else if min.is_some_and(|m| on_hand < m) {
            StockStatus::Understock
        } else if on_hand <= reorder_level {
            StockStatus::LowStock
        } else if max.is_some_and(|m| on_hand > m) {
            StockStatus::Overstock
        } else {
            StockStatus::Normal
        }
    }
}

/// Partial level update; `None` keeps the current value.
///
/// `min_stock` and `max_stock` are clearable: `Some(None)` (JSON `null`)
/// removes the bound, an absent field keeps it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub min_stock: Option<Option<i64>>,
    #[serde(default, deserialize_with = "clearable", skip_serializing_if = "Option::is_none")]
    pub max_stock: Option<Option<i64>>,
    pub reorder_level: Option<i64>,
}

fn clearable<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

/// Flat persisted form of an [`Inventory`] row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: InventoryId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub reorder_level: i64,
    pub min_stock: Option<i64>,
    pub max_stock: Option<i64>,
    pub average_cost: Cost,
    pub last_counted_at: Option<DateTime<Utc>>,
    pub last_counted_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Stock held for one product at one warehouse.
///
/// All mutators validate first and leave `self` untouched on error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "InventoryRecord")]
pub struct Inventory {
    rec: InventoryRecord,
}

fn check_chain(min: Option<i64>, reorder: i64, max: Option<i64>) -> DomainResult<()> {
    if let Some(min) = min {
        check_level("min_stock", min)?;
        if min > reorder {
            return Err(DomainError::invalid("min_stock cannot exceed reorder_level"));
        }
    }
    if let Some(max) = max {
        check_level("max_stock", max)?;
        if reorder > max {
            return Err(DomainError::invalid("reorder_level cannot exceed max_stock"));
        }
    }
    check_level("reorder_level", reorder)?;
    Ok(())
}

impl Inventory {
    /// Zero row created when a product is first observed at a warehouse.
    pub fn new(
        id: InventoryId,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            rec: InventoryRecord {
                id,
                product_id,
                warehouse_id,
                quantity_on_hand: 0,
                quantity_reserved: 0,
                reorder_level: 0,
                min_stock: None,
                max_stock: None,
                average_cost: Cost::ZERO,
                last_counted_at: None,
                last_counted_by: None,
                created_at: now,
                updated_at: now,
                updated_by: None,
                deleted_at: None,
            },
        }
    }

    /// Rebuild from storage, re-checking every invariant.
    pub fn restore(rec: InventoryRecord) -> DomainResult<Self> {
        check_level("quantity_on_hand", rec.quantity_on_hand)?;
        check_level("quantity_reserved", rec.quantity_reserved)?;
        if rec.quantity_reserved > rec.quantity_on_hand {
            return Err(DomainError::internal(format!(
                "inventory {} has reserved > on_hand",
                rec.id
            )));
        }
        check_chain(rec.min_stock, rec.reorder_level, rec.max_stock)?;
        Ok(Self { rec })
    }

    pub fn record(&self) -> &InventoryRecord {
        &self.rec
    }

    pub fn into_record(self) -> InventoryRecord {
        self.rec
    }

    pub fn product_id(&self) -> ProductId {
        self.rec.product_id
    }

    pub fn warehouse_id(&self) -> WarehouseId {
        self.rec.warehouse_id
    }

    /// Canonical lock / write ordering key.
    pub fn key(&self) -> (ProductId, WarehouseId) {
        (self.rec.product_id, self.rec.warehouse_id)
    }

    pub fn on_hand(&self) -> i64 {
        self.rec.quantity_on_hand
    }

    pub fn reserved(&self) -> i64 {
        self.rec.quantity_reserved
    }

    pub fn available(&self) -> i64 {
        self.rec.quantity_on_hand - self.rec.quantity_reserved
    }

    pub fn reorder_level(&self) -> i64 {
        self.rec.reorder_level
    }

    pub fn min_stock(&self) -> Option<i64> {
        self.rec.min_stock
    }

    pub fn max_stock(&self) -> Option<i64> {
        self.rec.max_stock
    }

    pub fn average_cost(&self) -> Cost {
        self.rec.average_cost
    }

    pub fn last_counted_at(&self) -> Option<DateTime<Utc>> {
        self.rec.last_counted_at
    }

    pub fn last_counted_by(&self) -> Option<UserId> {
        self.rec.last_counted_by
    }

    pub fn updated_by(&self) -> Option<UserId> {
        self.rec.updated_by
    }

    pub fn is_deleted(&self) -> bool {
        self.rec.deleted_at.is_some()
    }

    pub fn stock_status(&self) -> StockStatus {
        StockStatus::classify(
            self.rec.quantity_on_hand,
            self.rec.reorder_level,
            self.rec.min_stock,
            self.rec.max_stock,
        )
    }

    pub fn is_low_stock(&self) -> bool {
        self.rec.quantity_on_hand <= self.rec.reorder_level
    }

    /// `on_hand · average_cost`.
    pub fn value(&self) -> Decimal {
        self.rec.average_cost.extend(self.rec.quantity_on_hand)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.rec.updated_at = now;
    }

    /// Attribute the pending mutation to `actor`.
    pub fn set_updated_by(&mut self, actor: UserId) {
        self.rec.updated_by = Some(actor);
    }

    pub fn reserve(&mut self, q: i64, now: DateTime<Utc>) -> DomainResult<()> {
        check_positive("quantity", q)?;
        if self.available() < q {
            return Err(DomainError::insufficient_stock(format!(
                "requested {q}, available {}",
                self.available()
            )));
        }
        self.rec.quantity_reserved += q;
        self.touch(now);
        Ok(())
    }

    pub fn release(&mut self, q: i64, now: DateTime<Utc>) -> DomainResult<()> {
        check_positive("quantity", q)?;
        if self.rec.quantity_reserved < q {
            return Err(DomainError::invalid_state(format!(
                "cannot release {q}, only {} reserved",
                self.rec.quantity_reserved
            )));
        }
        self.rec.quantity_reserved -= q;
        self.touch(now);
        Ok(())
    }

    fn target_after(&self, delta: i64) -> DomainResult<i64> {
        check_movement("delta", delta)?;
        let new = self.rec.quantity_on_hand + delta;
        if new < 0 {
            return Err(DomainError::insufficient_stock(format!(
                "on hand {} cannot absorb {delta}",
                self.rec.quantity_on_hand
            )));
        }
        if new > MAX_QUANTITY {
            return Err(DomainError::capacity_exceeded(format!(
                "on hand would exceed {MAX_QUANTITY}"
            )));
        }
        if self.rec.quantity_reserved > new {
            return Err(DomainError::insufficient_stock(format!(
                "{} units are reserved, on hand would drop to {new}",
                self.rec.quantity_reserved
            )));
        }
        Ok(new)
    }

    pub fn adjust(&mut self, delta: i64, now: DateTime<Utc>) -> DomainResult<()> {
        let new = self.target_after(delta)?;
        self.rec.quantity_on_hand = new;
        self.touch(now);
        Ok(())
    }

    pub fn set(&mut self, new: i64, now: DateTime<Utc>) -> DomainResult<()> {
        check_level("quantity_on_hand", new)?;
        if new < self.rec.quantity_reserved {
            return Err(DomainError::invalid_state(format!(
                "{} units are reserved",
                self.rec.quantity_reserved
            )));
        }
        self.rec.quantity_on_hand = new;
        self.touch(now);
        Ok(())
    }

    pub fn add(&mut self, q: i64, now: DateTime<Utc>) -> DomainResult<()> {
        check_positive("quantity", q)?;
        self.adjust(q, now)
    }

    /// Drains reservations first, then takes the remainder from on hand.
    pub fn remove(&mut self, q: i64, now: DateTime<Utc>) -> DomainResult<()> {
        check_positive("quantity", q)?;
        if self.available() < q {
            return Err(DomainError::insufficient_stock(format!(
                "requested {q}, available {}",
                self.available()
            )));
        }
        let drained = q.min(self.rec.quantity_reserved);
        self.rec.quantity_reserved -= drained;
        self.rec.quantity_on_hand -= q - drained;
        self.touch(now);
        Ok(())
    }

    /// Stock-in with weighted-average costing. Without a unit cost the average is kept.
    pub fn receive(&mut self, q: i64, unit_cost: Option<Cost>, now: DateTime<Utc>) -> DomainResult<()> {
        check_positive("quantity", q)?;
        let new = self.target_after(q)?;
        let avg = match unit_cost {
            Some(unit) => {
                let old_value = self.rec.average_cost.amount() * Decimal::from(self.rec.quantity_on_hand);
                let in_value = unit.amount() * Decimal::from(q);
                Cost::new(round_cents((old_value + in_value) / Decimal::from(new)))?
            }
            None => self.rec.average_cost,
        };
        self.rec.quantity_on_hand = new;
        self.rec.average_cost = avg;
        self.touch(now);
        Ok(())
    }

    pub fn record_cycle_count(&mut self, count: i64, by: UserId, now: DateTime<Utc>) -> DomainResult<()> {
        self.set(count, now)?;
        self.rec.last_counted_at = Some(now);
        self.rec.last_counted_by = Some(by);
        Ok(())
    }

    pub fn update_reorder_level(&mut self, level: i64, now: DateTime<Utc>) -> DomainResult<()> {
        check_chain(self.rec.min_stock, level, self.rec.max_stock)?;
        self.rec.reorder_level = level;
        self.touch(now);
        Ok(())
    }

    pub fn update_min_stock(&mut self, min: Option<i64>, now: DateTime<Utc>) -> DomainResult<()> {
        check_chain(min, self.rec.reorder_level, self.rec.max_stock)?;
        self.rec.min_stock = min;
        self.touch(now);
        Ok(())
    }

    pub fn update_max_stock(&mut self, max: Option<i64>, now: DateTime<Utc>) -> DomainResult<()> {
        check_chain(self.rec.min_stock, self.rec.reorder_level, max)?;
        self.rec.max_stock = max;
        self.touch(now);
        Ok(())
    }

    /// Apply several level changes at once; the chain is checked on the combined result.
    pub fn update_stock_levels(&mut self, levels: StockLevels, now: DateTime<Utc>) -> DomainResult<()> {
        let min = levels.min_stock.unwrap_or(self.rec.min_stock);
        let max = levels.max_stock.unwrap_or(self.rec.max_stock);
        let reorder = levels.reorder_level.unwrap_or(self.rec.reorder_level);
        check_chain(min, reorder, max)?;
        self.rec.min_stock = min;
        self.rec.max_stock = max;
        self.rec.reorder_level = reorder;
        self.touch(now);
        Ok(())
    }

    pub fn days_of_supply(&self, avg_daily_usage: f64) -> DomainResult<f64> {
        if !(avg_daily_usage > 0.0) || !avg_daily_usage.is_finite() {
            return Err(DomainError::invalid("average daily usage must be positive"));
        }
        Ok(self.available() as f64 / avg_daily_usage)
    }

    /// Order quantity capped by the headroom under `max_stock`.
    pub fn suggested_reorder(&self, eoq: i64) -> DomainResult<i64> {
        check_positive("economic order quantity", eoq)?;
        match self.rec.max_stock {
            Some(max) if self.rec.quantity_on_hand >= max => Err(DomainError::capacity_exceeded(
                format!("FULL: on hand {} at or above max {max}", self.rec.quantity_on_hand),
            )),
            Some(max) => Ok(eoq.min(max - self.rec.quantity_on_hand)),
            None => Ok(eoq),
        }
    }

    /// Tombstone an empty row.
    pub fn mark_deleted(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_deleted() {
            return Err(DomainError::not_found(format!("inventory {}", self.rec.id)));
        }
        if self.rec.quantity_on_hand != 0 || self.rec.quantity_reserved != 0 {
            return Err(DomainError::invalid_state("inventory still holds stock"));
        }
        self.rec.deleted_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Bring a tombstoned row back into use. A tombstoned row is always empty.
    pub fn reopen(&mut self, now: DateTime<Utc>) {
        if self.rec.deleted_at.take().is_some() {
            self.touch(now);
        }
    }
}

impl Entity for Inventory {
    type Id = InventoryId;

    fn id(&self) -> &Self::Id {
        &self.rec.id
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.rec.updated_at
    }
}

impl From<Inventory> for InventoryRecord {
    fn from(value: Inventory) -> Self {
        value.rec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-15T10:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn test_inventory(on_hand: i64, reserved: i64) -> Inventory {
        let mut inv = Inventory::new(InventoryId::new(), ProductId::new(), WarehouseId::new(), test_now());
        if on_hand > 0 {
            inv.adjust(on_hand, test_now()).unwrap();
        }
        if reserved > 0 {
            inv.reserve(reserved, test_now()).unwrap();
        }
        inv
    }

    #[test]
    fn reserve_beyond_available_is_rejected_without_mutation() {
        let mut inv = test_inventory(10, 5);
        let before = inv.clone();
        let err = inv.reserve(6, test_now()).unwrap_err();
        assert_eq!(err.kind(), stockroom_core::ErrorKind::InsufficientStock);
        assert_eq!(inv, before);
    }

    #[test]
    fn release_more_than_reserved_is_invalid_state() {
        let mut inv = test_inventory(10, 2);
        let err = inv.release(3, test_now()).unwrap_err();
        assert_eq!(err.kind(), stockroom_core::ErrorKind::InvalidState);
        inv.release(2, test_now()).unwrap();
        assert_eq!(inv.reserved(), 0);
    }

    #[test]
    fn adjust_cannot_cut_into_reserved() {
        let mut inv = test_inventory(10, 8);
        assert!(inv.adjust(-3, test_now()).is_err());
        inv.adjust(-2, test_now()).unwrap();
        assert_eq!(inv.on_hand(), 8);
        assert!(inv.adjust(0, test_now()).is_err());
        assert_eq!(
            inv.adjust(MAX_QUANTITY, test_now()).unwrap_err().kind(),
            stockroom_core::ErrorKind::CapacityExceeded
        );
    }

    #[test]
    fn remove_drains_reserved_first() {
        let mut inv = test_inventory(10, 3);
        inv.remove(5, test_now()).unwrap();
        assert_eq!(inv.reserved(), 0);
        assert_eq!(inv.on_hand(), 8);
        assert!(inv.remove(9, test_now()).is_err());
    }

    #[test]
    fn levels_keep_absent_bounds_and_clear_null_ones() {
        let mut inv = test_inventory(0, 0);
        inv.update_stock_levels(
            StockLevels { min_stock: Some(Some(2)), reorder_level: Some(10), max_stock: Some(Some(20)) },
            test_now(),
        )
        .unwrap();

        inv.update_stock_levels(StockLevels { reorder_level: Some(12), ..Default::default() }, test_now())
            .unwrap();
        assert_eq!((inv.min_stock(), inv.max_stock()), (Some(2), Some(20)));

        inv.update_stock_levels(
            StockLevels { min_stock: Some(None), max_stock: Some(None), ..Default::default() },
            test_now(),
        )
        .unwrap();
        assert_eq!((inv.min_stock(), inv.max_stock()), (None, None));
        assert_eq!(inv.reorder_level(), 12);
    }

    #[test]
    fn levels_json_distinguishes_null_from_absent() {
        let levels: StockLevels = serde_json::from_str(r#"{"min_stock":null,"reorder_level":4}"#).unwrap();
        assert_eq!(
            levels,
            StockLevels { min_stock: Some(None), max_stock: None, reorder_level: Some(4) }
        );
        let levels: StockLevels = serde_json::from_str(r#"{"max_stock":9}"#).unwrap();
        assert_eq!(levels.max_stock, Some(Some(9)));
        assert_eq!(levels.min_stock, None);
    }

    #[test]
    fn set_respects_reserved() {
        let mut inv = test_inventory(10, 4);
        assert!(inv.set(3, test_now()).is_err());
        inv.set(4, test_now()).unwrap();
        assert_eq!(inv.available(), 0);
    }

    #[test]
    fn stock_status_follows_precedence() {
        let mut inv = test_inventory(0, 0);
        assert_eq!(inv.stock_status(), StockStatus::OutOfStock);
        inv.update_stock_levels(
            StockLevels { min_stock: Some(Some(5)), reorder_level: Some(10), max_stock: Some(Some(20)) },
            test_now(),
        )
        .unwrap();
        inv.adjust(3, test_now()).unwrap();
        assert_eq!(inv.stock_status(), StockStatus::Understock);
        inv.adjust(5, test_now()).unwrap();
        assert_eq!(inv.stock_status(), StockStatus::LowStock);
        inv.adjust(5, test_now()).unwrap();
        assert_eq!(inv.stock_status(), StockStatus::Normal);
        inv.adjust(10, test_now()).unwrap();
        assert_eq!(inv.stock_status(), StockStatus::Overstock);
    }

    #[test]
    fn level_chain_is_enforced() {
        let mut inv = test_inventory(0, 0);
        inv.update_max_stock(Some(100), test_now()).unwrap();
        assert!(inv.update_reorder_level(101, test_now()).is_err());
        inv.update_reorder_level(50, test_now()).unwrap();
        assert!(inv.update_min_stock(Some(51), test_now()).is_err());
        inv.update_min_stock(Some(10), test_now()).unwrap();
        assert!(inv.update_max_stock(Some(40), test_now()).is_err());
        inv.update_min_stock(None, test_now()).unwrap();
        assert_eq!(inv.min_stock(), None);
    }

    #[test]
    fn weighted_average_cost_on_receive() {
        let mut inv = test_inventory(0, 0);
        inv.receive(10, Some(Cost::from_cents(1000).unwrap()), test_now()).unwrap();
        assert_eq!(inv.average_cost(), Cost::from_cents(1000).unwrap());
        inv.receive(30, Some(Cost::from_cents(2000).unwrap()), test_now()).unwrap();
        // (10·10 + 30·20) / 40 = 17.50
        assert_eq!(inv.average_cost(), Cost::from_cents(1750).unwrap());
        inv.receive(5, None, test_now()).unwrap();
        assert_eq!(inv.average_cost(), Cost::from_cents(1750).unwrap());
        assert_eq!(inv.value(), Decimal::new(78750, 2));
    }

    #[test]
    fn suggested_reorder_caps_to_headroom() {
        let mut inv = test_inventory(70, 0);
        assert_eq!(inv.suggested_reorder(50).unwrap(), 50);
        inv.update_max_stock(Some(100), test_now()).unwrap();
        assert_eq!(inv.suggested_reorder(50).unwrap(), 30);
        inv.adjust(30, test_now()).unwrap();
        let err = inv.suggested_reorder(50).unwrap_err();
        assert_eq!(err.kind(), stockroom_core::ErrorKind::CapacityExceeded);
        assert!(err.message().starts_with("FULL"));
    }

    #[test]
    fn days_of_supply_uses_available() {
        let inv = test_inventory(100, 40);
        assert_eq!(inv.days_of_supply(6.0).unwrap(), 10.0);
        assert!(inv.days_of_supply(0.0).is_err());
    }

    #[test]
    fn cycle_count_records_counter() {
        let mut inv = test_inventory(10, 0);
        let by = UserId::new();
        inv.record_cycle_count(0, by, test_now()).unwrap();
        assert_eq!(inv.on_hand(), 0);
        assert_eq!(inv.last_counted_by(), Some(by));
        assert_eq!(inv.last_counted_at(), Some(test_now()));
    }

    #[test]
    fn tombstone_requires_empty_row() {
        let mut inv = test_inventory(1, 0);
        assert!(inv.mark_deleted(test_now()).is_err());
        inv.adjust(-1, test_now()).unwrap();
        inv.mark_deleted(test_now()).unwrap();
        assert!(inv.is_deleted());
        inv.reopen(test_now());
        assert!(!inv.is_deleted());
        assert_eq!(inv.on_hand(), 0);
    }

    #[test]
    fn restore_rejects_broken_rows() {
        let mut rec = test_inventory(5, 0).into_record();
        rec.quantity_reserved = 6;
        assert!(Inventory::restore(rec).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(i64),
        Release(i64),
        Adjust(i64),
        Set(i64),
        Remove(i64),
        Receive(i64),
        Levels(Option<i64>, Option<i64>, Option<i64>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..500).prop_map(Op::Reserve),
            (1i64..500).prop_map(Op::Release),
            (-500i64..500).prop_map(Op::Adjust),
            (0i64..2_000).prop_map(Op::Set),
            (1i64..500).prop_map(Op::Remove),
            (1i64..500).prop_map(Op::Receive),
            (
                proptest::option::of(0i64..300),
                proptest::option::of(0i64..600),
                proptest::option::of(0i64..300)
            )
                .prop_map(|(a, b, c)| Op::Levels(a, b, c)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn invariants_hold_after_any_sequence(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let mut inv = test_inventory(0, 0);
            for op in ops {
                let before = inv.clone();
                let res = match op {
                    Op::Reserve(q) => inv.reserve(q, test_now()),
                    Op::Release(q) => inv.release(q, test_now()),
                    Op::Adjust(d) => inv.adjust(d, test_now()),
                    Op::Set(n) => inv.set(n, test_now()),
                    Op::Remove(q) => inv.remove(q, test_now()),
                    Op::Receive(q) => inv.receive(q, Some(Cost::from_cents(q * 3).unwrap()), test_now()),
                    Op::Levels(min, reorder, max) => inv.update_stock_levels(
                        StockLevels { min_stock: min.map(Some), reorder_level: reorder, max_stock: max.map(Some) },
                        test_now(),
                    ),
                };
                if res.is_err() {
                    prop_assert_eq!(&inv, &before);
                }
                prop_assert!(0 <= inv.reserved());
                prop_assert!(inv.reserved() <= inv.on_hand());
                prop_assert!(inv.on_hand() <= MAX_QUANTITY);
                if let Some(min) = inv.min_stock() {
                    prop_assert!(min <= inv.reorder_level());
                }
                if let Some(max) = inv.max_stock() {
                    prop_assert!(inv.reorder_level() <= max);
                }
                prop_assert!(inv.average_cost() >= Cost::ZERO);
            }
        }

        #[test]
        fn status_is_a_function_of_levels(
            on_hand in 0i64..1_000,
            reserved_frac in 0i64..=100,
            reorder in 0i64..500,
            min in proptest::option::of(0i64..500),
            max in proptest::option::of(0i64..1_000),
        ) {
            let reserved = on_hand * reserved_frac / 100;
            let mut a = test_inventory(on_hand, reserved);
            let mut b = test_inventory(on_hand, 0);
            let levels = StockLevels { min_stock: Some(min), reorder_level: Some(reorder), max_stock: Some(max) };
            let ra = a.update_stock_levels(levels, test_now());
            let rb = b.update_stock_levels(levels, test_now());
            prop_assert_eq!(ra.is_ok(), rb.is_ok());
            prop_assert_eq!(a.stock_status(), b.stock_status());
            prop_assert_eq!(
                a.stock_status(),
                StockStatus::classify(a.on_hand(), a.reorder_level(), a.min_stock(), a.max_stock())
            );
        }
    }
}
