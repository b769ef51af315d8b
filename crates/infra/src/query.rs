//! Listing parameters: filters, whitelisted sorting and pagination.
//!
//! Sort columns are resolved against a fixed per-entity allow-list into a
//! `&'static str` before any backend sees them, so a caller-supplied string
//! can never reach an `ORDER BY` clause.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainError, DomainResult, ProductId, UserId, WarehouseId};
use stockroom_inventory::TransactionType;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 1000;

pub const INVENTORY_SORT_COLUMNS: &[&str] = &[
    "id",
    "product_id",
    "warehouse_id",
    "quantity_on_hand",
    "quantity_reserved",
    "reorder_level",
    "average_cost",
    "updated_at",
];

pub const TRANSACTION_SORT_COLUMNS: &[&str] = &[
    "created_at",
    "quantity",
    "transaction_type",
    "product_id",
    "warehouse_id",
    "approved_at",
    "expiry_date",
];

pub const WAREHOUSE_SORT_COLUMNS: &[&str] = &["code", "name", "created_at", "updated_at"];

/// One-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: DEFAULT_PAGE_LIMIT }
    }
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> DomainResult<Self> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page == 0 {
            return Err(DomainError::invalid("page must be at least 1"));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(DomainError::invalid(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// One page of results plus the totals needed to page further.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, pagination: Pagination) -> Self {
        Self {
            items,
            total,
            page: pagination.page,
            limit: pagination.limit,
            total_pages: total.div_ceil(u64::from(pagination.limit)),
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            total_pages: self.total_pages,
        }
    }
}

/// A validated sort: the column is always one of the allow-list entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub column: &'static str,
    pub descending: bool,
}

impl SortSpec {
    pub fn resolve(
        allowed: &'static [&'static str],
        sort_by: Option<&str>,
        sort_dir: Option<&str>,
        default_column: &'static str,
    ) -> DomainResult<Self> {
        let column = match sort_by {
            None => default_column,
            Some(requested) => allowed
                .iter()
                .copied()
                .find(|c| *c == requested)
                .ok_or_else(|| DomainError::invalid(format!("cannot sort by '{requested}'")))?,
        };
        let descending = match sort_dir.map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(DomainError::invalid(format!(
                    "sort direction must be 'asc' or 'desc', got '{other}'"
                )));
            }
        };
        Ok(Self { column, descending })
    }

    pub fn inventory(sort_by: Option<&str>, sort_dir: Option<&str>) -> DomainResult<Self> {
        Self::resolve(INVENTORY_SORT_COLUMNS, sort_by, sort_dir, "updated_at")
    }

    pub fn transactions(sort_by: Option<&str>, sort_dir: Option<&str>) -> DomainResult<Self> {
        let mut spec = Self::resolve(TRANSACTION_SORT_COLUMNS, sort_by, sort_dir, "created_at")?;
        // Newest first unless asked otherwise.
        if sort_by.is_none() && sort_dir.is_none() {
            spec.descending = true;
        }
        Ok(spec)
    }

    /// Batch listings: soonest expiry first unless asked otherwise.
    pub fn expiring(sort_by: Option<&str>, sort_dir: Option<&str>) -> DomainResult<Self> {
        Self::resolve(TRANSACTION_SORT_COLUMNS, sort_by, sort_dir, "expiry_date")
    }

    pub fn warehouses(sort_by: Option<&str>, sort_dir: Option<&str>) -> DomainResult<Self> {
        Self::resolve(WAREHOUSE_SORT_COLUMNS, sort_by, sort_dir, "code")
    }

    pub fn direction(&self) -> &'static str {
        if self.descending { "DESC" } else { "ASC" }
    }
}

/// Raw listing parameters as they arrive from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListParams {
    pub fn pagination(&self) -> DomainResult<Pagination> {
        Pagination::new(self.page, self.limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    /// Only rows with `on_hand <= reorder_level`.
    #[serde(default)]
    pub low_stock_only: bool,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalFilter {
    #[default]
    Any,
    /// Approval-gated rows not yet approved.
    Pending,
    Approved,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    /// Empty means every type.
    #[serde(default)]
    pub types: Vec<TransactionType>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub reference_type: Option<String>,
    pub reference_id: Option<uuid::Uuid>,
    pub batch_number: Option<String>,
    #[serde(default)]
    pub approval: ApprovalFilter,
    pub created_by: Option<UserId>,
    /// Only rows with an expiry date inside this window.
    pub expires_from: Option<DateTime<Utc>>,
    pub expires_to: Option<DateTime<Utc>>,
    /// Only rows that brought stock in: positive quantity, counts excluded.
    #[serde(default)]
    pub stock_in_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseFilter {
    #[serde(default)]
    pub active_only: bool,
    /// Case-insensitive substring of code or name.
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::ErrorKind;

    #[test]
    fn whitelisted_sort_is_accepted() {
        let spec = SortSpec::inventory(Some("quantity_on_hand"), Some("DESC")).unwrap();
        assert_eq!(spec.column, "quantity_on_hand");
        assert_eq!(spec.direction(), "DESC");
    }

    #[test]
    fn unknown_sort_column_is_rejected() {
        let err = SortSpec::inventory(Some("id; DROP TABLE"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(SortSpec::warehouses(Some("quantity_on_hand"), None).is_err());
        assert!(SortSpec::transactions(Some("created_at"), Some("sideways")).is_err());
    }

    #[test]
    fn transactions_default_to_newest_first() {
        let spec = SortSpec::transactions(None, None).unwrap();
        assert_eq!((spec.column, spec.descending), ("created_at", true));
        let spec = SortSpec::transactions(None, Some("asc")).unwrap();
        assert!(!spec.descending);
    }

    #[test]
    fn pagination_bounds() {
        assert_eq!(Pagination::new(None, None).unwrap(), Pagination::default());
        assert!(Pagination::new(Some(0), None).is_err());
        assert!(Pagination::new(None, Some(0)).is_err());
        assert!(Pagination::new(None, Some(1001)).is_err());
        assert_eq!(Pagination::new(Some(3), Some(20)).unwrap().offset(), 40);
    }

    #[test]
    fn total_pages_rounds_up() {
        let p = Pagination::new(Some(1), Some(10)).unwrap();
        assert_eq!(Page::new(Vec::<u8>::new(), 0, p).total_pages, 0);
        assert_eq!(Page::new(Vec::<u8>::new(), 10, p).total_pages, 1);
        assert_eq!(Page::new(Vec::<u8>::new(), 11, p).total_pages, 2);
    }
}
