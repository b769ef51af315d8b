//! Request DTOs and their mapping onto service inputs.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use stockroom_core::{DomainError, DomainResult, ProductId, UserId, WarehouseId};
use stockroom_infra::{ApprovalFilter, InventoryFilter, ListParams, TransactionFilter, WarehouseFilter};
use stockroom_inventory::{NewWarehouse, TransactionType, WarehouseExtension};

#[derive(Debug, Deserialize)]
pub struct LoginAttemptRequest {
    pub identifier: String,
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateWarehouseRequest {
    #[serde(flatten)]
    pub warehouse: NewWarehouse,
    pub extension: Option<WarehouseExtension>,
}

/// Keyed release, or release by reservation id.
#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub reservation_id: Option<Uuid>,
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub quantity: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkAdjustRequest {
    pub items: Vec<stockroom_infra::service::AdjustStock>,
}

/// Query strings are flat; these mirror the filter structs field by field.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    pub fn params(&self) -> ListParams {
        ListParams {
            sort_by: self.sort_by.clone(),
            sort_dir: self.sort_dir.clone(),
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WarehouseQuery {
    #[serde(default)]
    pub active_only: bool,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl WarehouseQuery {
    pub fn into_parts(self) -> (WarehouseFilter, ListParams) {
        (
            WarehouseFilter { active_only: self.active_only, search: self.search },
            ListParams { sort_by: self.sort_by, sort_dir: self.sort_dir, page: self.page, limit: self.limit },
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryQuery {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub low_stock_only: bool,
    #[serde(default)]
    pub include_deleted: bool,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl InventoryQuery {
    pub fn into_parts(self) -> (InventoryFilter, ListParams) {
        (
            InventoryFilter {
                product_id: self.product_id,
                warehouse_id: self.warehouse_id,
                low_stock_only: self.low_stock_only,
                include_deleted: self.include_deleted,
            },
            ListParams { sort_by: self.sort_by, sort_dir: self.sort_dir, page: self.page, limit: self.limit },
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct WarehouseScope {
    pub warehouse_id: Option<WarehouseId>,
    pub within_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct PairQuery {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    /// Comma-separated, e.g. `purchase,sale`.
    pub types: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub batch_number: Option<String>,
    #[serde(default)]
    pub approval: ApprovalFilter,
    pub created_by: Option<UserId>,
    #[serde(default)]
    pub stock_in_only: bool,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl TransactionQuery {
    pub fn into_parts(self) -> DomainResult<(TransactionFilter, ListParams)> {
        let types = parse_types(self.types.as_deref())?;
        Ok((
            TransactionFilter {
                product_id: self.product_id,
                warehouse_id: self.warehouse_id,
                types,
                created_from: self.created_from,
                created_to: self.created_to,
                reference_type: self.reference_type,
                reference_id: self.reference_id,
                batch_number: self.batch_number,
                approval: self.approval,
                created_by: self.created_by,
                expires_from: None,
                expires_to: None,
                stock_in_only: self.stock_in_only,
            },
            ListParams { sort_by: self.sort_by, sort_dir: self.sort_dir, page: self.page, limit: self.limit },
        ))
    }
}

fn parse_types(raw: Option<&str>) -> DomainResult<Vec<TransactionType>> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// Parse a path id, mapping failures to `INVALID_ARGUMENT`.
pub fn parse_id<T>(raw: &str) -> DomainResult<T>
where
    T: std::str::FromStr<Err = DomainError>,
{
    raw.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_lists_are_comma_separated() {
        assert_eq!(parse_types(None).unwrap(), vec![]);
        assert_eq!(
            parse_types(Some("purchase, sale,")).unwrap(),
            vec![TransactionType::Purchase, TransactionType::Sale]
        );
        assert!(parse_types(Some("purchase,gift")).is_err());
    }

    #[test]
    fn transaction_query_maps_onto_the_filter() {
        let q = TransactionQuery {
            types: Some("damage".into()),
            approval: ApprovalFilter::Pending,
            page: Some(2),
            ..Default::default()
        };
        let (filter, params) = q.into_parts().unwrap();
        assert_eq!(filter.types, vec![TransactionType::Damage]);
        assert_eq!(filter.approval, ApprovalFilter::Pending);
        assert_eq!(params.page, Some(2));
    }
}
