//! Warehouse lifecycle and capacity.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use stockroom_core::{DomainError, DomainResult, Entity, WarehouseId};
use stockroom_inventory::{
    NewWarehouse, Warehouse, WarehouseExtended, WarehouseExtension, WarehousePatch,
    warehouse::utilization_percent,
};

use super::{InventoryService, ensure_warehouse};
use crate::query::{ListParams, Page, SortSpec, TransactionFilter, WarehouseFilter};
use crate::store::{TransactionRepository, WarehouseRepository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarehouseDetails {
    pub warehouse: Warehouse,
    pub extension: Option<WarehouseExtension>,
}

impl WarehouseDetails {
    pub fn extended(self) -> Option<WarehouseExtended> {
        let ext = self.extension?;
        Some(WarehouseExtended { base: self.warehouse, ext })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utilization {
    pub warehouse_id: WarehouseId,
    pub current_stock: i64,
    pub capacity: Option<i64>,
    /// `None` without a positive capacity.
    pub utilization_percent: Option<f64>,
}

impl InventoryService {
    #[instrument(skip(self, new, extension, cancel), fields(code = %new.code), err)]
    pub async fn create_warehouse(
        &self,
        new: NewWarehouse,
        extension: Option<WarehouseExtension>,
        cancel: &CancellationToken,
    ) -> DomainResult<WarehouseDetails> {
        let warehouse = Warehouse::create(WarehouseId::from_uuid(self.ctx.uuid()), new, self.ctx.now())?;
        if let Some(ext) = &extension {
            ext.validate()?;
        }

        let out = self
            .run(cancel, move |tx| {
                let warehouse = warehouse.clone();
                let extension = extension.clone();
                Box::pin(async move {
                    if tx.get_warehouse_by_code(warehouse.code()).await?.is_some() {
                        return Err(DomainError::already_exists(format!(
                            "warehouse code {} is taken",
                            warehouse.code()
                        )));
                    }
                    tx.create_warehouse(&warehouse).await?;
                    if let Some(ext) = &extension {
                        tx.put_extension(*warehouse.id(), ext).await?;
                    }
                    Ok(WarehouseDetails { warehouse, extension })
                })
            })
            .await?;
        info!(warehouse_id = %out.warehouse.id(), "warehouse created");
        Ok(out)
    }

    pub async fn get_warehouse(
        &self,
        id: WarehouseId,
        cancel: &CancellationToken,
    ) -> DomainResult<WarehouseDetails> {
        self.run(cancel, move |tx| {
            Box::pin(async move {
                let warehouse = ensure_warehouse(tx, id).await?;
                let extension = tx.get_extension(id).await?;
                Ok(WarehouseDetails { warehouse, extension })
            })
        })
        .await
    }

    /// Apply a patch. The code is fixed at creation.
    #[instrument(skip(self, patch, cancel), err)]
    pub async fn update_warehouse(
        &self,
        id: WarehouseId,
        patch: WarehousePatch,
        cancel: &CancellationToken,
    ) -> DomainResult<Warehouse> {
        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            let patch = patch.clone();
            Box::pin(async move {
                let mut warehouse = ensure_warehouse(tx, id).await?;
                warehouse.apply(patch, ctx.now())?;
                tx.update_warehouse(&warehouse).await?;
                Ok(warehouse)
            })
        })
        .await
    }

    #[instrument(skip(self, ext, cancel), err)]
    pub async fn set_warehouse_extension(
        &self,
        id: WarehouseId,
        ext: WarehouseExtension,
        cancel: &CancellationToken,
    ) -> DomainResult<WarehouseDetails> {
        ext.validate()?;
        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            let ext = ext.clone();
            Box::pin(async move {
                let mut warehouse = ensure_warehouse(tx, id).await?;
                // Stamp the base row so `updated_at` reflects the profile change.
                warehouse.apply(WarehousePatch::default(), ctx.now())?;
                tx.update_warehouse(&warehouse).await?;
                tx.put_extension(id, &ext).await?;
                Ok(WarehouseDetails { warehouse, extension: Some(ext) })
            })
        })
        .await
    }

    #[instrument(skip(self, cancel), err)]
    pub async fn deactivate_warehouse(
        &self,
        id: WarehouseId,
        cancel: &CancellationToken,
    ) -> DomainResult<Warehouse> {
        let ctx = self.ctx.clone();
        self.run(cancel, move |tx| {
            let ctx = ctx.clone();
            Box::pin(async move {
                let mut warehouse = ensure_warehouse(tx, id).await?;
                warehouse.deactivate(ctx.now());
                tx.update_warehouse(&warehouse).await?;
                Ok(warehouse)
            })
        })
        .await
    }

    /// Delete a warehouse that never recorded stock, together with its
    /// extension. A warehouse with ledger history can only be deactivated.
    #[instrument(skip(self, cancel), err)]
    pub async fn delete_warehouse(
        &self,
        id: WarehouseId,
        cancel: &CancellationToken,
    ) -> DomainResult<()> {
        self.run(cancel, move |tx| {
            Box::pin(async move {
                ensure_warehouse(tx, id).await?;
                let stock = tx.current_stock(id).await?;
                if stock > 0 {
                    return Err(DomainError::invalid_state(format!(
                        "warehouse still holds {stock} units"
                    )));
                }
                let history = TransactionFilter { warehouse_id: Some(id), ..Default::default() };
                let rows = tx.count_transactions(&history).await?;
                if rows > 0 {
                    return Err(DomainError::invalid_state(format!(
                        "warehouse has {rows} ledger rows; deactivate it instead"
                    )));
                }
                tx.delete_warehouse(id).await
            })
        })
        .await?;
        info!(warehouse_id = %id, "warehouse deleted");
        Ok(())
    }

    pub async fn list_warehouses(
        &self,
        filter: WarehouseFilter,
        params: ListParams,
        cancel: &CancellationToken,
    ) -> DomainResult<Page<Warehouse>> {
        let sort = SortSpec::warehouses(params.sort_by.as_deref(), params.sort_dir.as_deref())?;
        let page = params.pagination()?;
        self.run(cancel, move |tx| {
            let filter = filter.clone();
            Box::pin(async move {
                let total = tx.count_warehouses(&filter).await?;
                let items = tx.list_warehouses(&filter, sort, page).await?;
                Ok(Page::new(items, total, page))
            })
        })
        .await
    }

    pub async fn warehouse_utilization(
        &self,
        id: WarehouseId,
        cancel: &CancellationToken,
    ) -> DomainResult<Utilization> {
        self.run(cancel, move |tx| {
            Box::pin(async move {
                ensure_warehouse(tx, id).await?;
                let current_stock = tx.current_stock(id).await?;
                let capacity = tx.get_extension(id).await?.and_then(|ext| ext.capacity);
                Ok(Utilization {
                    warehouse_id: id,
                    current_stock,
                    capacity,
                    utilization_percent: capacity.and_then(|c| utilization_percent(current_stock, c)),
                })
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::AdjustStock;
    use crate::service::test_support::*;
    use stockroom_core::{ErrorKind, ProductId};
    use stockroom_inventory::WarehouseKind;

    #[tokio::test]
    async fn codes_are_unique() {
        let h = test_harness();
        h.warehouse("WH-01").await;
        let err = h
            .service
            .create_warehouse(test_new_warehouse("WH-01"), None, &h.cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn invalid_fields_never_reach_the_store() {
        let h = test_harness();
        let mut new = test_new_warehouse("wh lower");
        new.address.country = "GBR".into();
        let err = h.service.create_warehouse(new, None, &h.cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut ext = WarehouseExtension::new(WarehouseKind::Retail);
        ext.security_level = 11;
        let err = h
            .service
            .create_warehouse(test_new_warehouse("WH-02"), Some(ext), &h.cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(h.store.begin_count(), 0);
    }

    #[tokio::test]
    async fn utilization_follows_stock_and_capacity() {
        let h = test_harness();
        let a = h.warehouse("WH-01").await;
        let p = ProductId::new();
        h.stock(p, a, 250).await;

        let u = h.service.warehouse_utilization(a, &h.cancel).await.unwrap();
        assert_eq!((u.current_stock, u.capacity, u.utilization_percent), (250, None, None));

        let mut ext = WarehouseExtension::new(WarehouseKind::Distribution);
        ext.capacity = Some(1000);
        let details = h.service.set_warehouse_extension(a, ext, &h.cancel).await.unwrap();
        assert!(details.extended().is_some());
        let u = h.service.warehouse_utilization(a, &h.cancel).await.unwrap();
        assert_eq!(u.utilization_percent, Some(25.0));
    }

    #[tokio::test]
    async fn deleting_a_stocked_warehouse_is_refused() {
        let h = test_harness();
        let a = h.warehouse("WH-01").await;
        let p = ProductId::new();
        h.stock(p, a, 3).await;

        let err = h.service.delete_warehouse(a, &h.cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn emptied_warehouse_keeps_its_ledger() {
        let h = test_harness();
        let a = h.warehouse("WH-01").await;
        let p = ProductId::new();
        h.stock(p, a, 3).await;
        h.service
            .adjust(
                AdjustStock { product_id: p, warehouse_id: a, delta: -3, reason: String::new() },
                h.actor,
                &h.cancel,
            )
            .await
            .unwrap();

        let err = h.service.delete_warehouse(a, &h.cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(h.service.get_warehouse(a, &h.cancel).await.is_ok());
        assert_eq!(h.on_hand(p, a).await, 0);
        assert_eq!(h.ledger_total(p, a).await, 0);
        assert_eq!(h.service.ledger(p, a, &h.cancel).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn warehouse_without_history_can_be_deleted() {
        let h = test_harness();
        let a = h.warehouse("WH-01").await;
        h.service.delete_warehouse(a, &h.cancel).await.unwrap();
        let err = h.service.get_warehouse(a, &h.cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn patches_keep_the_code_and_listing_filters() {
        let h = test_harness();
        let a = h.warehouse("WH-01").await;
        h.warehouse("WH-02").await;
        let patch = WarehousePatch { name: Some("North Hub".into()), ..Default::default() };
        let updated = h.service.update_warehouse(a, patch, &h.cancel).await.unwrap();
        assert_eq!((updated.code(), updated.name()), ("WH-01", "North Hub"));

        h.service.deactivate_warehouse(a, &h.cancel).await.unwrap();
        let active = h
            .service
            .list_warehouses(WarehouseFilter { active_only: true, search: None }, ListParams::default(), &h.cancel)
            .await
            .unwrap();
        assert_eq!(active.total, 1);
        assert_eq!(active.items[0].code(), "WH-02");

        let found = h
            .service
            .list_warehouses(
                WarehouseFilter { active_only: false, search: Some("north".into()) },
                ListParams::default(),
                &h.cancel,
            )
            .await
            .unwrap();
        assert_eq!(found.total, 1);

        let err = h
            .service
            .list_warehouses(
                WarehouseFilter::default(),
                ListParams { sort_by: Some("capacity".into()), ..Default::default() },
                &h.cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
