use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    routing::{get, post},
};

use stockroom_core::{DomainError, InventoryId};
use stockroom_infra::Page;
use stockroom_infra::service::{
    AdjustStock, Availability, BulkAdjustResult, CycleCount, CycleCountOutcome, ExpiringBatch,
    Movement, Reconcile, ReconcileOutcome, ReserveStock, StockMovement, TransferOutcome,
    TransferStock, Valuation,
};
use stockroom_inventory::{Inventory, LedgerSummary, Reconciliation, StockLevels};

use super::common;
use crate::app::{dto, errors::ApiResult, services::AppServices};
use crate::context::Actor;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_inventory))
        .route("/adjust", post(adjust))
        .route("/bulk-adjust", post(bulk_adjust))
        .route("/reserve", post(reserve))
        .route("/release", post(release))
        .route("/transfer", post(transfer))
        .route("/receive", post(receive))
        .route("/movements", post(record_movement))
        .route("/cycle-count", post(cycle_count))
        .route("/low-stock", get(low_stock))
        .route("/availability", get(availability))
        .route("/valuation", get(valuation))
        .route("/expiring", get(expiring))
        .route("/ledger-summary", get(ledger_summary))
        .route("/:id", get(get_inventory).delete(remove_inventory))
        .route("/:id/reconcile", post(reconcile))
        .route("/:id/reconciliations", get(reconciliations))
        .route("/:id/levels", post(update_levels))
}

pub async fn adjust(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    payload: Result<Json<AdjustStock>, JsonRejection>,
) -> ApiResult<Json<StockMovement>> {
    let input = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.adjust(input, actor, &cancel).await?))
}

/// Per-item outcomes; the request itself succeeds even when items fail.
pub async fn bulk_adjust(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    payload: Result<Json<dto::BulkAdjustRequest>, JsonRejection>,
) -> ApiResult<Json<BulkAdjustResult>> {
    let req = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.bulk_adjust(req.items, actor, &cancel).await))
}

pub async fn reserve(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    payload: Result<Json<ReserveStock>, JsonRejection>,
) -> ApiResult<Json<Inventory>> {
    let input = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.reserve(input, actor, &cancel).await?))
}

pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    payload: Result<Json<dto::ReleaseRequest>, JsonRejection>,
) -> ApiResult<Json<Inventory>> {
    let req = common::body(payload)?;
    if let Some(reservation_id) = req.reservation_id {
        return Ok(Json(
            services.inventory.release(reservation_id, req.quantity, &req.reason).await?,
        ));
    }
    let (Some(product_id), Some(warehouse_id)) = (req.product_id, req.warehouse_id) else {
        return Err(DomainError::invalid(
            "either reservation_id or product_id and warehouse_id are required",
        )
        .into());
    };
    let input = ReserveStock { product_id, warehouse_id, quantity: req.quantity };
    let cancel = services.request_token();
    Ok(Json(services.inventory.release_stock(input, actor, &cancel).await?))
}

pub async fn transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    payload: Result<Json<TransferStock>, JsonRejection>,
) -> ApiResult<Json<TransferOutcome>> {
    let input = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.transfer(input, actor, &cancel).await?))
}

pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    payload: Result<Json<Movement>, JsonRejection>,
) -> ApiResult<Json<StockMovement>> {
    let input = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.receive(input, actor, &cancel).await?))
}

pub async fn record_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    payload: Result<Json<Movement>, JsonRejection>,
) -> ApiResult<Json<StockMovement>> {
    let input = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.record_movement(input, actor, &cancel).await?))
}

pub async fn cycle_count(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    payload: Result<Json<CycleCount>, JsonRejection>,
) -> ApiResult<Json<CycleCountOutcome>> {
    let input = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.cycle_count(input, actor, &cancel).await?))
}

pub async fn reconcile(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    payload: Result<Json<Reconcile>, JsonRejection>,
) -> ApiResult<Json<ReconcileOutcome>> {
    let id: InventoryId = dto::parse_id(&id)?;
    let input = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.reconcile(id, input, actor, &cancel).await?))
}

pub async fn reconciliations(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Reconciliation>>> {
    let id: InventoryId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.list_reconciliations(id, &cancel).await?))
}

pub async fn update_levels(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    payload: Result<Json<StockLevels>, JsonRejection>,
) -> ApiResult<Json<Inventory>> {
    let id: InventoryId = dto::parse_id(&id)?;
    let levels = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.update_stock_levels(id, levels, actor, &cancel).await?))
}

pub async fn get_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Inventory>> {
    let id: InventoryId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.get_inventory(id, &cancel).await?))
}

pub async fn remove_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Inventory>> {
    let id: InventoryId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.remove_inventory(id, actor, &cancel).await?))
}

pub async fn list_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    q: Result<Query<dto::InventoryQuery>, QueryRejection>,
) -> ApiResult<Json<Page<Inventory>>> {
    let (filter, params) = common::query(q)?.into_parts();
    let cancel = services.request_token();
    Ok(Json(services.inventory.list_inventory(filter, params, &cancel).await?))
}

pub async fn low_stock(
    Extension(services): Extension<Arc<AppServices>>,
    scope: Result<Query<dto::WarehouseScope>, QueryRejection>,
    page: Result<Query<dto::PageQuery>, QueryRejection>,
) -> ApiResult<Json<Page<Inventory>>> {
    let scope = common::query(scope)?;
    let params = common::query(page)?.params();
    let cancel = services.request_token();
    Ok(Json(
        services.inventory.low_stock_items(scope.warehouse_id, params, &cancel).await?,
    ))
}

pub async fn availability(
    Extension(services): Extension<Arc<AppServices>>,
    q: Result<Query<dto::AvailabilityQuery>, QueryRejection>,
) -> ApiResult<Json<Availability>> {
    let q = common::query(q)?;
    let cancel = services.request_token();
    Ok(Json(
        services
            .inventory
            .check_availability(q.product_id, q.warehouse_id, q.quantity, &cancel)
            .await?,
    ))
}

pub async fn valuation(
    Extension(services): Extension<Arc<AppServices>>,
    scope: Result<Query<dto::WarehouseScope>, QueryRejection>,
) -> ApiResult<Json<Valuation>> {
    let scope = common::query(scope)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.valuation(scope.warehouse_id, &cancel).await?))
}

pub async fn expiring(
    Extension(services): Extension<Arc<AppServices>>,
    scope: Result<Query<dto::WarehouseScope>, QueryRejection>,
    page: Result<Query<dto::PageQuery>, QueryRejection>,
) -> ApiResult<Json<Page<ExpiringBatch>>> {
    let scope = common::query(scope)?;
    let params = common::query(page)?.params();
    let cancel = services.request_token();
    Ok(Json(
        services
            .inventory
            .expiring_batches(scope.within_days, scope.warehouse_id, params, &cancel)
            .await?,
    ))
}

pub async fn ledger_summary(
    Extension(services): Extension<Arc<AppServices>>,
    q: Result<Query<dto::PairQuery>, QueryRejection>,
) -> ApiResult<Json<LedgerSummary>> {
    let q = common::query(q)?;
    let cancel = services.request_token();
    Ok(Json(
        services.inventory.ledger_summary(q.product_id, q.warehouse_id, &cancel).await?,
    ))
}
