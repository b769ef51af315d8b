use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{
        Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    routing::{get, post, put},
};

use stockroom_core::WarehouseId;
use stockroom_infra::Page;
use stockroom_infra::service::{Utilization, WarehouseDetails};
use stockroom_inventory::{Warehouse, WarehouseExtension, WarehousePatch};

use super::common;
use crate::app::{dto, errors::ApiResult, services::AppServices};
use crate::context::Actor;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_warehouse).get(list_warehouses))
        .route(
            "/:id",
            get(get_warehouse).patch(update_warehouse).delete(delete_warehouse),
        )
        .route("/:id/utilization", get(utilization))
        .route("/:id/extension", put(set_extension))
        .route("/:id/deactivate", post(deactivate))
}

pub async fn create_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    _actor: Actor,
    payload: Result<Json<dto::CreateWarehouseRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<WarehouseDetails>)> {
    let req = common::body(payload)?;
    let cancel = services.request_token();
    let details = services
        .inventory
        .create_warehouse(req.warehouse, req.extension, &cancel)
        .await?;
    Ok((StatusCode::CREATED, Json(details)))
}

pub async fn list_warehouses(
    Extension(services): Extension<Arc<AppServices>>,
    q: Result<Query<dto::WarehouseQuery>, QueryRejection>,
) -> ApiResult<Json<Page<Warehouse>>> {
    let (filter, params) = common::query(q)?.into_parts();
    let cancel = services.request_token();
    Ok(Json(services.inventory.list_warehouses(filter, params, &cancel).await?))
}

pub async fn get_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Json<WarehouseDetails>> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.get_warehouse(id, &cancel).await?))
}

pub async fn update_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    _actor: Actor,
    Path(id): Path<String>,
    payload: Result<Json<WarehousePatch>, JsonRejection>,
) -> ApiResult<Json<Warehouse>> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let patch = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.update_warehouse(id, patch, &cancel).await?))
}

pub async fn set_extension(
    Extension(services): Extension<Arc<AppServices>>,
    _actor: Actor,
    Path(id): Path<String>,
    payload: Result<Json<WarehouseExtension>, JsonRejection>,
) -> ApiResult<Json<WarehouseDetails>> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let ext = common::body(payload)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.set_warehouse_extension(id, ext, &cancel).await?))
}

pub async fn deactivate(
    Extension(services): Extension<Arc<AppServices>>,
    _actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<Warehouse>> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.deactivate_warehouse(id, &cancel).await?))
}

pub async fn delete_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    _actor: Actor,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    services.inventory.delete_warehouse(id, &cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn utilization(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Utilization>> {
    let id: WarehouseId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.warehouse_utilization(id, &cancel).await?))
}
