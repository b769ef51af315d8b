use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, rejection::QueryRejection},
    routing::{get, post},
};

use stockroom_core::TransactionId;
use stockroom_infra::Page;
use stockroom_infra::service::StockMovement;
use stockroom_inventory::InventoryTransaction;

use super::common;
use crate::app::{dto, errors::ApiResult, services::AppServices};
use crate::context::Actor;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_transactions))
        .route("/:id", get(get_transaction))
        .route("/:id/approve", post(approve))
}

/// Approving applies a pending movement to stock.
pub async fn approve(
    Extension(services): Extension<Arc<AppServices>>,
    Actor(approver): Actor,
    Path(id): Path<String>,
) -> ApiResult<Json<StockMovement>> {
    let id: TransactionId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.approve(id, approver, &cancel).await?))
}

pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    q: Result<Query<dto::TransactionQuery>, QueryRejection>,
) -> ApiResult<Json<Page<InventoryTransaction>>> {
    let (filter, params) = common::query(q)?.into_parts()?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.list_transactions(filter, params, &cancel).await?))
}

pub async fn get_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> ApiResult<Json<InventoryTransaction>> {
    let id: TransactionId = dto::parse_id(&id)?;
    let cancel = services.request_token();
    Ok(Json(services.inventory.get_transaction(id, &cancel).await?))
}
