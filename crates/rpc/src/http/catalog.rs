//! Gift catalog and bookable resources

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use milkbank_business::NewResource;
use milkbank_core::{AppointmentType, Gift, NewGift};
use milkbank_persistence::ResourceRecord;
use serde::{Deserialize, Serialize};

use super::actor::CurrentActor;
use super::extract::{JsonBody, ListQuery};
use super::response::{ApiResponse, ApiResult};
use crate::context::AppContext;

type AppState = Arc<AppContext>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGiftRequest {
    pub name: String,
    pub point_cost: i64,
    #[serde(default)]
    pub stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct StockLevel {
    pub gift_id: String,
    pub stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourceQuery {
    #[serde(rename = "type")]
    pub appointment_type: Option<AppointmentType>,
}

pub async fn list_gifts(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Json<ApiResponse<Vec<Gift>>>> {
    Ok(ApiResponse::success(app.ledger().list_gifts(&actor).await?))
}

pub async fn create_gift(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    JsonBody(payload): JsonBody<CreateGiftRequest>,
) -> ApiResult<impl IntoResponse> {
    let gift = app
        .ledger()
        .add_gift(
            &actor,
            NewGift {
                name: payload.name,
                point_cost: payload.point_cost,
                stock: payload.stock,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::success(gift)))
}

pub async fn restock_gift(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<RestockRequest>,
) -> ApiResult<Json<ApiResponse<StockLevel>>> {
    let stock = app.ledger().restock(&actor, &id, payload.quantity).await?;
    Ok(ApiResponse::success(StockLevel { gift_id: id, stock }))
}

pub async fn list_resources(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ListQuery(query): ListQuery<ResourceQuery>,
) -> ApiResult<Json<ApiResponse<Vec<ResourceRecord>>>> {
    Ok(ApiResponse::success(
        app.scheduler()
            .list_resources(&actor, query.appointment_type)
            .await?,
    ))
}

pub async fn create_resource(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    JsonBody(payload): JsonBody<CreateResourceRequest>,
) -> ApiResult<impl IntoResponse> {
    let resource = app
        .scheduler()
        .register_resource(
            &actor,
            NewResource {
                id: payload.id,
                name: payload.name,
                appointment_type: payload.appointment_type,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::success(resource)))
}

pub async fn deactivate_resource(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<String>>> {
    app.scheduler().deactivate_resource(&actor, &id).await?;
    Ok(ApiResponse::success(id))
}
