//! Appointment and donation handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, NaiveTime};
use milkbank_business::{AppointmentQuery, Page};
use milkbank_core::{
    Appointment, AppointmentType, DonationReport, DonationVisit, FailureReason, HealthStatus, Slot,
};
use serde::{Deserialize, Serialize};

use super::actor::CurrentActor;
use super::extract::{JsonBody, ListQuery};
use super::response::{ApiError, ApiResponse, ApiResult};
use crate::context::AppContext;

type AppState = Arc<AppContext>;

/// Slots returned when no `limit` is given
const DEFAULT_SLOT_LIMIT: usize = 200;

// ============ Request Types ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    pub donor_id: String,
    pub resource_id: String,
    pub date: NaiveDate,
    /// `HH:MM`
    pub time: String,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub appointment_type: AppointmentType,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MarkFailedRequest {
    pub reason: FailureReason,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationRequest {
    pub health_status: HealthStatus,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub containers: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

// ============ Response Types ============

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub resource_id: String,
    pub date: NaiveDate,
    pub time: String,
}

impl From<Slot> for SlotView {
    fn from(slot: Slot) -> Self {
        Self {
            time: slot.time.format("%H:%M").to_string(),
            resource_id: slot.resource_id,
            date: slot.date,
        }
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, ApiError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .map_err(|_| ApiError::validation(format!("invalid time '{}', expected HH:MM", raw)))
}

// ============ Handlers ============

pub async fn list_appointments(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ListQuery(query): ListQuery<AppointmentQuery>,
) -> ApiResult<Json<Page<Appointment>>> {
    Ok(Json(app.scheduler().list(&actor, query).await?))
}

pub async fn book_appointment(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    JsonBody(payload): JsonBody<BookRequest>,
) -> ApiResult<impl IntoResponse> {
    let slot = Slot::new(payload.resource_id, payload.date, parse_time(&payload.time)?);
    let appointment = app
        .scheduler()
        .book(&actor, &payload.donor_id, slot, payload.appointment_type)
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::success(appointment)))
}

pub async fn available_slots(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ListQuery(query): ListQuery<SlotsQuery>,
) -> ApiResult<Json<ApiResponse<Vec<SlotView>>>> {
    let to = query.to.unwrap_or(query.from);
    let slots = app
        .scheduler()
        .list_available_slots(&actor, query.from, to, query.appointment_type)
        .await?;
    let limit = query.limit.unwrap_or(DEFAULT_SLOT_LIMIT);
    Ok(ApiResponse::success(
        slots.iter().take(limit).map(SlotView::from).collect(),
    ))
}

pub async fn get_appointment(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Appointment>>> {
    Ok(ApiResponse::success(app.scheduler().get(&actor, &id).await?))
}

pub async fn check_in(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Appointment>>> {
    Ok(ApiResponse::success(
        app.scheduler().check_in(&actor, &id).await?,
    ))
}

pub async fn complete(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Appointment>>> {
    Ok(ApiResponse::success(
        app.scheduler().mark_completed(&actor, &id).await?,
    ))
}

pub async fn mark_failed(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<MarkFailedRequest>,
) -> ApiResult<Json<ApiResponse<Appointment>>> {
    Ok(ApiResponse::success(
        app.scheduler()
            .mark_failed(&actor, &id, payload.reason, payload.notes)
            .await?,
    ))
}

pub async fn cancel(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Appointment>>> {
    Ok(ApiResponse::success(app.scheduler().cancel(&actor, &id).await?))
}

pub async fn record_donation(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<DonationRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = DonationReport {
        health_status: payload.health_status,
        volume_ml: payload.volume,
        container_count: payload.containers,
        notes: payload.notes,
    };
    let visit = app.visits().record_donation(&actor, &id, report).await?;
    Ok((StatusCode::CREATED, ApiResponse::success(visit)))
}

pub async fn get_donation(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<DonationVisit>>> {
    Ok(ApiResponse::success(app.visits().get_visit(&actor, &id).await?))
}
