//! Donor, approval and points handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use milkbank_approval::{ApprovalSession, ConsentDocument, ProviderInfo};
use milkbank_business::{DonorQuery, Page, Redemption};
use milkbank_core::{DonationVisit, DonorEvent, DonorRecord, LedgerEntry, NewDonor};
use milkbank_persistence::DonorHistoryEntry;
use serde::{Deserialize, Serialize};

use super::actor::CurrentActor;
use super::extract::{JsonBody, ListQuery};
use super::response::{ApiError, ApiResponse, ApiResult};
use crate::context::AppContext;

type AppState = Arc<AppContext>;

// ============ Request Types ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDonorRequest {
    pub full_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
}

/// One reason or several
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Reasons {
    One(String),
    Many(Vec<String>),
}

impl Reasons {
    fn into_vec(self) -> Vec<String> {
        match self {
            Reasons::One(reason) => vec![reason],
            Reasons::Many(reasons) => reasons,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: Reasons,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureData {
    pub transaction_id: Option<String>,
    pub timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub ca_provider: Option<String>,
    #[serde(default)]
    pub otp: Option<String>,
    #[serde(default)]
    pub signature_data: Option<SignatureData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectProviderRequest {
    pub provider_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub gift_id: String,
}

// ============ Response Types ============

#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub approval: ApprovalSession,
    /// Present once the donor is approved
    pub donor: Option<DonorRecord>,
}

#[derive(Debug, Serialize)]
pub struct PointsResponse {
    pub balance: i64,
    pub entries: Vec<LedgerEntry>,
}

// ============ Donors ============

pub async fn list_donors(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    ListQuery(query): ListQuery<DonorQuery>,
) -> ApiResult<Json<Page<DonorRecord>>> {
    Ok(Json(app.donors().list(&actor, query).await?))
}

pub async fn create_donor(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    JsonBody(payload): JsonBody<CreateDonorRequest>,
) -> ApiResult<impl IntoResponse> {
    let donor = app
        .donors()
        .register(
            &actor,
            NewDonor {
                full_name: payload.full_name,
                phone: payload.phone,
                email: payload.email,
                date_of_birth: payload.date_of_birth,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::success(donor)))
}

pub async fn get_donor(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<DonorRecord>>> {
    Ok(ApiResponse::success(app.donors().get(&actor, &id).await?))
}

pub async fn donor_history(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Vec<DonorHistoryEntry>>>> {
    Ok(ApiResponse::success(app.donors().history(&actor, &id).await?))
}

/// Apply a tagged lifecycle event, e.g. `{"event": "order_tests"}`
pub async fn apply_event(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(event): JsonBody<DonorEvent>,
) -> ApiResult<Json<ApiResponse<DonorRecord>>> {
    Ok(ApiResponse::success(
        app.donors().apply_event(&actor, &id, event).await?,
    ))
}

pub async fn reject_donor(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<RejectRequest>,
) -> ApiResult<Json<ApiResponse<DonorRecord>>> {
    let event = DonorEvent::Reject {
        reasons: payload.reason.into_vec(),
    };
    Ok(ApiResponse::success(
        app.donors().apply_event(&actor, &id, event).await?,
    ))
}

pub async fn list_donor_visits(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Vec<DonationVisit>>>> {
    Ok(ApiResponse::success(
        app.visits().list_for_donor(&actor, &id).await?,
    ))
}

// ============ Approval ============

/// Without an `otp` this starts signing with `caProvider`; with one it
/// submits the challenge
pub async fn approve_donor(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<ApproveRequest>,
) -> ApiResult<Json<ApiResponse<ApproveResponse>>> {
    let workflow = app.approval();
    let otp = payload
        .otp
        .as_deref()
        .map(str::trim)
        .filter(|otp| !otp.is_empty());

    let Some(otp) = otp else {
        let provider = payload
            .ca_provider
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ApiError::validation("caProvider is required to start signing"))?;
        let approval = workflow.start_signing(&actor, &id, provider).await?;
        return Ok(ApiResponse::success(ApproveResponse {
            approval,
            donor: None,
        }));
    };

    let signature = payload.signature_data.unwrap_or_default();
    let transaction_id = match signature.transaction_id {
        Some(tx) => tx,
        None => workflow
            .status(&actor, &id)
            .await?
            .transaction_id
            .unwrap_or_default(),
    };
    tracing::debug!(donor_id = %id, %transaction_id, timestamp = ?signature.timestamp, "Challenge submitted");

    let approval = workflow
        .submit_challenge(&actor, &id, &transaction_id, otp)
        .await?;
    let donor = app.donors().get(&actor, &id).await?;
    Ok(ApiResponse::success(ApproveResponse {
        approval,
        donor: Some(donor),
    }))
}

pub async fn approval_status(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<ApprovalSession>>> {
    Ok(ApiResponse::success(
        app.approval().status(&actor, &id).await?,
    ))
}

pub async fn approval_preview(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<ConsentDocument>>> {
    Ok(ApiResponse::success(
        app.approval().preview_consent_document(&actor, &id).await?,
    ))
}

pub async fn approval_select_provider(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<SelectProviderRequest>,
) -> ApiResult<Json<ApiResponse<ApprovalSession>>> {
    Ok(ApiResponse::success(
        app.approval()
            .select_provider(&actor, &id, &payload.provider_id)
            .await?,
    ))
}

pub async fn approval_initiate(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<ApprovalSession>>> {
    Ok(ApiResponse::success(
        app.approval().initiate_signing(&actor, &id).await?,
    ))
}

pub async fn approval_resend(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<ApprovalSession>>> {
    Ok(ApiResponse::success(
        app.approval().resend_challenge(&actor, &id).await?,
    ))
}

pub async fn approval_cancel(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<ApprovalSession>>> {
    Ok(ApiResponse::success(
        app.approval().cancel(&actor, &id).await?,
    ))
}

pub async fn list_providers(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
) -> ApiResult<Json<ApiResponse<Vec<ProviderInfo>>>> {
    Ok(ApiResponse::success(app.approval().providers(&actor)?))
}

// ============ Points ============

pub async fn donor_points(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<PointsResponse>>> {
    let ledger = app.ledger();
    let balance = ledger.balance(&actor, &id).await?;
    let entries = ledger.entries(&actor, &id).await?;
    Ok(ApiResponse::success(PointsResponse { balance, entries }))
}

pub async fn redeem_gift(
    State(app): State<AppState>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<RedeemRequest>,
) -> ApiResult<Json<ApiResponse<Redemption>>> {
    Ok(ApiResponse::success(
        app.ledger().redeem(&actor, &id, &payload.gift_id).await?,
    ))
}
