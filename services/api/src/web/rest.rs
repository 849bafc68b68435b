//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the call lifecycle REST endpoints and the
//! master definition for the OpenAPI specification.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use hostline_core::domain::{AuthContext, Call};

use crate::error::ApiError;
use crate::web::free_target::{
    DayTargetDto, FreeTargetStatusResponse, OverrideDayRequest, RecordCallRequest,
    ToggleFreeTargetRequest,
};
use crate::web::state::AppState;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        initiate_call_handler,
        accept_call_handler,
        end_call_handler,
        rate_call_handler,
        crate::web::free_target::free_target_today_handler,
        crate::web::free_target::start_timer_handler,
        crate::web::free_target::stop_timer_handler,
        crate::web::free_target::record_call_handler,
        crate::web::free_target::toggle_free_target_handler,
        crate::web::free_target::override_day_handler,
    ),
    components(
        schemas(
            InitiateCallRequest,
            AcceptCallRequest,
            EndCallRequest,
            RateCallRequest,
            CallDto,
            EndCallResponse,
            DayTargetDto,
            FreeTargetStatusResponse,
            RecordCallRequest,
            ToggleFreeTargetRequest,
            OverrideDayRequest,
        )
    ),
    tags(
        (name = "Hostline API", description = "Call lifecycle, settlement, and free-target endpoints.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct InitiateCallRequest {
    pub host_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct AcceptCallRequest {
    pub call_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct EndCallRequest {
    pub call_id: Uuid,
    /// Whether the call ended from a connection drop rather than a hangup.
    #[serde(default)]
    pub was_disconnected: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct RateCallRequest {
    pub call_id: Uuid,
    /// Star rating, 1 to 5.
    pub rating: i32,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// A call as exposed over the API.
#[derive(Serialize, ToSchema)]
pub struct CallDto {
    pub id: Uuid,
    pub caller_id: Uuid,
    pub host_id: Uuid,
    pub state: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub coins_spent: i64,
    pub rating: Option<i32>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Call> for CallDto {
    fn from(call: Call) -> Self {
        Self {
            id: call.id,
            caller_id: call.caller_id,
            host_id: call.host_id,
            state: call.state.as_str().to_string(),
            started_at: call.started_at,
            ended_at: call.ended_at,
            duration_seconds: call.duration_seconds,
            coins_spent: call.coins_spent,
            rating: call.rating,
            feedback: call.feedback,
            created_at: call.created_at,
        }
    }
}

/// The settlement summary returned after ending a call.
#[derive(Serialize, ToSchema)]
pub struct EndCallResponse {
    pub call: CallDto,
    pub coins_spent: i64,
    pub duration_seconds: i64,
    pub duration_minutes: i64,
    pub new_balance: i64,
    pub host_earnings: i64,
    pub rate_used: i64,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Initiate a call to a host.
///
/// The host must be approved and online, and the caller must be able to
/// afford at least one minute at the host's rate.
#[utoipa::path(
    post,
    path = "/calls/initiate",
    request_body = InitiateCallRequest,
    responses(
        (status = 201, description = "Call created in initiated state", body = CallDto),
        (status = 400, description = "Host unavailable or balance too low"),
        (status = 404, description = "Host not found")
    )
)]
pub async fn initiate_call_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<InitiateCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let call = app_state
        .ledger
        .initiate_call(ctx, payload.host_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(CallDto::from(call))))
}

/// Accept a ringing call.
///
/// Only the call's host may accept. The billing clock restarts at acceptance.
#[utoipa::path(
    post,
    path = "/calls/accept",
    request_body = AcceptCallRequest,
    responses(
        (status = 200, description = "Call is now ongoing", body = CallDto),
        (status = 400, description = "Call is not in the initiated state"),
        (status = 403, description = "Requester is not the call's host")
    )
)]
pub async fn accept_call_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<AcceptCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let call = app_state
        .ledger
        .accept_call(ctx, payload.call_id, Utc::now())
        .await?;
    Ok(Json(CallDto::from(call)))
}

/// End a call.
///
/// Either party (or an admin) may end. An unanswered call is cancelled for
/// free; an ongoing call is settled and the summary is returned.
#[utoipa::path(
    post,
    path = "/calls/end",
    request_body = EndCallRequest,
    responses(
        (status = 200, description = "Call ended and settled", body = EndCallResponse),
        (status = 400, description = "Call already ended, or balance cannot cover the bill"),
        (status = 403, description = "Requester is not a party to the call")
    )
)]
pub async fn end_call_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<EndCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (call, summary) = app_state
        .ledger
        .end_call(ctx, payload.call_id, payload.was_disconnected, Utc::now())
        .await?;
    Ok(Json(EndCallResponse {
        call: CallDto::from(call),
        coins_spent: summary.coins_spent,
        duration_seconds: summary.duration_seconds,
        duration_minutes: summary.duration_minutes,
        new_balance: summary.new_caller_balance,
        host_earnings: summary.host_earnings,
        rate_used: summary.rate_used,
    }))
}

/// Rate a completed call.
///
/// Only the caller may rate, exactly once, with 1 to 5 stars.
#[utoipa::path(
    post,
    path = "/calls/rate",
    request_body = RateCallRequest,
    responses(
        (status = 200, description = "Rating recorded", body = CallDto),
        (status = 400, description = "Invalid rating, or call not ratable"),
        (status = 403, description = "Requester is not the caller")
    )
)]
pub async fn rate_call_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<RateCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let call = app_state
        .ledger
        .rate_call(ctx, payload.call_id, payload.rating, payload.feedback)
        .await?;
    Ok(Json(CallDto::from(call)))
}
