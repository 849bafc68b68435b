//! services/api/src/web/free_target.rs
//!
//! Axum handlers for the free-target program: the host-facing status and
//! timer endpoints, and the admin-facing toggle and day-override endpoints.
//!
//! Host endpoints resolve the host profile from the authenticated user, so a
//! host can only ever touch their own target document.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use hostline_core::domain::{AuthContext, DayStatus, DayTarget, FreeTarget};
use hostline_core::ports::PortError;

use crate::error::ApiError;
use crate::web::state::AppState;

//=========================================================================================
// Payload and Response Structs
//=========================================================================================

/// One day of the free-target week, as exposed over the API.
#[derive(Serialize, ToSchema)]
pub struct DayTargetDto {
    pub date: NaiveDate,
    pub status: String,
    pub total_call_duration: i64,
    pub disconnect_count: i32,
    pub timer_active: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<DayTarget> for DayTargetDto {
    fn from(day: DayTarget) -> Self {
        Self {
            date: day.date,
            status: day_status_str(day.status).to_string(),
            total_call_duration: day.total_call_duration,
            disconnect_count: day.disconnect_count,
            timer_active: day.timer_active,
            completed_at: day.completed_at,
        }
    }
}

/// The host's current free-target standing.
#[derive(Serialize, ToSchema)]
pub struct FreeTargetStatusResponse {
    pub is_enabled: bool,
    pub target_duration_per_day: i64,
    pub week_start: NaiveDate,
    pub completed_days: i32,
    pub weeks_completed: i64,
    pub weeks_failed: i64,
    pub today: Option<DayTargetDto>,
    /// Seconds of call time still needed to complete today's quota.
    pub time_remaining: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct RecordCallRequest {
    pub call_id: Uuid,
    pub duration_seconds: i64,
    #[serde(default)]
    pub was_disconnected: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct ToggleFreeTargetRequest {
    pub enabled: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct OverrideDayRequest {
    pub date: NaiveDate,
    /// One of "pending", "completed", "failed", "admin_override".
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

fn day_status_str(status: DayStatus) -> &'static str {
    match status {
        DayStatus::Pending => "pending",
        DayStatus::Completed => "completed",
        DayStatus::Failed => "failed",
        DayStatus::AdminOverride => "admin_override",
    }
}

fn parse_day_status(raw: &str) -> Result<DayStatus, PortError> {
    match raw {
        "pending" => Ok(DayStatus::Pending),
        "completed" => Ok(DayStatus::Completed),
        "failed" => Ok(DayStatus::Failed),
        "admin_override" => Ok(DayStatus::AdminOverride),
        other => Err(PortError::Validation(format!(
            "unknown day status '{other}'"
        ))),
    }
}

fn status_response(target: &FreeTarget, now: DateTime<Utc>) -> FreeTargetStatusResponse {
    let today = now.date_naive();
    FreeTargetStatusResponse {
        is_enabled: target.is_enabled,
        target_duration_per_day: target.target_duration_per_day,
        week_start: target.current_week.start_date,
        completed_days: target.current_week.completed_days,
        weeks_completed: target.weeks_completed,
        weeks_failed: target.weeks_failed,
        today: target.current_week.day(today).cloned().map(DayTargetDto::from),
        time_remaining: target.time_remaining(today),
    }
}

/// Resolves the host profile owned by the authenticated user.
async fn own_host_id(app_state: &AppState, ctx: AuthContext) -> Result<Uuid, ApiError> {
    let host = app_state.hosts.get_host_by_user(ctx.user_id).await?;
    Ok(host.id)
}

fn require_admin(ctx: AuthContext) -> Result<(), ApiError> {
    if !ctx.is_admin() {
        return Err(PortError::Forbidden("admin role required".into()).into());
    }
    Ok(())
}

//=========================================================================================
// Host-Facing Handlers
//=========================================================================================

/// Get the host's free-target standing for the current week.
#[utoipa::path(
    get,
    path = "/free-target/today",
    responses(
        (status = 200, description = "Current free-target standing", body = FreeTargetStatusResponse),
        (status = 404, description = "User has no host profile or no target document")
    )
)]
pub async fn free_target_today_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id = own_host_id(&app_state, ctx).await?;
    let now = Utc::now();
    let target = app_state.free_targets.current(host_id, now).await?;
    Ok(Json(status_response(&target, now)))
}

/// Start today's availability timer.
#[utoipa::path(
    post,
    path = "/free-target/start-timer",
    responses(
        (status = 200, description = "Timer started", body = DayTargetDto),
        (status = 400, description = "Timer already running or day not pending")
    )
)]
pub async fn start_timer_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id = own_host_id(&app_state, ctx).await?;
    let day = app_state
        .free_targets
        .start_timer(host_id, Utc::now())
        .await?;
    Ok(Json(DayTargetDto::from(day)))
}

/// Stop today's availability timer.
#[utoipa::path(
    post,
    path = "/free-target/stop-timer",
    responses(
        (status = 200, description = "Timer stopped", body = DayTargetDto),
        (status = 400, description = "Timer is not running")
    )
)]
pub async fn stop_timer_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id = own_host_id(&app_state, ctx).await?;
    let day = app_state
        .free_targets
        .stop_timer(host_id, Utc::now())
        .await?;
    Ok(Json(DayTargetDto::from(day)))
}

/// Manually record a finished call against today's target.
///
/// Settled calls are fed in automatically; this endpoint covers sessions the
/// ledger never saw, such as calls ended while the backend was down.
#[utoipa::path(
    post,
    path = "/free-target/record-call",
    request_body = RecordCallRequest,
    responses(
        (status = 200, description = "Updated standing after the call", body = FreeTargetStatusResponse),
        (status = 404, description = "No enabled target document")
    )
)]
pub async fn record_call_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(payload): Json<RecordCallRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id = own_host_id(&app_state, ctx).await?;
    let now = Utc::now();
    let outcome = app_state
        .free_targets
        .record_call(
            host_id,
            payload.call_id,
            payload.duration_seconds,
            payload.was_disconnected,
            now,
        )
        .await?;
    let (target, _) = outcome.ok_or_else(|| {
        ApiError::from(PortError::NotFound(
            "host has no enabled free target".into(),
        ))
    })?;
    Ok(Json(status_response(&target, now)))
}

//=========================================================================================
// Admin-Facing Handlers
//=========================================================================================

/// Enable or disable a host's free-target participation.
#[utoipa::path(
    patch,
    path = "/admin/free-target/{host_id}/toggle",
    request_body = ToggleFreeTargetRequest,
    params(("host_id" = Uuid, Path, description = "The host profile id.")),
    responses(
        (status = 200, description = "Updated standing", body = FreeTargetStatusResponse),
        (status = 403, description = "Requester is not an admin")
    )
)]
pub async fn toggle_free_target_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(host_id): Path<Uuid>,
    Json(payload): Json<ToggleFreeTargetRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(ctx)?;
    let now = Utc::now();
    let target = app_state
        .free_targets
        .toggle(host_id, payload.enabled, now)
        .await?;
    Ok(Json(status_response(&target, now)))
}

/// Force a day's status, with an audit note.
#[utoipa::path(
    patch,
    path = "/admin/free-target/{host_id}/override-day",
    request_body = OverrideDayRequest,
    params(("host_id" = Uuid, Path, description = "The host profile id.")),
    responses(
        (status = 200, description = "The overridden day", body = DayTargetDto),
        (status = 403, description = "Requester is not an admin"),
        (status = 404, description = "No target tracks that date")
    )
)]
pub async fn override_day_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(host_id): Path<Uuid>,
    Json(payload): Json<OverrideDayRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(ctx)?;
    let status = parse_day_status(&payload.status)?;
    let day = app_state
        .free_targets
        .override_day(
            host_id,
            payload.date,
            status,
            payload.note,
            ctx.user_id,
            Utc::now(),
        )
        .await?;
    Ok(Json(DayTargetDto::from(day)))
}
