//! Event API endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use bleadvert_core::{BleAdvertError, Event};
use chrono::Utc;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the events router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/active", get(get_active_event))
}

/// The event currently open for scanning.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActiveEventResponse {
    /// The event.
    pub event: Event,

    /// Window start in the configured timezone (RFC 3339).
    #[schema(example = "2025-03-01T09:00:00+01:00")]
    pub starts_local: String,

    /// Window end in the configured timezone (RFC 3339).
    #[schema(example = "2025-03-08T09:00:00+01:00")]
    pub ends_local: String,

    /// Configured timezone.
    #[schema(example = "Europe/Zagreb")]
    pub timezone: String,
}

/// Get the active event.
#[utoipa::path(
    get,
    path = "/api/events/active",
    tag = "events",
    operation_id = "getActiveEvent",
    summary = "Get the active event",
    description = "Returns the event whose [start, end) window contains the \
        current time. With overlapping windows the last declared event wins.",
    responses(
        (status = 200, description = "Active event", body = ActiveEventResponse),
        (status = 409, description = "No event is active", body = crate::api::ErrorResponse)
    )
)]
pub async fn get_active_event(
    State(state): State<SharedState>,
) -> ApiResult<Json<ActiveEventResponse>> {
    let state_guard = state.read().await;
    let event = state_guard
        .catalog
        .active_event(Utc::now())
        .cloned()
        .ok_or(BleAdvertError::NoActiveEvent)?;

    let tz: Tz = state_guard.config.system.tz();
    Ok(Json(ActiveEventResponse {
        starts_local: event.start.with_timezone(&tz).to_rfc3339(),
        ends_local: event.end.with_timezone(&tz).to_rfc3339(),
        timezone: tz.name().to_string(),
        event,
    }))
}
