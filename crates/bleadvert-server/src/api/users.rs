//! User progress API endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use bleadvert_core::{Event, ProgressStore, UserEventProgress, UserInfo};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the users router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/{user_id}/progress/{event_id}", get(get_progress))
        .route("/{user_id}/history", get(get_history))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// A user's standing in one event.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressResponse {
    /// User id.
    #[schema(example = "u1")]
    pub user_id: String,

    /// Event id.
    #[schema(example = "expo-2025")]
    pub event_id: String,

    /// Scans, unlocked rewards and credited beacons in this event.
    pub progress: UserEventProgress,

    /// Scans and rewards across all events.
    pub totals: UserInfo,
}

/// Closed events the user scanned in.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    /// User id.
    #[schema(example = "u1")]
    pub user_id: String,

    /// Expired events with progress, in catalog order.
    pub events: Vec<Event>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get a user's progress in an event.
#[utoipa::path(
    get,
    path = "/api/users/{user_id}/progress/{event_id}",
    tag = "users",
    operation_id = "getProgress",
    summary = "Get event progress",
    description = "Returns the progress document for (user, event) together with \
        the user's global totals. A user with no scans gets empty progress.",
    params(
        ("user_id" = String, Path, description = "User id"),
        ("event_id" = String, Path, description = "Event id")
    ),
    responses(
        (status = 200, description = "Progress retrieved", body = ProgressResponse),
        (status = 404, description = "Unknown event", body = crate::api::ErrorResponse)
    )
)]
pub async fn get_progress(
    State(state): State<SharedState>,
    Path((user_id, event_id)): Path<(String, String)>,
) -> ApiResult<Json<ProgressResponse>> {
    let state_guard = state.read().await;
    if state_guard.catalog.event(&event_id).is_none() {
        return Err(ApiError::NotFound {
            error_code: "event_not_found".to_string(),
            message: format!("Event not found: {event_id}"),
        });
    }

    let progress = state_guard.store.read_progress(&user_id, &event_id).await?;
    let totals = state_guard.store.read_user_info(&user_id).await?;

    Ok(Json(ProgressResponse {
        user_id,
        event_id,
        progress: progress.value,
        totals: totals.value,
    }))
}

/// Get a user's scan history.
#[utoipa::path(
    get,
    path = "/api/users/{user_id}/history",
    tag = "users",
    operation_id = "getHistory",
    summary = "Get scan history",
    description = "Returns the expired events the user holds progress in.",
    params(
        ("user_id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "History retrieved", body = HistoryResponse)
    )
)]
pub async fn get_history(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<HistoryResponse>> {
    let state_guard = state.read().await;
    let event_ids = state_guard.store.list_progress(&user_id).await?;
    let events = state_guard
        .catalog
        .history(&event_ids, Utc::now())
        .into_iter()
        .cloned()
        .collect();

    Ok(Json(HistoryResponse { user_id, events }))
}
