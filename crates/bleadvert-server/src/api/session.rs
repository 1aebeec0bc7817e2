//! Scanning session API endpoints.
//!
//! A session binds one user to the event active right now. While it runs,
//! RSSI samples posted to `/api/samples` (or discovered over BlueZ with the
//! `bluetooth` feature) drive closest-beacon selection and dwell timing.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bleadvert_core::{
    is_valid_mac_address, BeaconSample, BleAdvertError, ClosestBeacon, SessionContext,
    SessionSummary, User,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::{AppState, SharedState};

/// Creates the session router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_session))
        .route("/start", post(start_session))
        .route("/stop", post(stop_session))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current session state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "scanning": true,
    "user_id": "u1",
    "event_id": "expo-2025",
    "event_title": "Expo 2025",
    "closest": {
        "beacon": {
            "id": "b-entrance",
            "address": "AA:BB:CC:DD:EE:01",
            "url": "https://example.com/entrance",
            "position": { "x": 0.0, "y": 0.0 },
            "max_advertisement_distance": 1.25
        },
        "distance": 0.8
    }
}))]
pub struct SessionStatusResponse {
    /// Whether a session is running.
    pub scanning: bool,

    /// Scanning user, when running.
    pub user_id: Option<String>,

    /// Event scans are credited to, when running.
    pub event_id: Option<String>,

    /// Title of that event.
    pub event_title: Option<String>,

    /// Closest eligible beacon; `beacon` is null when none is in range.
    pub closest: ClosestBeacon,
}

impl SessionStatusResponse {
    fn from_state(state: &AppState) -> Self {
        let context = state.session.context();
        Self {
            scanning: state.session.is_scanning(),
            user_id: context.map(|c| c.user.id.clone()),
            event_id: context.map(|c| c.event.id.clone()),
            event_title: context.map(|c| c.event.title.clone()),
            closest: state.session.current_closest(),
        }
    }
}

/// Request body for starting a session.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "user_id": "u1",
    "name": "Ada"
}))]
pub struct StartSessionRequest {
    /// Account id of the scanning user.
    #[schema(example = "u1", min_length = 1)]
    pub user_id: String,

    /// Display name.
    #[serde(default)]
    #[schema(example = "Ada")]
    pub name: String,
}

/// A batch of RSSI samples.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IngestSamplesRequest {
    /// Samples in arrival order.
    pub samples: Vec<BeaconSample>,
}

/// Result of sample ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "accepted": 12 }))]
pub struct IngestSamplesResponse {
    /// Samples queued for the running session.
    pub accepted: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the scanning session state.
#[utoipa::path(
    get,
    path = "/api/session",
    tag = "session",
    operation_id = "getSession",
    summary = "Get scanning session state",
    description = "Returns whether a session is running, who it belongs to, and \
        the closest eligible beacon.",
    responses(
        (status = 200, description = "Session state", body = SessionStatusResponse)
    )
)]
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionStatusResponse> {
    let state_guard = state.read().await;
    Json(SessionStatusResponse::from_state(&state_guard))
}

/// Start a scanning session.
#[utoipa::path(
    post,
    path = "/api/session/start",
    tag = "session",
    operation_id = "startSession",
    summary = "Start scanning",
    description = "Starts a session for the user against the event whose time \
        window contains the current time.",
    request_body = StartSessionRequest,
    responses(
        (status = 200, description = "Session started", body = SessionStatusResponse),
        (status = 400, description = "Missing user id", body = crate::api::ErrorResponse),
        (status = 409, description = "Session already running or no active event", body = crate::api::ErrorResponse),
        (status = 503, description = "Bluetooth unavailable", body = crate::api::ErrorResponse)
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<Json<SessionStatusResponse>> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest {
            error_code: "missing_user_id".to_string(),
            message: "user_id must not be empty".to_string(),
        });
    }

    let mut state_guard = state.write().await;
    let event = state_guard
        .catalog
        .active_event(Utc::now())
        .cloned()
        .ok_or(BleAdvertError::NoActiveEvent)?;
    let user = User {
        id: request.user_id,
        name: request.name,
        is_admin: false,
    };
    let beacons = state_guard.catalog.beacons.clone();
    state_guard
        .session
        .start(SessionContext::new(user, event), beacons)?;

    #[cfg(feature = "bluetooth")]
    if let Some(samples) = state_guard.session.sample_sender() {
        match bleadvert_core::BluetoothScanner::start(samples).await {
            Ok(scanner) => state_guard.scanner = Some(scanner),
            Err(err) => {
                let _ = state_guard.session.stop().await;
                return Err(BleAdvertError::from(err).into());
            }
        }
    }

    Ok(Json(SessionStatusResponse::from_state(&state_guard)))
}

/// Stop the scanning session.
#[utoipa::path(
    post,
    path = "/api/session/stop",
    tag = "session",
    operation_id = "stopSession",
    summary = "Stop scanning",
    description = "Stops the running session. The in-flight visit is reported \
        and pending scans finish before this returns.",
    responses(
        (status = 200, description = "Session stopped", body = SessionSummary),
        (status = 409, description = "No session running", body = crate::api::ErrorResponse)
    )
)]
pub async fn stop_session(State(state): State<SharedState>) -> ApiResult<Json<SessionSummary>> {
    let mut state_guard = state.write().await;

    #[cfg(feature = "bluetooth")]
    if let Some(scanner) = state_guard.scanner.take() {
        scanner.stop();
    }

    let summary = state_guard.session.stop().await?;
    Ok(Json(summary))
}

/// Ingest RSSI samples.
#[utoipa::path(
    post,
    path = "/api/samples",
    tag = "session",
    operation_id = "ingestSamples",
    summary = "Ingest RSSI samples",
    description = "Queues a batch of samples for the running session. Samples \
        from addresses not in the catalog are ignored by the session.",
    request_body = IngestSamplesRequest,
    responses(
        (status = 200, description = "Samples queued", body = IngestSamplesResponse),
        (status = 400, description = "Malformed address", body = crate::api::ErrorResponse),
        (status = 409, description = "No session running", body = crate::api::ErrorResponse)
    )
)]
pub async fn ingest_samples(
    State(state): State<SharedState>,
    Json(request): Json<IngestSamplesRequest>,
) -> ApiResult<Json<IngestSamplesResponse>> {
    if let Some(sample) = request
        .samples
        .iter()
        .find(|s| !is_valid_mac_address(&s.address))
    {
        return Err(BleAdvertError::InvalidBeaconAddress(sample.address.clone()).into());
    }

    let state_guard = state.read().await;
    let accepted = request.samples.len();
    for sample in request.samples {
        state_guard.session.ingest(sample)?;
    }
    Ok(Json(IngestSamplesResponse { accepted }))
}
