//! OpenAPI specification generation for the bleadvert API.
//!
//! The document is served at `/api/openapi.json`, browsable through Swagger UI
//! at `/docs`, and written to disk by the `gen-openapi` binary.

use axum::Json;
use bleadvert_core::{
    Beacon, BeaconIdentity, BeaconSample, ClosestBeacon, Event, Position, Reward, SessionSummary,
    UserEventProgress, UserInfo,
};
use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::events::ActiveEventResponse;
use super::health::HealthResponse;
use super::session::{
    IngestSamplesRequest, IngestSamplesResponse, SessionStatusResponse, StartSessionRequest,
};
use super::users::{HistoryResponse, ProgressResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for bleadvert.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "bleadvert API",
        version = "0.1.0",
        description = r#"
# bleadvert API

bleadvert rewards visitors for spending time near BLE beacons placed around an event venue.

## Overview

1. **Sessions**: Start a scanning session for a user against the event active right now.
2. **Samples**: Feed RSSI readings; the closest beacon within its own advertisement radius is tracked.
3. **Scans**: Staying at the same beacon for five seconds records a scan, once per beacon per event.
4. **Rewards**: Scans count towards each event's reward ladder; newly unlocked rewards are announced once.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local bleadvert server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "session", description = "Scanning session lifecycle and sample ingestion"),
        (name = "events", description = "Event catalog"),
        (name = "users", description = "Per-user scan progress and history")
    ),
    paths(
        super::health::health_check,
        super::session::get_session,
        super::session::start_session,
        super::session::stop_session,
        super::session::ingest_samples,
        super::events::get_active_event,
        super::users::get_progress,
        super::users::get_history,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            SessionStatusResponse,
            StartSessionRequest,
            IngestSamplesRequest,
            IngestSamplesResponse,
            SessionSummary,
            ActiveEventResponse,
            ProgressResponse,
            HistoryResponse,
            Beacon,
            BeaconIdentity,
            BeaconSample,
            ClosestBeacon,
            Event,
            Position,
            Reward,
            UserEventProgress,
            UserInfo,
        )
    )
)]
pub struct ApiDoc;
