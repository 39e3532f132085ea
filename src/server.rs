//! ==============================================================================
//! server.rs - http surface
//! ==============================================================================
//!
//! routes:
//!     - POST /data   form reading from a sensor (urlencoded or multipart)
//!     - GET  /health liveness check, names the storage backend
//!
//! the /data handler walks one request through:
//!
//! ```text
//!     method check ─► ingest::parse_reading ─► sink.write ─► 200
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!         405                 400               503 / 500
//! ```
//!
//! relationships:
//!     - used by: main.rs (builds the router, serves it)
//!     - uses: ingest.rs (validation pipeline), sink.rs (StorageSink)
//!
//! ==============================================================================

use crate::ingest::{self, IngestError, ValidationMode};
use crate::sink::StorageSink;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared by every request; the sink is built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<dyn StorageSink>,
    pub validation: ValidationMode,
}

impl AppState {
    pub fn new(sink: Arc<dyn StorageSink>, validation: ValidationMode) -> Self {
        Self { sink, validation }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // `any` so that wrong methods get our own 405 text
        .route("/data", any(data_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            IngestError::StorageWriteFailed(e) if e.is_unavailable() => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            IngestError::StorageWriteFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::MalformedRequest(_)
            | IngestError::MissingField(_)
            | IngestError::BadTimestamp(_)
            | IngestError::BadNumericValue { .. }
            | IngestError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        let mut response = (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response();
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, header::HeaderValue::from_static("POST"));
        }
        response
    }
}

/// POST /data
async fn data_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<StatusCode, IngestError> {
    let result = ingest_one(&state, request).await;
    match &result {
        Ok(_) => {}
        Err(IngestError::MalformedRequest(cause)) => {
            tracing::debug!(%cause, "rejected malformed post");
        }
        Err(IngestError::StorageWriteFailed(e)) => {
            tracing::error!(error = %e, "storage write failed");
        }
        Err(e) => tracing::debug!(reason = %e, "rejected post"),
    }
    result
}

async fn ingest_one(state: &AppState, request: Request) -> Result<StatusCode, IngestError> {
    if request.method() != Method::POST {
        return Err(IngestError::MethodNotAllowed);
    }

    let query = request.uri().query().map(str::to_owned);
    let reading = if is_multipart(request.headers()) {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| IngestError::MalformedRequest(e.body_text()))?;
        let pairs = multipart_pairs(multipart).await?;
        ingest::parse_pairs(pairs, query.as_deref(), state.validation)?
    } else {
        // anything else is read as urlencoded, whatever the header says
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|e| IngestError::MalformedRequest(e.body_text()))?;
        ingest::parse_reading(&body, query.as_deref(), state.validation)?
    };
    tracing::debug!(
        sensor_id = %reading.sensor_id,
        timestamp = %reading.timestamp,
        "accepted reading"
    );

    state.sink.write(reading).await?;
    Ok(StatusCode::OK)
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("multipart/form-data"))
}

/// Text parts of a multipart form, in order. File parts are not form values.
async fn multipart_pairs(mut multipart: Multipart) -> Result<Vec<(String, String)>, IngestError> {
    let mut pairs = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| IngestError::MalformedRequest(e.body_text()))?
    {
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| IngestError::MalformedRequest(e.body_text()))?;
        pairs.push((name, value));
    }
    Ok(pairs)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "backend": state.sink.name(),
    }))
}
