//! Request handlers and the error response shape.

use axum::{
    extract::{rejection::JsonRejection, OriginalUri, Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::{DispatchError, ErrorEnvelope, ErrorKind};
use crate::services::dispatcher::RawRequest;
use crate::services::health::ComponentStatus;
use crate::services::metrics::Outcome;

use super::server::RelayState;

/// Header carrying the session id, in both directions.
pub const SESSION_HEADER: &str = "x-session-id";
/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session_id";
/// Header carrying the client credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, alias = "agent_type")]
    pub agent_type: Option<String>,
}

/// Error body sent to clients.
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorKind,
    message: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
    timestamp: DateTime<Utc>,
}

/// An envelope bound to the request path it answers.
#[derive(Debug)]
pub struct ApiError {
    pub envelope: ErrorEnvelope,
    pub path: String,
}

impl ApiError {
    pub fn new(envelope: ErrorEnvelope, path: impl Into<String>) -> Self {
        Self {
            envelope,
            path: path.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.envelope.kind.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            success: false,
            error: self.envelope.kind,
            message: self.envelope.message,
            path: self.path,
            detail: self.envelope.detail,
            timestamp: self.envelope.timestamp,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct Acknowledgement {
    success: bool,
    message: &'static str,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Session id from `X-Session-Id`, falling back to the `session_id` cookie.
fn session_from(headers: &HeaderMap) -> Option<String> {
    if let Some(id) = header_str(headers, SESSION_HEADER).filter(|id| !id.trim().is_empty()) {
        return Some(id.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
}

fn authorize(state: &RelayState, headers: &HeaderMap, path: &str) -> Result<(), ApiError> {
    state
        .dispatcher
        .authenticate(header_str(headers, API_KEY_HEADER))
        .map_err(|err| ApiError::new(err.to_envelope(state.dispatcher.config().debug), path))
}

/// `POST /api/chat`
pub async fn chat(
    State(state): State<Arc<RelayState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let path = uri.path().to_string();
    let Json(body) = payload.map_err(|rejection| {
        // Never reaches the dispatcher, so account for it here.
        state
            .dispatcher
            .metrics()
            .record(Duration::ZERO, Outcome::Error(ErrorKind::ValidationError));
        let err = DispatchError::Validation(format!("Invalid request body: {}", rejection.body_text()));
        ApiError::new(err.to_envelope(state.dispatcher.config().debug), &path)
    })?;

    let request = RawRequest {
        message: body.message,
        agent_type: body.agent_type,
        session_id: session_from(&headers),
        api_key: header_str(&headers, API_KEY_HEADER).map(str::to_string),
    };

    let response = state
        .dispatcher
        .process(request)
        .await
        .map_err(|envelope| ApiError::new(envelope, &path))?;

    let mut out = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&response.session_id) {
        out.insert(SESSION_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
        response.session_id
    )) {
        out.insert(header::SET_COOKIE, value);
    }

    Ok((out, Json(response)))
}

/// `GET /api/metrics`
pub async fn metrics(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(state.dispatcher.metrics_report().await)
}

/// `POST /api/metrics/reset`
pub async fn reset_metrics(
    State(state): State<Arc<RelayState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, uri.path())?;
    state.dispatcher.reset_metrics();
    Ok(Json(Acknowledgement {
        success: true,
        message: "Metrics reset",
    }))
}

/// `GET /api/health`
pub async fn health(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let report = state.dispatcher.health().await;
    let status = if report.status == ComponentStatus::Down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}

/// `DELETE /api/sessions/{id}`
pub async fn forget_session(
    State(state): State<Arc<RelayState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, uri.path())?;
    state
        .dispatcher
        .forget_session(&session_id)
        .await
        .map_err(|err| ApiError::new(err.to_envelope(state.dispatcher.config().debug), uri.path()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/admin/reset`
pub async fn admin_reset(
    State(state): State<Arc<RelayState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers, uri.path())?;
    state.dispatcher.admin_reset().await;
    Ok(Json(Acknowledgement {
        success: true,
        message: "Caches cleared, circuit breaker and metrics reset",
    }))
}

/// Fallback for unknown routes.
pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    let err = DispatchError::NotFound(format!("No route for {method} {}", uri.path()));
    ApiError::new(err.to_envelope(false), uri.path())
}
