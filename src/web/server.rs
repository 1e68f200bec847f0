//! Axum server for chart queries.
//!
//! Routes:
//!
//! - `POST /api/charts:query` runs a chart query, answering `{"data": ...}`
//! - `POST /api/charts:sql` returns the SQL a chart query would run
//! - `GET /api/health`
//!
//! The caller's role, timezone and user travel in the `X-Role`,
//! `X-Timezone` and `X-User` (JSON) headers.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Settings;
use crate::pipeline::QueryFailure;
use crate::request::{QueryRequest, RequestState};
use crate::service::QueryService;

pub const ROLE_HEADER: &str = "x-role";
pub const TIMEZONE_HEADER: &str = "x-timezone";
pub const USER_HEADER: &str = "x-user";

/// Build the axum router with all routes
pub fn router(service: Arc<QueryService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/charts:query", post(chart_query))
        .route("/api/charts:sql", post(chart_sql))
        .route("/api/health", get(health))
        .layer(cors)
        .with_state(service)
}

/// Start the web server
pub async fn serve(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(QueryService::from_settings(settings)?);
    let app = router(service);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct ErrorBody {
    errors: Vec<ErrorMessage>,
}

#[derive(Serialize)]
struct ErrorMessage {
    message: String,
}

fn failure_response(failure: QueryFailure) -> Response {
    let status =
        StatusCode::from_u16(failure.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorBody {
        errors: vec![ErrorMessage {
            message: failure.message,
        }],
    };
    (status, Json(body)).into_response()
}

/// Caller state from request headers. A malformed `X-User` is ignored.
pub fn request_state(headers: &HeaderMap) -> RequestState {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let mut state = RequestState::new();
    if let Some(role) = header(ROLE_HEADER) {
        state = state.with_role(role);
    }
    if let Some(tz) = header(TIMEZONE_HEADER) {
        state = state.with_timezone(tz);
    }
    if let Some(user) = header(USER_HEADER).and_then(|u| serde_json::from_str::<Value>(u).ok()) {
        state = state.with_user(user);
    }
    state
}

/// POST /api/charts:query
async fn chart_query(
    State(service): State<Arc<QueryService>>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    match service.query(request, request_state(&headers)).await {
        Ok(data) => Json(json!({ "data": data })).into_response(),
        Err(failure) => failure_response(failure),
    }
}

/// POST /api/charts:sql
async fn chart_sql(
    State(service): State<Arc<QueryService>>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Response {
    match service.explain(request, request_state(&headers)).await {
        Ok(sql) => Json(json!({ "data": { "sql": sql } })).into_response(),
        Err(failure) => failure_response(failure),
    }
}

/// GET /api/health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
