use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

pub mod llm_client;
pub mod repair;
pub mod validation;

#[cfg(test)]
mod tests;

use llm_client::CompletionBackend;
use repair::RepairInterceptor;
use validation::{
    payload_limit_config, validate_content_type, validate_payload, SumRequest, SumResponse,
    ValidationErrorResponse, SUM_REQUEST_SCHEMA, SUM_REQUEST_SCHEMA_JSON,
};

/// Track service start time for uptime reporting
pub static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub service_name: String,
    pub uptime_seconds: i64,
    pub status: String,
}

/// Shared application state
///
/// Read-only after startup; concurrent requests share it behind an Arc and
/// nothing here is mutated per request.
pub struct AppState {
    repair: RepairInterceptor,
}

impl AppState {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            repair: RepairInterceptor::new(
                backend,
                &*SUM_REQUEST_SCHEMA,
                &*SUM_REQUEST_SCHEMA_JSON,
            ),
        }
    }
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/sum", post(sum_dispatch_handler))
        .layer(middleware::from_fn(validate_content_type_middleware))
        .layer(payload_limit_config())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Middleware for validating request content type
async fn validate_content_type_middleware(
    req: axum::http::Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ValidationErrorResponse>)> {
    let path = req.uri().path().to_string();

    if !path.starts_with("/api/v1/") {
        return Ok(next.run(req).await);
    }

    let required_content_type = match path.as_str() {
        "/api/v1/sum" => "application/json",
        _ => return Ok(next.run(req).await),
    };

    if let Err(err) = validate_content_type(req.headers(), required_content_type) {
        let (status, response) = err.to_response();
        return Err((status, response));
    }

    Ok(next.run(req).await)
}

/// POST /api/v1/sum - validate the raw body and dispatch to the sum handler
///
/// The handler reads the body bytes itself instead of using the Json
/// extractor: on a validation failure the verbatim payload has to be
/// available for the repair path.
async fn sum_dispatch_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let raw = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(_) => {
            let error = validation::ApiValidationError::InvalidFormat(
                "Request body is not valid UTF-8".to_string(),
            );
            let (status, response) = error.to_response();
            return (status, response).into_response();
        }
    };

    match validate_payload(raw) {
        Ok(request) => {
            log::info!(
                "Sum request {} validated ({} values)",
                request_id,
                request.numbers.len()
            );
            sum_handler(request).await.into_response()
        }
        Err(failure) => {
            log::warn!(
                "Sum request {} failed validation: {}; attempting payload repair",
                request_id,
                failure.detail
            );
            state
                .repair
                .on_validation_failure(failure, |repaired: SumRequest| async move {
                    sum_handler(repaired).await.into_response()
                })
                .await
        }
    }
}

/// Sum a list of numbers.
///
/// The wrapped endpoint: pure and side-effect free, so the dispatcher and
/// the repair path can both invoke it safely.
pub async fn sum_handler(request: SumRequest) -> Json<SumResponse> {
    let sum = request.numbers.iter().sum();
    Json(SumResponse { sum })
}

/// GET /health - Health check endpoint
async fn health_handler() -> impl IntoResponse {
    let uptime = START_TIME.elapsed().as_secs() as i64;

    Json(HealthResponse {
        healthy: true,
        service_name: "sum-service".to_string(),
        uptime_seconds: uptime,
        status: "SERVING".to_string(),
    })
}

/// GET / - Root endpoint
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "Sum Service",
        "version": "1.0.0",
        "endpoints": [
            "GET /health",
            "POST /api/v1/sum"
        ]
    }))
}
