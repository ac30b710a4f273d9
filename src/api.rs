// 🌐 HTTP API - detection endpoints over axum
//
// Same routes served at the root and under /v1. Handlers are thin: decode, call the
// pipeline, encode. Errors always come back as {success: false, kind, error}.

use crate::config::Settings;
use crate::detectors::Detectors;
use crate::error::DetectionError;
use crate::models::{
    AnomalyRequest, AnomalyResult, BatchDetectionResponse, BatchTransactionRequest,
    CategoryRequest, CategoryResult, HealthResponse, HealthStatus, MerchantResult, Transaction,
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub detectors: Arc<Detectors>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(detectors: Detectors, settings: Settings) -> Self {
        AppState {
            detectors: Arc::new(detectors),
            settings: Arc::new(settings),
        }
    }
}

// ============================================================================
// Error envelope
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    kind: &'static str,
    error: String,
}

/// Error returned by every handler
#[derive(Debug)]
pub enum ApiError {
    Detection(DetectionError),
    /// Body did not decode into the expected shape
    BadBody(String),
}

impl From<DetectionError> for ApiError {
    fn from(e: DetectionError) -> Self {
        ApiError::Detection(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Detection(e) => {
                let status = match &e {
                    DetectionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    DetectionError::ExternalClassification { .. } => StatusCode::BAD_GATEWAY,
                    DetectionError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::BadBody(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                format!("invalid request body: {}", message),
            ),
        };

        let body = ErrorBody {
            success: false,
            kind,
            error: message,
        };

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// API Handlers
// ============================================================================

#[derive(Debug, Serialize)]
struct ServiceInfo {
    service: String,
    version: String,
    health: &'static str,
    endpoints: Vec<&'static str>,
}

/// GET / - Service info
async fn index(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: state.settings.service_name.clone(),
        version: state.settings.service_version.clone(),
        health: "/health",
        endpoints: vec![
            "/detect/merchant",
            "/detect/category",
            "/detect/anomaly",
            "/detect/batch",
        ],
    })
}

/// GET /health - Liveness plus whether the active provider has a credential
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let llm_available = state.settings.llm_available();

    Json(HealthResponse {
        status: if llm_available {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        version: state.settings.service_version.clone(),
        llm_provider: state.settings.llm_provider.to_string(),
        llm_available,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// POST /detect/merchant
async fn detect_merchant(
    State(state): State<AppState>,
    body: Result<Json<Transaction>, JsonRejection>,
) -> ApiResult<MerchantResult> {
    let Json(tx) = body?;
    info!(transaction_id = %tx.id, "merchant_detection_request");

    match state.detectors.merchant.detect(&tx).await {
        Ok(result) => {
            info!(
                transaction_id = %tx.id,
                merchant = %result.merchant,
                method = %result.method,
                "merchant_detection_success"
            );
            Ok(Json(result))
        }
        Err(e) => {
            error!(transaction_id = %tx.id, kind = e.kind(), error = %e, "merchant_detection_error");
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
struct CategoryQuery {
    merchant: Option<String>,
}

/// POST /detect/category - merchant from the body, else the query, else inferred
async fn detect_category(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
    body: Result<Json<CategoryRequest>, JsonRejection>,
) -> ApiResult<CategoryResult> {
    let Json(request) = body?;
    let (tx, body_merchant) = request.into_parts();
    let merchant = body_merchant.or(query.merchant);

    info!(
        transaction_id = %tx.id,
        merchant = merchant.as_deref().unwrap_or(""),
        "category_detection_request"
    );

    match state.detectors.detect_category(&tx, merchant.as_deref()).await {
        Ok(result) => {
            info!(
                transaction_id = %tx.id,
                category = %result.category,
                method = %result.method,
                "category_detection_success"
            );
            Ok(Json(result))
        }
        Err(e) => {
            error!(transaction_id = %tx.id, kind = e.kind(), error = %e, "category_detection_error");
            Err(e.into())
        }
    }
}

/// POST /detect/anomaly
async fn detect_anomaly(
    State(state): State<AppState>,
    body: Result<Json<AnomalyRequest>, JsonRejection>,
) -> ApiResult<AnomalyResult> {
    let Json(request) = body?;
    let tx = &request.transaction;

    info!(
        transaction_id = %tx.id,
        historical_count = request.historical_amounts.len(),
        "anomaly_detection_request"
    );

    match state.detectors.anomaly.detect(tx, &request.historical_amounts) {
        Ok(result) => {
            if result.is_anomaly {
                warn!(
                    transaction_id = %tx.id,
                    score = result.anomaly_score,
                    "anomaly_detected"
                );
            }
            Ok(Json(result))
        }
        Err(e) => {
            error!(transaction_id = %tx.id, kind = e.kind(), error = %e, "anomaly_detection_error");
            Err(e.into())
        }
    }
}

/// POST /detect/batch - merchant + category for every transaction
async fn detect_batch(
    State(state): State<AppState>,
    body: Result<Json<BatchTransactionRequest>, JsonRejection>,
) -> ApiResult<BatchDetectionResponse> {
    let Json(request) = body?;
    info!(count = request.transactions.len(), "batch_detection_request");

    match state.detectors.classify_batch(&request.transactions).await {
        Ok(response) => {
            info!(
                processed = response.processed_count,
                failed = response.failed_count,
                "batch_detection_success"
            );
            Ok(Json(response))
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "batch_detection_error");
            Err(e.into())
        }
    }
}

// ============================================================================
// Router
// ============================================================================

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o.trim() == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "cors_origin_ignored");
                None
            }
        })
        .collect();

    layer.allow_origin(allowed)
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/detect/merchant", post(detect_merchant))
        .route("/detect/category", post(detect_category))
        .route("/detect/anomaly", post(detect_anomaly))
        .route("/detect/batch", post(detect_batch))
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);

    Router::new()
        .merge(routes())
        .nest("/v1", routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
