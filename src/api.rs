//! HTTP API for churn predictions
//!
//! ## Endpoints
//!
//! - `GET /` - Service banner
//! - `GET /health` - Model kind, dataset size, start time
//! - `GET /items` - Every customer row
//! - `GET /item/:item_id` - One customer row by `public_id`
//! - `GET /item/predictions/:item_id` - One customer row plus its prediction
//! - `POST /predict` - Predict churn for a customer payload
//! - `POST /predict/debug` - Echo a payload with the JSON type of each field
//! - `GET /probability/:dimension` - Churn probability grouped by `age`,
//!   `gender`, `subscription` (or `subscription_type`) or `region`

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::aggregate::summarize;
use crate::classifier::{predict_one, Classifier};
use crate::dataset::DatasetSource;
use crate::error::ServiceError;
use crate::models::{CustomerRecord, FeatureColumn, GroupedReport, Prediction};
use crate::normalize::normalize_value;

const API_TITLE: &str = "Churn Prediction API";

/// Read-only handles shared by every request.
#[derive(Clone)]
pub struct AppState {
    classifier: Arc<dyn Classifier>,
    dataset: DatasetSource,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(classifier: Arc<dyn Classifier>, dataset: DatasetSource) -> Self {
        Self {
            classifier,
            dataset,
            started_at: Utc::now(),
        }
    }
}

/// Everything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    /// Payload did not match the customer schema.
    Invalid {
        detail: Vec<String>,
        body_received: Value,
    },
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Invalid {
                detail,
                body_received,
            } => {
                warn!(?detail, body = %body_received, "rejected request payload");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({
                        "detail": detail,
                        "message": "The submitted data does not match the expected format",
                        "body_received": body_received,
                    })),
                )
                    .into_response()
            }
            ApiError::Service(err @ ServiceError::NotFound(_)) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": err.to_string() })),
            )
                .into_response(),
            ApiError::Service(err @ ServiceError::UnknownColumn(_)) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": err.to_string() })),
            )
                .into_response(),
            ApiError::Service(err) => {
                error!(error = %err, "request failed");
                let context = match &err {
                    ServiceError::Model(_) | ServiceError::Prediction(_) => {
                        "Error performing the prediction"
                    }
                    _ => "Error processing the request",
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": format!("{context}: {err}") })),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
    status: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_kind: &'static str,
    dataset_rows: usize,
    dataset_columns: Vec<String>,
    started_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ItemResponse {
    status: &'static str,
    data: Map<String, Value>,
}

#[derive(Serialize)]
struct ItemsResponse {
    status: &'static str,
    total: usize,
    data: Vec<Map<String, Value>>,
}

#[derive(Serialize)]
struct ItemPredictionResponse {
    status: &'static str,
    data: Vec<Map<String, Value>>,
    prediction: Prediction,
}

pub fn create_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/items", get(items_handler))
        .route("/item/:item_id", get(item_handler))
        .route("/item/predictions/:item_id", get(item_prediction_handler))
        .route("/predict", post(predict_handler))
        .route("/predict/debug", post(predict_debug_handler))
        .route("/probability/:dimension", get(probability_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) if value != "*" => Some(value),
            _ => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
        ])
        .allow_headers(AllowHeaders::mirror_request())
}

/// Bind `addr` and serve until ctrl-c.
pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    allowed_origins: &[String],
) -> anyhow::Result<()> {
    let app = create_router(state, allowed_origins);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for shutdown signal");
            }
            info!("shutting down");
        })
        .await?;

    Ok(())
}

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: API_TITLE,
        version: env!("CARGO_PKG_VERSION"),
        status: "online",
    })
}

async fn health_handler(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    let dataset = state.dataset.load().await?;
    Ok(Json(HealthResponse {
        status: "healthy",
        model_kind: state.classifier.kind(),
        dataset_rows: dataset.len(),
        dataset_columns: dataset.headers().to_vec(),
        started_at: state.started_at,
    }))
}

async fn items_handler(State(state): State<AppState>) -> ApiResult<ItemsResponse> {
    let dataset = state.dataset.load().await?;
    Ok(Json(ItemsResponse {
        status: "success",
        total: dataset.len(),
        data: dataset.rows(),
    }))
}

async fn item_handler(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<ItemResponse> {
    let dataset = state.dataset.load().await?;
    let row = dataset
        .find(&item_id)?
        .ok_or(ServiceError::NotFound(item_id))?;

    Ok(Json(ItemResponse {
        status: "success",
        data: row,
    }))
}

async fn item_prediction_handler(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<ItemPredictionResponse> {
    let dataset = state.dataset.load().await?;
    let (row, features) = dataset
        .find_with_features(&item_id)?
        .ok_or(ServiceError::NotFound(item_id))?;
    let prediction = predict_one(state.classifier.as_ref(), &features)?;

    Ok(Json(ItemPredictionResponse {
        status: "success",
        data: vec![row],
        prediction,
    }))
}

async fn predict_handler(State(state): State<AppState>, body: Bytes) -> ApiResult<Prediction> {
    let record = parse_customer(&body)?;
    let prediction = predict_one(state.classifier.as_ref(), &record)?;
    info!(
        label = prediction.prediction.as_u8(),
        churn = prediction.probabilities.churn,
        "prediction served"
    );
    Ok(Json(prediction))
}

async fn predict_debug_handler(body: Bytes) -> Json<Value> {
    let fields = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => {
            return Json(json!({
                "status": "error",
                "message": "expected a JSON object",
            }))
        }
        Err(err) => {
            return Json(json!({
                "status": "error",
                "message": err.to_string(),
            }))
        }
    };

    let data_types: Map<String, Value> = fields
        .iter()
        .map(|(key, value)| (key.clone(), Value::from(json_type_name(value))))
        .collect();

    let data_normalized = normalize_value(&Value::Object(fields.clone()));

    Json(json!({
        "status": "success",
        "message": "Data received correctly",
        "data_received": fields,
        "data_normalized": data_normalized,
        "data_types": data_types,
    }))
}

async fn probability_handler(
    State(state): State<AppState>,
    Path(dimension): Path<String>,
) -> ApiResult<GroupedReport> {
    let column = FeatureColumn::from_dimension(&dimension)?;
    if !FeatureColumn::DIMENSIONS.contains(&column) {
        return Err(ServiceError::UnknownColumn(dimension).into());
    }

    let dataset = state.dataset.load().await?;
    let table = dataset.feature_table()?;
    let report = summarize(state.classifier.as_ref(), &table, column)?;
    Ok(Json(report))
}

/// Decode, normalize and validate a `/predict` payload.
fn parse_customer(body: &[u8]) -> Result<CustomerRecord, ApiError> {
    let value: Value = serde_json::from_slice(body).map_err(|err| ApiError::Invalid {
        detail: vec![err.to_string()],
        body_received: Value::String(String::from_utf8_lossy(body).into_owned()),
    })?;

    let record = match serde_json::from_value::<CustomerRecord>(value.clone()) {
        Ok(record) => record.normalized(),
        Err(err) => {
            return Err(ApiError::Invalid {
                detail: vec![err.to_string()],
                body_received: value,
            })
        }
    };

    let problems = validate_customer(&record);
    if !problems.is_empty() {
        return Err(ApiError::Invalid {
            detail: problems,
            body_received: value,
        });
    }

    Ok(record)
}

fn validate_customer(record: &CustomerRecord) -> Vec<String> {
    let mut problems = Vec::new();

    if record.age < 0 {
        problems.push("age: must be greater than or equal to 0".to_string());
    }
    if record.number_of_profiles < 0 {
        problems.push("number_of_profiles: must be greater than or equal to 0".to_string());
    }
    if !record.watch_hours.is_finite() || record.watch_hours < 0.0 {
        problems.push("watch_hours: must be a non-negative number".to_string());
    }

    for column in FeatureColumn::ALL {
        if record.text(column).is_some_and(str::is_empty) {
            problems.push(format!("{column}: must not be empty"));
        }
    }

    problems
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(number) if number.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
