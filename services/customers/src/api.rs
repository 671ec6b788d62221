use crate::blob_store::BlobError;
use crate::config::ApiConfig;
use crate::customer_service::{CustomerService, ServiceError};
use crate::image_lifecycle::{ImageLifecycleManager, LifecycleError, UploadFile};
use crate::measurement::{Measurement, MeasurementInput};
use crate::measurement_summary::summarize;
use crate::models::{Customer, CustomerInput, GalleryImage, ImageWithUrl, ValidationError};
use crate::notification::{DispatchError, DispatchReport, NotificationDispatcher};
use crate::record_store::{RecordStore, StoreError};
use crate::storage_usage::{StorageUsageAggregator, UsageReport};
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn RecordStore>,
    pub customers: Arc<CustomerService>,
    pub images: Arc<ImageLifecycleManager>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub usage: Arc<StorageUsageAggregator>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Handler error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                code: code.to_string(),
            },
        }
    }

    fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = %self.body.code, error = %self.body.error, "Request failed");
        }
        (self.status, Json(self.body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::not_found(e.to_string()),
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", e.to_string()),
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(e: BlobError) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "STORAGE_ERROR", e.to_string())
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::Blob(e) => e.into(),
            LifecycleError::Store(e) => e.into(),
            LifecycleError::ImageNotFound(_) => Self::not_found(e.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Validation(e) => e.into(),
            ServiceError::CustomerNotFound(_) => Self::not_found(e.to_string()),
            ServiceError::Store(e) => e.into(),
            ServiceError::Lifecycle(e) => e.into(),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::CustomerNotFound(_) => Self::not_found(e.to_string()),
            DispatchError::Validation(e) => e.into(),
            DispatchError::Store(e) => e.into(),
            DispatchError::TextMessage(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "MESSAGING_ERROR", e.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_UPLOAD", e.body_text())
    }
}

/// Optional free-text filter shared by list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
}

/// Aggregated measurement block as sent in messages
#[derive(Debug, Serialize)]
pub struct MeasurementSummaryResponse {
    pub customer_id: Uuid,
    pub summary: String,
}

/// Result of a multipart photo upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Public URLs of the stored photos, in upload order
    pub uploaded: Vec<String>,
    /// The file that stopped the batch
    pub failed: Option<FailedUploadResponse>,
}

#[derive(Debug, Serialize)]
pub struct FailedUploadResponse {
    pub file_name: String,
    pub error: String,
    pub code: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/customers", get(list_customers).post(create_customer))
        .route(
            "/api/v1/customers/:customer_id",
            get(get_customer).put(update_customer).delete(delete_customer),
        )
        .route(
            "/api/v1/customers/:customer_id/measurement",
            get(get_measurement).put(save_measurement),
        )
        .route(
            "/api/v1/customers/:customer_id/measurement/summary",
            get(get_measurement_summary),
        )
        .route(
            "/api/v1/customers/:customer_id/images",
            get(list_images).post(upload_images),
        )
        .route("/api/v1/customers/:customer_id/send", post(send_to_customer))
        .route("/api/v1/images/:image_id", delete(delete_image))
        .route("/api/v1/gallery", get(gallery))
        .route("/api/v1/storage/usage", get(storage_usage))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "customer-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.records.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

#[instrument(skip(state))]
async fn list_customers(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    let customers = state.customers.list(params.search.as_deref()).await?;
    Ok(Json(customers))
}

#[instrument(skip(state, input))]
async fn create_customer(
    State(state): State<AppState>,
    Json(input): Json<CustomerInput>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    let customer = state.customers.create(input).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Customer>, ApiError> {
    Ok(Json(state.customers.get(customer_id).await?))
}

#[instrument(skip(state, input))]
async fn update_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(input): Json<CustomerInput>,
) -> Result<Json<Customer>, ApiError> {
    Ok(Json(state.customers.update(customer_id, input).await?))
}

/// Delete the customer together with photos and measurement
#[instrument(skip(state))]
async fn delete_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.customers.delete(customer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stored measurement, or `null` when none was saved yet
async fn get_measurement(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Option<Measurement>>, ApiError> {
    Ok(Json(state.customers.get_measurement(customer_id).await?))
}

#[instrument(skip(state, input))]
async fn save_measurement(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(input): Json<MeasurementInput>,
) -> Result<Json<Measurement>, ApiError> {
    Ok(Json(
        state.customers.save_measurement(customer_id, input).await?,
    ))
}

async fn get_measurement_summary(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<MeasurementSummaryResponse>, ApiError> {
    let measurement = state.customers.get_measurement(customer_id).await?;

    Ok(Json(MeasurementSummaryResponse {
        customer_id,
        summary: summarize(measurement.as_ref()),
    }))
}

async fn list_images(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Vec<ImageWithUrl>>, ApiError> {
    state.customers.get(customer_id).await?;
    Ok(Json(state.images.list(customer_id).await?))
}

/// Upload every file part of a multipart body, in order
#[instrument(skip(state, multipart))]
async fn upload_images(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    state.customers.get(customer_id).await?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        // Non-file parts carry no photo
        let Some(file_name) = field.file_name().map(String::from) else {
            continue;
        };
        let data = field.bytes().await?;
        files.push(UploadFile {
            file_name,
            data: data.to_vec(),
        });
    }

    if files.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "NO_FILES",
            "Request contained no files",
        ));
    }

    let batch = state.images.upload_batch(customer_id, files).await;

    match batch.failed {
        None => Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                uploaded: batch.uploaded,
                failed: None,
            }),
        )),
        Some(failed) => {
            let error = ApiError::from(failed.error);
            warn!(
                file_name = %failed.file_name,
                persisted = batch.uploaded.len(),
                "Upload batch incomplete"
            );
            Ok((
                error.status,
                Json(UploadResponse {
                    uploaded: batch.uploaded,
                    failed: Some(FailedUploadResponse {
                        file_name: failed.file_name,
                        error: error.body.error,
                        code: error.body.code,
                    }),
                }),
            ))
        }
    }
}

#[instrument(skip(state))]
async fn delete_image(
    State(state): State<AppState>,
    Path(image_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.images.delete_by_id(image_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn gallery(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<GalleryImage>>, ApiError> {
    Ok(Json(state.images.gallery(params.search.as_deref()).await?))
}

/// Send the customer summary; 502 when any image failed to go out
#[instrument(skip(state))]
async fn send_to_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<(StatusCode, Json<DispatchReport>), ApiError> {
    let report = state.dispatcher.send(customer_id).await?;

    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    Ok((status, Json(report)))
}

async fn storage_usage(State(state): State<AppState>) -> Result<Json<UsageReport>, ApiError> {
    Ok(Json(state.usage.compute().await?))
}

/// Start the customer API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting customer API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
