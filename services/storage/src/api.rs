use crate::config::ApiConfig;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::files::{
    content_type_for, format_file_size, generate_thumbnail_filename, get_file_extension,
    validate_image_format,
};
use crate::image_id::{
    generate_image_id_with, parse_image_id, validate_customer_id, validate_image_id, Clock,
    ImageType, ParsedImageId,
};
use crate::keys::{customer_folders, ParsedS3Key, PresignOperation, StorageKeyCodec};
use crate::metadata_store::{ImageQuery, ImageRecordStore};
use crate::object_store::{ImageObjectStore, PresignedUrl};
use crate::record::{
    create_image_metadata_with, create_processing_metadata, ImageMetadata, ImageMetadataOptions,
    ImageRecord, ProcessingStatus, RecordStatus,
};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn ImageRecordStore>,
    pub objects: Arc<dyn ImageObjectStore>,
    pub codec: StorageKeyCodec,
    pub clock: Arc<dyn Clock>,
    pub upload_url_expiry: Duration,
    pub download_url_expiry: Duration,
    pub default_ttl_days: u32,
    pub max_page_size: i64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn query_error(e: anyhow::Error) -> ApiError {
    error!(error = %e, "Metadata store failure");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to query image records",
        "QUERY_ERROR",
    )
}

fn presign_error(e: anyhow::Error) -> ApiError {
    error!(error = %e, "Failed to generate presigned URL");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to generate presigned URL",
        "PRESIGN_ERROR",
    )
}

fn not_found() -> ApiError {
    api_error(StatusCode::NOT_FOUND, "Image not found", "NOT_FOUND")
}

/// Map a store update that matched no active row to `404`
fn require_updated(updated: bool) -> Result<(), ApiError> {
    if updated {
        Ok(())
    } else {
        Err(not_found())
    }
}

fn check_customer_id(customer_id: &str) -> Result<(), ApiError> {
    if validate_customer_id(customer_id) {
        Ok(())
    } else {
        Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid customer ID: {customer_id}"),
            "INVALID_CUSTOMER_ID",
        ))
    }
}

fn check_ids(customer_id: &str, image_id: &str) -> Result<(), ApiError> {
    check_customer_id(customer_id)?;
    if validate_image_id(image_id) {
        Ok(())
    } else {
        Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid image ID: {image_id}"),
            "INVALID_IMAGE_ID",
        ))
    }
}

/// Which object of an image pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageVariant {
    #[default]
    Original,
    Thumbnail,
}

impl ImageVariant {
    fn key<'a>(&self, record: &'a ImageRecord) -> &'a str {
        match self {
            ImageVariant::Original => record.s3_key(),
            ImageVariant::Thumbnail => record.thumbnail_key(),
        }
    }
}

/// Record as returned to clients
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    #[serde(flatten)]
    pub record: ImageRecord,
    /// `s3://` location of the original
    pub s3_url: String,
    /// Human readable `imageSize`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_label: Option<String>,
}

impl ImageResponse {
    fn new(record: ImageRecord, codec: &StorageKeyCodec) -> Self {
        Self {
            s3_url: codec.s3_url(record.s3_key()),
            size_label: record.image_size.map(format_file_size),
            record,
        }
    }
}

/// Body of an image creation request
#[derive(Debug, Deserialize)]
pub struct CreateImageRequest {
    #[serde(rename = "type")]
    pub image_type: ImageType,
    #[serde(flatten)]
    pub options: ImageMetadataOptions,
}

/// Newly created record plus upload targets
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateImageResponse {
    pub image: ImageResponse,
    pub upload_url: PresignedUrl,
    pub thumbnail_upload_url: PresignedUrl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_filename: Option<String>,
}

/// Query parameters for image list
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListImagesQuery {
    #[serde(rename = "type")]
    pub image_type: Option<ImageType>,
    pub status: Option<RecordStatus>,
    pub material_type: Option<String>,
    pub processing_status: Option<ProcessingStatus>,
    pub image_format: Option<String>,
    pub created_from: Option<i64>,
    pub created_until: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub ascending: bool,
}

fn default_limit() -> i64 {
    50
}

/// Image list response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageListResponse {
    pub images: Vec<ImageResponse>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    #[serde(default)]
    pub variant: ImageVariant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatusRequest {
    pub processing_status: ProcessingStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectListQuery {
    #[serde(rename = "type")]
    pub image_type: Option<ImageType>,
    #[serde(default = "default_max_keys")]
    pub max_keys: i32,
}

fn default_max_keys() -> i32 {
    100
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectListResponse {
    pub prefixes: Vec<String>,
    pub keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct InspectQuery {
    pub key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResponse {
    #[serde(flatten)]
    pub key: ParsedS3Key,
    pub s3_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_image_id: Option<ParsedImageId>,
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
        .route(
            "/api/v1/customers/:customer_id/images",
            get(list_images).post(create_image),
        )
        .route(
            "/api/v1/customers/:customer_id/images/:image_id",
            get(get_image).delete(delete_image),
        )
        .route(
            "/api/v1/customers/:customer_id/images/:image_id/url",
            get(get_image_url),
        )
        .route(
            "/api/v1/customers/:customer_id/images/:image_id/content/:variant",
            put(upload_image_content),
        )
        .route(
            "/api/v1/customers/:customer_id/images/:image_id/processing-status",
            patch(update_processing_status),
        )
        .route(
            "/api/v1/customers/:customer_id/images/:image_id/metadata",
            patch(update_metadata),
        )
        .route("/api/v1/customers/:customer_id/objects", get(list_objects))
        .route("/api/v1/keys/inspect", get(inspect_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "image-storage"
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

/// Register a new image and hand back presigned upload URLs
#[instrument(skip(state, request))]
async fn create_image(
    State(state): State<AppState>,
    ApiPath(customer_id): ApiPath<String>,
    ApiJson(request): ApiJson<CreateImageRequest>,
) -> Result<(StatusCode, Json<CreateImageResponse>), ApiError> {
    check_customer_id(&customer_id)?;

    let mut options = request.options;

    // Fall back to the filename's extension when no format is given
    if options.image_format.as_deref().map_or(true, str::is_empty) {
        options.image_format = options
            .original_filename
            .as_deref()
            .map(get_file_extension)
            .filter(|ext| validate_image_format(ext));
    }

    if let Some(ref format) = options.image_format {
        if !validate_image_format(format) {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Unsupported image format: {format}"),
                "INVALID_FORMAT",
            ));
        }
    }

    if options.ttl_days.is_none() {
        options.ttl_days = Some(state.default_ttl_days);
    }

    let thumbnail_filename = options
        .original_filename
        .as_deref()
        .map(generate_thumbnail_filename);

    let image_id =
        generate_image_id_with(request.image_type, &*state.clock, &mut rand::thread_rng());
    let record = create_image_metadata_with(
        &customer_id,
        &image_id,
        request.image_type,
        options,
        &*state.clock,
    );

    // Sign before inserting so a signing failure leaves no record behind
    let expires_in = Some(state.upload_url_expiry.as_secs());
    let upload_url = state
        .objects
        .presign(&state.codec.presign_request(
            PresignOperation::PutObject,
            record.s3_key(),
            expires_in,
        ))
        .await
        .map_err(presign_error)?;
    let thumbnail_upload_url = state
        .objects
        .presign(&state.codec.presign_request(
            PresignOperation::PutObject,
            record.thumbnail_key(),
            expires_in,
        ))
        .await
        .map_err(presign_error)?;

    let inserted = state.records.put_record(&record).await.map_err(query_error)?;
    if !inserted {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("Image ID already exists: {image_id}"),
            "CONFLICT",
        ));
    }

    metrics::counter!("storage.images.created").increment(1);
    info!(
        customer_id = %customer_id,
        image_id = %image_id,
        image_type = %request.image_type,
        "Image registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateImageResponse {
            image: ImageResponse::new(record, &state.codec),
            upload_url,
            thumbnail_upload_url,
            thumbnail_filename,
        }),
    ))
}

/// List a customer's images
#[instrument(skip(state))]
async fn list_images(
    State(state): State<AppState>,
    ApiPath(customer_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<ListImagesQuery>,
) -> Result<Json<ImageListResponse>, ApiError> {
    check_customer_id(&customer_id)?;

    let limit = params.limit.clamp(1, state.max_page_size.max(1));
    let query = ImageQuery {
        customer_id: Some(customer_id),
        image_type: params.image_type,
        status: params.status,
        material_type: params.material_type,
        processing_status: params.processing_status,
        image_format: params.image_format,
        created_from: params.created_from,
        created_until: params.created_until,
        limit: Some(limit + 1), // Fetch one extra to check has_more
        ascending: params.ascending,
    };

    let mut records = state
        .records
        .query_records(&query)
        .await
        .map_err(query_error)?;

    let has_more = records.len() > limit as usize;
    if has_more {
        records.pop();
    }

    Ok(Json(ImageListResponse {
        images: records
            .into_iter()
            .map(|record| ImageResponse::new(record, &state.codec))
            .collect(),
        has_more,
    }))
}

async fn load_record(
    state: &AppState,
    customer_id: &str,
    image_id: &str,
) -> Result<ImageRecord, ApiError> {
    check_ids(customer_id, image_id)?;

    state
        .records
        .get_record(customer_id, image_id)
        .await
        .map_err(query_error)?
        .ok_or_else(not_found)
}

/// Deleted records are invisible to every endpoint that changes or serves content
async fn load_active_record(
    state: &AppState,
    customer_id: &str,
    image_id: &str,
) -> Result<ImageRecord, ApiError> {
    let record = load_record(state, customer_id, image_id).await?;
    if record.is_active() {
        Ok(record)
    } else {
        Err(not_found())
    }
}

/// Get single image record
#[instrument(skip(state))]
async fn get_image(
    State(state): State<AppState>,
    ApiPath((customer_id, image_id)): ApiPath<(String, String)>,
) -> Result<Json<ImageResponse>, ApiError> {
    let record = load_record(&state, &customer_id, &image_id).await?;
    Ok(Json(ImageResponse::new(record, &state.codec)))
}

/// Presigned download URL for the original or thumbnail
#[instrument(skip(state))]
async fn get_image_url(
    State(state): State<AppState>,
    ApiPath((customer_id, image_id)): ApiPath<(String, String)>,
    ApiQuery(params): ApiQuery<UrlQuery>,
) -> Result<Json<PresignedUrl>, ApiError> {
    let record = load_active_record(&state, &customer_id, &image_id).await?;

    let key = params.variant.key(&record);
    let exists = state
        .objects
        .object_exists(key)
        .await
        .map_err(presign_error)?;
    if !exists {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            "Image content has not been uploaded",
            "NOT_FOUND",
        ));
    }

    let url = state
        .objects
        .presign(&state.codec.presign_request(
            PresignOperation::GetObject,
            key,
            Some(state.download_url_expiry.as_secs()),
        ))
        .await
        .map_err(presign_error)?;

    Ok(Json(url))
}

/// Store image bytes through the service instead of a presigned URL
#[instrument(skip(state, body), fields(size_bytes = body.len()))]
async fn upload_image_content(
    State(state): State<AppState>,
    ApiPath((customer_id, image_id, variant)): ApiPath<(String, String, ImageVariant)>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let record = load_active_record(&state, &customer_id, &image_id).await?;

    let content_type = content_type_for(record.image_format.as_deref().unwrap_or_default());
    let size = body.len() as u64;

    state
        .objects
        .put_object(variant.key(&record), body.to_vec(), content_type)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to store image content");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store image content",
                "UPLOAD_ERROR",
            )
        })?;

    if variant == ImageVariant::Original {
        let updated = state
            .records
            .set_image_size(&customer_id, &image_id, size)
            .await
            .map_err(query_error)?;
        require_updated(updated)?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Advance the processing status; entering `processing` stamps the metadata
#[instrument(skip(state, request))]
async fn update_processing_status(
    State(state): State<AppState>,
    ApiPath((customer_id, image_id)): ApiPath<(String, String)>,
    ApiJson(request): ApiJson<ProcessingStatusRequest>,
) -> Result<Json<ImageResponse>, ApiError> {
    let mut record = load_active_record(&state, &customer_id, &image_id).await?;

    let updated = state
        .records
        .update_processing_status(&customer_id, &image_id, request.processing_status)
        .await
        .map_err(query_error)?;
    require_updated(updated)?;
    record.processing_status = Some(request.processing_status);

    if request.processing_status == ProcessingStatus::Processing {
        let processing = create_processing_metadata(
            record.metadata.width.unwrap_or_default(),
            record.metadata.height.unwrap_or_default(),
            record.metadata.upload_source,
            record.metadata.original_filename.as_deref(),
            &*state.clock,
        );

        let mut patch = Map::new();
        patch.insert(
            "processingTimestamp".to_string(),
            Value::from(processing.processing_timestamp),
        );

        let updated = state
            .records
            .merge_metadata(&customer_id, &image_id, &patch)
            .await
            .map_err(query_error)?;
        require_updated(updated)?;

        record.metadata.extra.extend(patch);
    }

    Ok(Json(ImageResponse::new(record, &state.codec)))
}

/// Shallow-merge keys into the metadata map
#[instrument(skip(state, patch))]
async fn update_metadata(
    State(state): State<AppState>,
    ApiPath((customer_id, image_id)): ApiPath<(String, String)>,
    ApiJson(patch): ApiJson<Map<String, Value>>,
) -> Result<Json<ImageResponse>, ApiError> {
    let mut record = load_active_record(&state, &customer_id, &image_id).await?;

    // Check the merged shape here; the store applies only the patch
    let merged = merge_metadata(&record.metadata, patch.clone()).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid metadata: {e}"),
            "INVALID_METADATA",
        )
    })?;

    let updated = state
        .records
        .merge_metadata(&customer_id, &image_id, &patch)
        .await
        .map_err(query_error)?;
    require_updated(updated)?;

    record.metadata = merged;
    Ok(Json(ImageResponse::new(record, &state.codec)))
}

fn merge_metadata(current: &ImageMetadata, patch: Map<String, Value>) -> Result<ImageMetadata> {
    let mut merged = match serde_json::to_value(current)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    merged.extend(patch);

    serde_json::from_value(Value::Object(merged)).context("Metadata does not match schema")
}

/// Logical delete; objects are removed when the record expires
#[instrument(skip(state))]
async fn delete_image(
    State(state): State<AppState>,
    ApiPath((customer_id, image_id)): ApiPath<(String, String)>,
) -> Result<StatusCode, ApiError> {
    check_ids(&customer_id, &image_id)?;

    let deleted = state
        .records
        .mark_deleted(&customer_id, &image_id)
        .await
        .map_err(query_error)?;

    if !deleted {
        return Err(not_found());
    }

    metrics::counter!("storage.images.deleted").increment(1);
    info!(customer_id = %customer_id, image_id = %image_id, "Image marked deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Raw object listing under the customer's folders
#[instrument(skip(state))]
async fn list_objects(
    State(state): State<AppState>,
    ApiPath(customer_id): ApiPath<String>,
    ApiQuery(params): ApiQuery<ObjectListQuery>,
) -> Result<Json<ObjectListResponse>, ApiError> {
    check_customer_id(&customer_id)?;

    let folders = customer_folders(&customer_id);
    let prefixes = match params.image_type {
        Some(ImageType::Uploaded) => vec![folders.uploaded],
        Some(ImageType::SavedResult) => vec![folders.saved_result],
        None => vec![folders.uploaded, folders.saved_result],
    };

    let mut keys = Vec::new();
    for prefix in &prefixes {
        let mut listed = state
            .objects
            .list_keys(prefix, params.max_keys)
            .await
            .map_err(|e| {
                error!(error = %e, prefix = %prefix, "Failed to list objects");
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to list objects",
                    "LIST_ERROR",
                )
            })?;
        keys.append(&mut listed);
    }

    Ok(Json(ObjectListResponse { prefixes, keys }))
}

/// Decode an object key back into its parts
async fn inspect_key(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<InspectQuery>,
) -> Json<InspectResponse> {
    let key = state.codec.inspect(&params.key);
    let parsed_image_id = key
        .image_id
        .as_deref()
        .and_then(|id| parse_image_id(id).ok());

    Json(InspectResponse {
        s3_url: state.codec.s3_url(&params.key),
        key,
        parsed_image_id,
    })
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting image storage API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
