// src/app.rs

//! HTTP surface of the local service.

use crate::claim::{ClaimOutcome, SharedFile, claim_pending, strip_share_marker};
use crate::config::Config;
use crate::gateway::{ShareGateway, intercept_share, select_file_part};
use crate::image_store::ImageStore;
use crate::label::ParsedLabel;
use crate::orders::{self, NewProduct, Order, OrderRequest, Product, RECENT_DAYS};
use crate::pdf_extract::{ExtractionLimits, LabelDecodeError, parse_shipping_label};
use crate::record_store::{PersistenceError, RecordStore};
use crate::share_cache::{MimeKind, ShareCache, mime_kind};
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router, middleware};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub shares: Arc<dyn ShareCache>,
    pub records: Arc<dyn RecordStore>,
    pub images: Arc<dyn ImageStore>,
    pub limits: ExtractionLimits,
    /// Served under `/media` when images are kept on local disk.
    pub media_dir: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Decode(#[from] LabelDecodeError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    UnsupportedMedia(String),
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(format!("failed to read upload: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Persistence(PersistenceError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Persistence(PersistenceError::Rejected(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Persistence(PersistenceError::Poisoned) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::Persistence(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            ApiError::Decode(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.user_message().to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::UnsupportedMedia(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg.clone()),
        };
        warn!(status = %status, error = %self, "Request failed");
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// A share claimed during the page load, after it has been processed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClaimedShare {
    #[serde(rename_all = "camelCase")]
    Label {
        file_name: String,
        label: ParsedLabel,
        pdf_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Attachment { file_name: String, image_url: String },
    #[serde(rename_all = "camelCase")]
    Unsupported { mime_type: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropshipperView {
    /// The page URL with the share marker removed.
    pub location: String,
    pub shared: Option<ClaimedShare>,
    pub notice: Option<String>,
    pub products: Vec<Product>,
    pub recent_orders: Vec<Order>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelUpload {
    pub label: ParsedLabel,
    pub pdf_url: String,
}

pub fn router(state: AppState, config: &Config) -> Router {
    let gateway = ShareGateway::new(state.shares.clone(), config);

    Router::new()
        .route("/dropshipper", get(dropshipper))
        .route("/labels", post(upload_label))
        .route("/images", post(upload_image))
        .route("/products", get(products))
        .route("/orders", post(create_order))
        .route("/orders/recent", get(recent_orders))
        .route("/supplier/orders", get(supplier_orders))
        .route("/supplier/print-all", post(print_all))
        .route("/catalog/products", post(add_product))
        .route("/catalog/products/{id}", delete(delete_product))
        .route("/media/{name}", get(media))
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::from_fn_with_state(gateway, intercept_share))
        .layer(DefaultBodyLimit::max(config.share.max_upload_bytes))
}

pub async fn serve(state: AppState, config: &Config) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(
        addr = %config.server.bind,
        share_endpoint = %config.share_endpoint(),
        "Listening"
    );
    axum::serve(listener, router(state, config)).await
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

// ---------------------------------------------------------------------------
// Dropshipper page
// ---------------------------------------------------------------------------

async fn dropshipper(State(state): State<AppState>, uri: Uri) -> Result<Response, ApiError> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/dropshipper");

    let outcome = claim_pending(state.shares.as_ref(), uri.query());
    let location = match outcome {
        ClaimOutcome::NotRequested => path_and_query.to_string(),
        _ => strip_share_marker(path_and_query),
    };
    let (shared, notice) = process_claim(&state, outcome).await;

    let products = orders::list_products(state.records.as_ref()).await?;
    let recent_orders =
        orders::recent_orders(state.records.as_ref(), OffsetDateTime::now_utc(), RECENT_DAYS).await?;

    let view = DropshipperView {
        location: location.clone(),
        shared,
        notice,
        products,
        recent_orders,
    };
    Ok(([(header::CONTENT_LOCATION, location)], Json(view)).into_response())
}

pub(crate) async fn process_claim(
    state: &AppState,
    outcome: ClaimOutcome,
) -> (Option<ClaimedShare>, Option<String>) {
    match outcome {
        ClaimOutcome::NotRequested | ClaimOutcome::Nothing => (None, None),
        ClaimOutcome::Label(file) => claim_label(state, file).await,
        ClaimOutcome::Attachment(SharedFile {
            name,
            mime_type,
            bytes,
        }) => match state.images.store(bytes, &mime_type).await {
            Ok(image_url) => (
                Some(ClaimedShare::Attachment {
                    file_name: name,
                    image_url,
                }),
                None,
            ),
            Err(e) => {
                warn!(error = %e, "Shared image could not be stored");
                (None, Some(format!("could not store the shared image: {e}")))
            }
        },
        ClaimOutcome::Unsupported { mime_type } => {
            let notice = format!("shared file type {mime_type} is not supported");
            (Some(ClaimedShare::Unsupported { mime_type }), Some(notice))
        }
    }
}

async fn claim_label(state: &AppState, file: SharedFile) -> (Option<ClaimedShare>, Option<String>) {
    let label = match parse_shipping_label(file.bytes.clone(), state.limits).await {
        Ok(label) => label,
        Err(e) => {
            warn!(error = %e, file = %file.name, "Shared label could not be read");
            return (None, Some(e.user_message().to_string()));
        }
    };

    let (pdf_url, notice) = match state.images.store(file.bytes, "application/pdf").await {
        Ok(url) => (Some(url), None),
        Err(e) => {
            warn!(error = %e, "Shared label PDF could not be stored");
            (None, Some(format!("label read, but the PDF could not be stored: {e}")))
        }
    };

    let shared = ClaimedShare::Label {
        file_name: file.name,
        label,
        pdf_url,
    };
    (Some(shared), notice)
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

async fn upload_label(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<LabelUpload>, ApiError> {
    let part = select_file_part(&mut multipart)
        .await?
        .ok_or_else(|| ApiError::BadRequest("no file in upload".into()))?;
    if mime_kind(&part.mime_type) != MimeKind::Pdf {
        return Err(ApiError::UnsupportedMedia("Please upload a PDF file".into()));
    }

    let label = parse_shipping_label(part.bytes.clone(), state.limits).await?;
    let pdf_url = state.images.store(part.bytes, "application/pdf").await?;
    Ok(Json(LabelUpload { label, pdf_url }))
}

async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let part = select_file_part(&mut multipart)
        .await?
        .ok_or_else(|| ApiError::BadRequest("no file in upload".into()))?;
    if mime_kind(&part.mime_type) != MimeKind::Image {
        return Err(ApiError::UnsupportedMedia("Please upload an image file".into()));
    }

    let image_url = state.images.store(part.bytes, &part.mime_type).await?;
    Ok(Json(json!({ "imageUrl": image_url })))
}

async fn media(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(dir) = &state.media_dir else {
        return not_found().await.into_response();
    };
    if name.starts_with('.') || name.contains(['/', '\\']) {
        return not_found().await.into_response();
    }

    match tokio::fs::read(dir.join(&name)).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type_for(&name))], bytes).into_response(),
        Err(_) => not_found().await.into_response(),
    }
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pdf") => "application/pdf",
        Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Orders and catalog
// ---------------------------------------------------------------------------

async fn products(State(state): State<AppState>) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(orders::list_products(state.records.as_ref()).await?))
}

async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = orders::create_order(state.records.as_ref(), request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn recent_orders(State(state): State<AppState>) -> Result<Json<Vec<Order>>, ApiError> {
    let orders =
        orders::recent_orders(state.records.as_ref(), OffsetDateTime::now_utc(), RECENT_DAYS).await?;
    Ok(Json(orders))
}

async fn supplier_orders(
    State(state): State<AppState>,
) -> Result<Json<orders::SupplierBoard>, ApiError> {
    let board = orders::supplier_board(state.records.as_ref(), OffsetDateTime::now_utc()).await?;
    Ok(Json(board))
}

async fn print_all(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let printed = orders::print_all(state.records.as_ref(), OffsetDateTime::now_utc()).await?;
    Ok(Json(json!({ "printed": printed })))
}

async fn add_product(
    State(state): State<AppState>,
    Json(product): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = orders::add_product(state.records.as_ref(), product).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    orders::delete_product(state.records.as_ref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
