//! HTTP surface: `POST /api/upload` and `GET /health`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Request, State, multipart::MultipartError, multipart::MultipartRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::debug;

use crate::upload::{FilePart, MissingFile, UploadError, UploadResponse, UploadService};

/// Multipart framing allowance on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    uploads: Arc<UploadService>,
}

impl AppState {
    pub fn new(uploads: Arc<UploadService>) -> Self {
        Self { uploads }
    }
}

/// Build the service router.
///
/// The body limit only bounds memory; the size check that decides the response
/// is the one on the fully read file.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.uploads.policy().max_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/health", get(health_check))
        .route("/api/upload", post(upload))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, UploadError> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!(%rejection, "request is not multipart");
        UploadError::MissingFile(MissingFile::NoFilePart)
    })?;
    let max = state.uploads.policy().max_bytes;
    let file = read_file_field(&mut multipart, max).await?;
    let response = state.uploads.handle(file).await?;
    Ok(Json(response))
}

/// Pull the `file` field out of the form, skipping anything else.
async fn read_file_field(multipart: &mut Multipart, max: usize) -> Result<Option<FilePart>, UploadError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await.map_err(|e| multipart_error(e, max))?;
        return Ok(Some(FilePart { filename, content }));
    }
    Ok(None)
}

fn multipart_error(err: MultipartError, max: usize) -> UploadError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::FileTooLarge { size: None, max }
    } else {
        UploadError::InvalidRequest(err.body_text())
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({"error": self.public_message()}))).into_response()
    }
}

/// Allow any origin, and answer preflight requests directly.
async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
}
