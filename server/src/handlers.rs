use std::collections::HashSet;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use uuid::Uuid;

use photo_stamp_core::archive::Archiver;
use photo_stamp_core::batch::{Batch, BatchHandle, BatchSnapshot, BatchStatus};
use photo_stamp_core::config::BatchParams;
use photo_stamp_core::error::ValidationError;
use photo_stamp_core::orchestrator::Orchestrator;
use photo_stamp_core::pipeline::ImagePipeline;
use photo_stamp_core::registry::BatchRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BatchRegistry>,
    pub pipeline: Arc<ImagePipeline>,
    pub archiver: Arc<dyn Archiver>,
    pub data_dir: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("batch not found")]
    NotFound,

    #[error("batch is not finished (status: {0})")]
    NotReady(BatchStatus),

    #[error("watermark text cannot be rendered: no font configured")]
    NoFont,

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::NotReady(_) => StatusCode::CONFLICT,
            ApiError::NoFont => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::debug!("Rejected request: {}", self);
        }
        (status, Json(ApiResponse::err(self.to_string()))).into_response()
    }
}

pub async fn root() -> &'static str {
    concat!(
        "Photo Stamp Server v",
        env!("CARGO_PKG_VERSION"),
        "\n\nAPI Endpoints:\n  POST /batches\n  GET  /batches/{id}\n  GET  /batches/{id}/download\n  GET  /health\n"
    )
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// POST /batches
///
/// Upload a batch of photos and start processing it.
///
/// Form fields:
/// - mode: edit-watermark / edit-only / watermark-only
/// - dateText: watermark date line (required for watermark modes)
/// - eventText: watermark event line (required for watermark modes)
/// - files: one part per photo
pub async fn create_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let id = Uuid::new_v4();
    let workspace = Batch::workspace_for(&state.data_dir, id);

    let intake = receive_upload(&state, id, multipart).await;
    let batch = match intake {
        Ok(batch) => batch,
        Err(e) => {
            let _ = tokio::fs::remove_dir_all(&workspace).await;
            return Err(e);
        }
    };

    let total = batch.total();
    let handle = BatchHandle::new(batch);
    state.registry.insert(handle.clone());
    let snapshot = handle.snapshot();
    log::info!("Batch {} accepted: {} files ({})", id, total, snapshot.mode);

    let orchestrator = Orchestrator::new(state.pipeline.clone(), state.archiver.clone());
    tokio::task::spawn_blocking(move || {
        let done = orchestrator.run(&handle, None);
        log::info!(
            "Batch {} finished as {}: {} ok, {} failed",
            done.id,
            done.status,
            done.processed,
            done.failed
        );
    });

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ok(snapshot))).into_response())
}

/// Read the form, stream file parts to disk and validate. Returns a sealed batch.
async fn receive_upload(state: &AppState, id: Uuid, mut multipart: Multipart) -> Result<Batch, ApiError> {
    let mut mode: Option<String> = None;
    let mut date_text: Option<String> = None;
    let mut event_text: Option<String> = None;
    let mut names: Vec<String> = Vec::new();
    let mut taken = HashSet::new();

    let upload_dir = Batch::workspace_for(&state.data_dir, id).join("uploads");
    tokio::fs::create_dir_all(&upload_dir).await?;

    // Parse multipart form
    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "mode" => mode = Some(field.text().await?),
            "dateText" => date_text = Some(field.text().await?),
            "eventText" => event_text = Some(field.text().await?),
            "files" | "files[]" | "file" => {
                let original = field.file_name().unwrap_or("").to_string();
                let file_name = sanitize_file_name(&original)
                    .ok_or_else(|| ValidationError::InvalidFileName(original.clone()))?;
                let file_name = dedupe_file_name(&mut taken, &file_name);

                let mut file = tokio::fs::File::create(upload_dir.join(&file_name)).await?;
                while let Some(chunk) = field.chunk().await? {
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                names.push(file_name);
            }
            other => log::debug!("Ignoring form field {:?}", other),
        }
    }

    let params = BatchParams::parse(mode.as_deref(), date_text.as_deref(), event_text.as_deref())?;
    if names.is_empty() {
        return Err(ValidationError::NoFiles.into());
    }
    if params.mode().watermarks() && !state.pipeline.can_render_text() {
        return Err(ApiError::NoFont);
    }

    let mut batch = Batch::in_workspace_with_id(&state.data_dir, id, params);
    for name in names {
        batch.add_file(name)?;
    }
    batch.seal()?;
    Ok(batch)
}

/// GET /batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<BatchSnapshot>>, ApiError> {
    let handle = state.registry.get(&id).ok_or(ApiError::NotFound)?;
    Ok(Json(ApiResponse::ok(handle.snapshot())))
}

/// GET /batches/{id}/download
///
/// The ZIP of a finished batch.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Request,
) -> Result<Response, ApiError> {
    let handle = state.registry.get(&id).ok_or(ApiError::NotFound)?;
    let (status, archive) = {
        let b = handle.lock();
        (b.status(), b.archive_path().to_path_buf())
    };
    if status != BatchStatus::Done {
        return Err(ApiError::NotReady(status));
    }

    match tokio::fs::metadata(&archive).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(ApiError::NotFound),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(e.into()),
    }

    // ServeFile streams from disk and answers range requests.
    let mut response = match ServeFile::new(&archive).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };
    if response.status().is_success() {
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
        let disposition = format!("attachment; filename=\"photos-{}.zip\"", id);
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }
    Ok(response)
}

/// Final path component of an uploaded file name, or `None` if nothing usable is left.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." || name.starts_with('.') {
        return None;
    }
    Some(name.to_string())
}

fn dedupe_file_name(taken: &mut HashSet<String>, name: &str) -> String {
    let path = FsPath::new(name);
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();

    let mut candidate = name.to_string();
    let mut n = 2;
    while !taken.insert(candidate.to_lowercase()) {
        candidate = format!("{stem}_{n}{ext}");
        n += 1;
    }
    candidate
}
