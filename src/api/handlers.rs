use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::batch::{self, BatchEvent, BatchFile};
use crate::config::TransferConfig;
use crate::db::entities::{batch_item, batch_job, stored_file};
use crate::error::{Result, TransferError};
use crate::history::OperationDetails;
use crate::ledger::Ledger;
use crate::transfer::Orchestrator;

/// Application state shared across handlers
pub struct AppState {
    pub ledger: Ledger,
    pub orchestrator: Orchestrator,
    pub config: RwLock<TransferConfig>,
    /// Fallback platform credential for requests that carry none
    /// (public share links in particular).
    pub default_credential: Option<String>,
    /// Where batch downloads land on the server.
    pub download_dir: PathBuf,
}

impl AppState {
    pub fn new(
        ledger: Ledger,
        orchestrator: Orchestrator,
        config: TransferConfig,
        default_credential: Option<String>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            ledger,
            orchestrator,
            config: RwLock::new(config),
            default_credential,
            download_dir,
        }
    }

    /// Per-request configuration snapshot; in-flight transfers keep the
    /// snapshot they started with even if the admin replaces it.
    fn snapshot(&self) -> TransferConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    /// Opaque platform credential: the Authorization header value passed
    /// through unmodified, or the configured fallback.
    fn credential(&self, headers: &HeaderMap) -> Result<String> {
        if let Some(value) = headers.get(header::AUTHORIZATION) {
            if let Ok(s) = value.to_str() {
                if !s.is_empty() {
                    return Ok(s.to_string());
                }
            }
        }
        self.default_credential.clone().ok_or(TransferError::Auth)
    }
}

#[derive(Deserialize)]
pub struct ChannelQuery {
    pub channel: String,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub file_id: i64,
    pub share_id: String,
}

#[derive(Serialize)]
pub struct FileSummary {
    pub id: i64,
    pub share_id: String,
    pub name: String,
    pub size: i64,
    pub content_type: String,
    pub kind: &'static str,
    pub upload_complete: bool,
    pub public: bool,
    pub large: bool,
    pub created_at: i64,
}

impl FileSummary {
    fn from_model(file: &stored_file::Model, cfg: &TransferConfig) -> Self {
        Self {
            id: file.id,
            share_id: file.share_id.clone(),
            name: file.name.clone(),
            size: file.size,
            content_type: file.content_type.clone(),
            kind: if file.kind == stored_file::KIND_CHUNKED {
                "chunked"
            } else {
                "single"
            },
            upload_complete: file.upload_complete,
            public: file.public,
            // Same threshold as the chunking decision, by design.
            large: file.size as u64 > cfg.chunk_threshold,
            created_at: file.created_at,
        }
    }
}

/// POST /api/files?channel= - upload one file (multipart field `file`)
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let credential = state.credential(&headers)?;
    let cfg = state.snapshot();

    let (data, filename, content_type) = read_file_field(&mut multipart).await?;

    let handle = state
        .orchestrator
        .upload(&cfg, &query.channel, &credential, data, &filename, &content_type)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            file_id: handle.file_id,
            share_id: handle.share_id,
        }),
    ))
}

/// GET /api/files?channel= - list files stored in a channel
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
) -> Result<Json<Vec<FileSummary>>> {
    let cfg = state.snapshot();
    // Listing must not create channel rows as a side effect.
    let files = match state.ledger.find_channel(&query.channel).await? {
        Some(channel) => state.ledger.list_files(channel.id).await?,
        None => Vec::new(),
    };
    Ok(Json(
        files.iter().map(|f| FileSummary::from_model(f, &cfg)).collect(),
    ))
}

/// GET /api/files/:id - download a file by numeric id
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response> {
    let credential = state.credential(&headers)?;
    let cfg = state.snapshot();
    let file = state.ledger.get_file(file_id).await?;
    let (data, content_type) = state.orchestrator.download(&cfg, &credential, &file).await?;
    Ok(file_response(data, &content_type, &file.original_name))
}

/// GET /share/:share_id - download via public share link
pub async fn share_download(
    State(state): State<Arc<AppState>>,
    Path(share_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let file = state.ledger.get_file_by_share_id(&share_id).await?;
    if !file.public {
        // Private files do not exist as far as share links are concerned.
        return Err(TransferError::NotFound("shared file".to_string()));
    }
    let credential = state.credential(&headers)?;
    let cfg = state.snapshot();
    let (data, content_type) = state.orchestrator.download(&cfg, &credential, &file).await?;
    Ok(file_response(data, &content_type, &file.original_name))
}

/// GET /api/channels/:channel/scan/:filename - retrieve straight from
/// channel history, with no ledger rows involved
pub async fn scan_download(
    State(state): State<Arc<AppState>>,
    Path((channel, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response> {
    let credential = state.credential(&headers)?;
    let cfg = state.snapshot();
    let data = state
        .orchestrator
        .download_by_name(&cfg, &channel, &credential, &filename)
        .await?;
    Ok(file_response(data, "application/octet-stream", &filename))
}

/// DELETE /api/files/:id
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<i64>,
) -> Result<StatusCode> {
    // Verify existence first so a bad id is a 404, not a silent no-op.
    let file = state.ledger.get_file(file_id).await?;
    state.ledger.delete_file(file.id).await?;
    state
        .ledger
        .record_history(&OperationDetails::Delete { file_id: file.id })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct VisibilityBody {
    pub public: bool,
}

/// PATCH /api/files/:id/visibility
pub async fn set_visibility(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<i64>,
    Json(body): Json<VisibilityBody>,
) -> Result<StatusCode> {
    let file = state.ledger.get_file(file_id).await?;
    state.ledger.set_file_visibility(file.id, body.public).await?;
    state
        .ledger
        .record_history(&OperationDetails::VisibilityChange {
            file_id: file.id,
            public: body.public,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct BatchAccepted {
    pub job_id: i64,
}

/// POST /api/batch/upload?channel= - upload several files under one job.
/// Returns immediately; the batch runs in the background and progress is
/// traced per item.
pub async fn batch_upload(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelQuery>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let credential = state.credential(&headers)?;
    let cfg = state.snapshot();

    let mut items = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TransferError::InvalidRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| TransferError::InvalidRequest("file field has no filename".into()))?;
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| TransferError::InvalidRequest(e.to_string()))?;
        items.push(BatchFile {
            filename,
            content_type,
            data,
        });
    }
    if items.is_empty() {
        return Err(TransferError::InvalidRequest("no files in batch".to_string()));
    }

    let job = state
        .ledger
        .create_batch_job(batch_job::KIND_UPLOAD, items.len() as u32)
        .await?;
    let job_id = job.id;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let BatchEvent::ItemFinished { job_id, filename, result } = event {
                match result {
                    Ok(handle) => {
                        tracing::info!(job_id, file_id = handle.file_id, "batch item done: {}", filename)
                    }
                    Err(e) => tracing::warn!(job_id, "batch item failed: {}: {}", filename, e),
                }
            }
        }
    });

    let orchestrator = state.orchestrator.clone();
    let channel = query.channel.clone();
    tokio::spawn(async move {
        if let Err(e) =
            batch::run_batch_upload(&orchestrator, &cfg, job_id, &channel, &credential, items, Some(tx))
                .await
        {
            tracing::error!(job_id, "batch aborted on ledger failure: {}", e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { job_id })))
}

#[derive(Deserialize)]
pub struct BatchDownloadBody {
    pub file_ids: Vec<i64>,
}

/// POST /api/batch/download - reconstruct several files into the server's
/// download directory under one job. Returns immediately like batch upload.
pub async fn batch_download(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BatchDownloadBody>,
) -> Result<impl IntoResponse> {
    let credential = state.credential(&headers)?;
    let cfg = state.snapshot();
    if body.file_ids.is_empty() {
        return Err(TransferError::InvalidRequest("no file ids in batch".to_string()));
    }

    let job = state
        .ledger
        .create_batch_job(batch_job::KIND_DOWNLOAD, body.file_ids.len() as u32)
        .await?;
    let job_id = job.id;

    let orchestrator = state.orchestrator.clone();
    let dest = state.download_dir.clone();
    tokio::spawn(async move {
        if let Err(e) = batch::run_batch_download(
            &orchestrator,
            &cfg,
            job_id,
            &credential,
            body.file_ids,
            &dest,
            None,
        )
        .await
        {
            tracing::error!(job_id, "batch aborted on ledger failure: {}", e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { job_id })))
}

#[derive(Serialize)]
pub struct BatchItemView {
    pub file_name: String,
    pub file_id: Option<i64>,
    pub status: &'static str,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct BatchJobView {
    pub id: i64,
    pub kind: &'static str,
    pub total: i32,
    pub completed: i32,
    pub status: &'static str,
    pub items: Vec<BatchItemView>,
}

fn job_status_name(status: i32) -> &'static str {
    match status {
        s if s == batch::JobStatus::Pending as i32 => "pending",
        s if s == batch::JobStatus::InProgress as i32 => "in_progress",
        s if s == batch::JobStatus::Completed as i32 => "completed",
        s if s == batch::JobStatus::CompletedWithErrors as i32 => "completed_with_errors",
        _ => "failed",
    }
}

fn item_status_name(status: i32) -> &'static str {
    match status {
        batch_item::STATUS_PENDING => "pending",
        batch_item::STATUS_IN_PROGRESS => "in_progress",
        batch_item::STATUS_COMPLETED => "completed",
        _ => "failed",
    }
}

/// GET /api/batch/:id
pub async fn batch_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> Result<Json<BatchJobView>> {
    let (job, items) = state.ledger.get_batch_job(job_id).await?;
    Ok(Json(BatchJobView {
        id: job.id,
        kind: if job.kind == batch_job::KIND_DOWNLOAD {
            "download"
        } else {
            "upload"
        },
        total: job.total,
        completed: job.completed,
        status: job_status_name(job.status),
        items: items
            .into_iter()
            .map(|i| BatchItemView {
                file_name: i.file_name,
                file_id: i.file_id,
                status: item_status_name(i.status),
                error: i.error,
            })
            .collect(),
    }))
}

/// GET /api/config
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<TransferConfig> {
    Json(state.snapshot())
}

/// PUT /api/config - replace the transfer settings snapshot
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(mut next): Json<TransferConfig>,
) -> Result<Json<TransferConfig>> {
    next.validate().map_err(TransferError::InvalidRequest)?;
    let mut guard = state.config.write().expect("config lock poisoned");
    next.version = guard.version + 1;
    *guard = next.clone();
    tracing::info!(version = next.version, "transfer settings replaced");
    Ok(Json(next))
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(Bytes, String, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| TransferError::InvalidRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| TransferError::InvalidRequest("file field has no filename".into()))?;
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| TransferError::InvalidRequest(e.to_string()))?;
        return Ok((data, filename, content_type));
    }
    Err(TransferError::InvalidRequest(
        "multipart field `file` is required".to_string(),
    ))
}

fn file_response(data: Bytes, content_type: &str, filename: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    )
        .into_response()
}
