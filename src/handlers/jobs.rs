//! # Job REST API Handlers
//!
//! The thin HTTP adapter over the job lifecycle controller. Handlers
//! marshal requests into controller calls and map outcomes onto transport
//! responses; no lifecycle decisions are made here.
//!
//! ## Available Endpoints:
//! - `POST /jobs` - upload a media file, get back a job id (202)
//! - `GET /jobs/{id}` - status snapshot: state and timestamps
//! - `GET /jobs/{id}/result` - transcript once done (`?format=raw` for plain text)
//! - `DELETE /jobs/{id}` - cancel a queued job / request cancel of a running one

use crate::error::AppError;
use crate::jobs::{CancelOutcome, ResultOutcome};
use crate::state::AppState;
use crate::storage::Storage;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// Query options for the result endpoint.
#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    /// "raw" returns the bare transcript body instead of the JSON wrapper
    pub format: Option<String>,
}

/// Accept a media upload and submit it for transcription.
///
/// ## Endpoint: `POST /api/v1/jobs`
///
/// Multipart form data with the media in a field named "file". The upload
/// is persisted first; only then is the job submitted, so an accepted job
/// always has readable input. Responds `202 Accepted` immediately — the
/// transcription itself happens on the worker, minutes later.
///
/// ## Response:
/// ```json
/// {
///   "job_id": "4d5a…",
///   "state": "queued",
///   "submitted_at": "2025-01-01T12:00:00Z"
/// }
/// ```
/// A full queue responds `503` with `Retry-After` instead.
pub async fn submit_job(
    state: web::Data<AppState>,
    mut payload: actix_multipart::Multipart,
) -> Result<HttpResponse, AppError> {
    use futures_util::stream::StreamExt;

    let mut media: Option<Vec<u8>> = None;
    let mut filename = "upload".to_string();

    while let Some(item) = payload.next().await {
        let mut field = item
            .map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::ValidationError("Missing content disposition".to_string()))?;

        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?;

        if field_name == "file" {
            if let Some(name) = content_disposition.get_filename() {
                filename = name.to_string();
            }

            let mut bytes = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk
                    .map_err(|e| AppError::ValidationError(format!("Upload read error: {}", e)))?;
                bytes.extend_from_slice(&chunk);
            }
            media = Some(bytes);
        }
    }

    let media = media
        .ok_or_else(|| AppError::BadRequest("Missing multipart field 'file'".to_string()))?;
    if media.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }

    let input_ref = state.storage.put(&media, &filename).await?;

    let job = match state.controller.submit(input_ref) {
        Ok(job) => {
            state.record_job_submitted();
            job
        }
        Err(e) => {
            if matches!(e, AppError::QueueFull { .. }) {
                state.record_job_rejected();
            }
            return Err(e);
        }
    };

    Ok(HttpResponse::Accepted().json(json!({
        "job_id": job.id,
        "state": job.state,
        "submitted_at": job.submitted_at.to_rfc3339()
    })))
}

/// Status snapshot for one job.
///
/// ## Endpoint: `GET /api/v1/jobs/{id}`
///
/// Reads the job store directly; never waits on the worker.
pub async fn job_status(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let summary = state.controller.status(path.into_inner())?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "job": summary
    })))
}

/// Fetch the transcript of a finished job.
///
/// ## Endpoint: `GET /api/v1/jobs/{id}/result`
///
/// ## Outcomes:
/// - done: `200` with the transcript (JSON wrapper, or the bare body with
///   `?format=raw`)
/// - queued/running: `202` with a pending indicator
/// - failed/canceled: `200` with the structured failure
pub async fn job_result(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<ResultQuery>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();

    match state.controller.result(id)? {
        ResultOutcome::Ready(result_ref) => {
            let transcript = state.storage.get(&result_ref).await?;

            if query.format.as_deref() == Some("raw") {
                return Ok(HttpResponse::Ok()
                    .content_type("text/plain; charset=utf-8")
                    .body(transcript));
            }

            let format = state.get_config().engine.output_format;
            Ok(HttpResponse::Ok().json(json!({
                "status": "ready",
                "job_id": id,
                "format": format,
                "transcript": String::from_utf8_lossy(&transcript)
            })))
        }
        ResultOutcome::Pending(job_state) => Ok(HttpResponse::Accepted().json(json!({
            "status": "pending",
            "job_id": id,
            "state": job_state
        }))),
        ResultOutcome::Failed(failure) => Ok(HttpResponse::Ok().json(json!({
            "status": "failed",
            "job_id": id,
            "error": failure
        }))),
    }
}

/// Cancel a job.
///
/// ## Endpoint: `DELETE /api/v1/jobs/{id}`
///
/// Guaranteed while the job is still queued. For a running job the request
/// is only recorded — the GPU call cannot be interrupted — and the response
/// says so. Jobs already in a terminal state get `409`.
pub async fn cancel_job(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();

    match state.controller.cancel(id)? {
        CancelOutcome::Canceled => Ok(HttpResponse::Ok().json(json!({
            "status": "canceled",
            "job_id": id
        }))),
        CancelOutcome::CancelRequested => Ok(HttpResponse::Ok().json(json!({
            "status": "cancel_requested",
            "job_id": id,
            "message": "Job is already running; the request was recorded but the \
                        transcription cannot be interrupted"
        }))),
    }
}
