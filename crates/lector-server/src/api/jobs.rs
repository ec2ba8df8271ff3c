//! Job endpoints
//!
//! Submission (upload or raw text), progress polling, artifact download and
//! cancellation.

use axum::{
    body::Body,
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    Json,
};
use bytes::Bytes;
use lector_core::{AudioFormat, Document, Job, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Read size for streamed artifact bodies
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Query parameters for `POST /upload`
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// Empty selects the server's default voice
    #[serde(default)]
    pub voice: String,
}

/// Raw text submission
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
    #[serde(default)]
    pub voice: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub audio_url: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub job_id: String,
    /// Percentage, or -1 once the job has failed
    pub progress: i32,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: i32,
    pub voice: String,
    pub format: AudioFormat,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let progress = job.progress().value();
        let audio_url = job.artifact.as_ref().map(|_| audio_url(job.id.as_str()));
        Self {
            job_id: job.id.to_string(),
            status: job.status,
            progress,
            voice: job.voice,
            format: job.format,
            total_chunks: job.total_chunks,
            completed_chunks: job.completed_chunks,
            cancel_requested: job.cancel_requested,
            audio_url,
            size_bytes: job.artifact.map(|a| a.size_bytes),
            error: job.error,
        }
    }
}

fn audio_url(job_id: &str) -> String {
    format!("/audio/{}", job_id)
}

/// Extract text from an uploaded document and start a job for it.
///
/// A `voice` form field takes precedence over the `voice` query parameter.
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let form = read_upload(multipart).await?;
    let document = form
        .document
        .ok_or_else(|| ApiError::bad_request("Missing required `file` field."))?;
    let voice = form.voice.unwrap_or(params.voice);
    info!(
        "Upload received: {} ({} bytes), voice {:?}",
        document.filename,
        document.data.len(),
        voice
    );

    let extractor = state.extractor.clone();
    let text = tokio::task::spawn_blocking(move || extractor.extract(&document))
        .await
        .map_err(|e| ApiError::internal(format!("Extraction task failed: {}", e)))??;

    submit_text(&state, &text, &voice).await
}

/// Start a job for text supplied directly
pub async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    submit_text(&state, &request.text, &request.voice).await
}

async fn submit_text(
    state: &AppState,
    text: &str,
    voice: &str,
) -> Result<Json<SubmitResponse>, ApiError> {
    let job_id = state.supervisor.submit(text, voice).await?;
    Ok(Json(SubmitResponse {
        audio_url: audio_url(job_id.as_str()),
        job_id: job_id.to_string(),
    }))
}

/// Fields of an upload form
#[derive(Debug, Default)]
struct UploadForm {
    document: Option<Document>,
    voice: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                form.document = Some(Document::new(filename, content_type, data));
            }
            Some("voice") => {
                let voice = field.text().await.map_err(multipart_error)?;
                if !voice.trim().is_empty() {
                    form.voice = Some(voice.trim().to_string());
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError {
        status: err.status(),
        message: err.body_text(),
    }
}

/// Poll a job's progress
pub async fn progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    // One snapshot so status and progress always agree
    let job = state.supervisor.get_job(&job_id).await?;
    Ok(Json(ProgressResponse {
        job_id: job.id.to_string(),
        progress: job.progress().value(),
        status: job.status,
        error: job.error,
    }))
}

/// Stream a finished job's audio
pub async fn audio(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state.supervisor.get_artifact(&job_id).await?;
    let mut file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to open audio for {}: {}", job_id, e)))?;

    let stream = async_stream::stream! {
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<_, std::io::Error>(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.format.content_type())
        .header(header::CONTENT_LENGTH, artifact.size_bytes);

    let disposition = format!(
        "inline; filename=\"{}.{}\"",
        job_id.replace('"', ""),
        artifact.format.extension()
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response = response.header(header::CONTENT_DISPOSITION, value);
    }

    Ok(response
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| Response::new(Body::empty())))
}

/// Full status view of one job
pub async fn job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.supervisor.get_job(&job_id).await?;
    Ok(Json(job.into()))
}

/// Ask a job to stop at its next chunk boundary
pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state.supervisor.cancel(&job_id).await?;
    Ok(Json(job.into()))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
