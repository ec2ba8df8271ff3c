//! HTTP API routes

pub mod jobs;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use lector_core::ServerConfig;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::state::AppState;

pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let upload = post(jobs::upload).layer(DefaultBodyLimit::max(config.max_upload_bytes));

    let mut router = Router::new()
        .route("/upload", upload.clone())
        .route("/upload/", upload)
        .route("/jobs", post(jobs::submit))
        .route("/jobs/:job_id", get(jobs::job))
        .route("/jobs/:job_id/cancel", post(jobs::cancel))
        .route("/progress/:job_id", get(jobs::progress))
        .route("/audio/:job_id", get(jobs::audio))
        .route("/health", get(jobs::health))
        .layer(TraceLayer::new_for_http());

    if config.cors_enabled {
        router = router.layer(cors_layer(&config.cors_origins));
    }

    router.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use bytes::Bytes;
    use lector_core::{
        AudioFormat, DocumentExtractor, JobSupervisor, PipelineConfig, Result, SpeechSynthesizer,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    /// Returns one MPEG frame per chunk, optionally holding every call until released
    struct FakeSynthesizer {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn synthesize(&self, text: &str, _voice: &str) -> Result<Bytes> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let mut frame = vec![0xff, 0xfb];
            frame.extend_from_slice(text.as_bytes());
            Ok(Bytes::from(frame))
        }
    }

    fn app(dir: &std::path::Path, gate: Option<Arc<Notify>>) -> Router {
        let pipeline = PipelineConfig {
            output_dir: dir.to_path_buf(),
            max_chunk_size: 64,
            max_concurrent_jobs: 2,
            max_queued_jobs: 2,
            audio_format: AudioFormat::Mp3,
            ..PipelineConfig::default()
        };
        let supervisor =
            JobSupervisor::new(pipeline, Arc::new(FakeSynthesizer { gate })).unwrap();
        let state = AppState::new(supervisor, DocumentExtractor::new());
        create_router(state, &ServerConfig::default())
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn wait_for_status(app: &Router, job_id: &str, status: &str) -> Value {
        for _ in 0..500 {
            let body = json_body(send(app, get(&format!("/progress/{}", job_id))).await).await;
            if body["status"] == status {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached {}", job_id, status);
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let response = send(&app(dir.path(), None), get("/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_submit_poll_and_download() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), None);

        let response = send(
            &app,
            post_json("/jobs", serde_json::json!({ "text": "Call me Ishmael." })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let job_id = body["job_id"].as_str().unwrap().to_string();
        assert_eq!(body["audio_url"], format!("/audio/{}", job_id));

        let progress = wait_for_status(&app, &job_id, "succeeded").await;
        assert_eq!(progress["progress"], 100);
        assert!(progress.get("error").is_none());

        let response = send(&app, get(&format!("/audio/{}", job_id))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        let audio = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&audio[..], b"\xff\xfbCall me Ishmael.");

        let job = json_body(send(&app, get(&format!("/jobs/{}", job_id))).await).await;
        assert_eq!(job["voice"], "ash");
        assert_eq!(job["total_chunks"], 1);
        assert_eq!(job["size_bytes"], 18);
    }

    #[tokio::test]
    async fn test_upload_text_document() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), None);

        let body = "--BOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"file\"; filename=\"chapter.txt\"\r\n\
                    Content-Type: text/plain\r\n\r\n\
                    It was a dark and stormy night.\r\n\
                    --BOUNDARY--\r\n";
        let request = Request::builder()
            .method("POST")
            .uri("/upload?voice=sage")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap();

        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let job_id = json_body(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        wait_for_status(&app, &job_id, "succeeded").await;
        let job = json_body(send(&app, get(&format!("/jobs/{}", job_id))).await).await;
        assert_eq!(job["voice"], "sage");
    }

    fn upload_form(uri: &str, voice: Option<&str>) -> Request<Body> {
        let mut body = String::new();
        if let Some(voice) = voice {
            body.push_str(
                "--BOUNDARY\r\nContent-Disposition: form-data; name=\"voice\"\r\n\r\n",
            );
            body.push_str(voice);
            body.push_str("\r\n");
        }
        body.push_str(
            "--BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"chapter.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             Whale ho!\r\n\
             --BOUNDARY--\r\n",
        );

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap()
    }

    async fn uploaded_voice(app: &Router, request: Request<Body>) -> Value {
        let response = send(app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let job_id = json_body(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string();
        let job = json_body(send(app, get(&format!("/jobs/{}", job_id))).await).await;
        job["voice"].clone()
    }

    #[tokio::test]
    async fn test_upload_with_trailing_slash() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), None);
        assert_eq!(uploaded_voice(&app, upload_form("/upload/", None)).await, "ash");
    }

    #[tokio::test]
    async fn test_upload_voice_form_field_wins_over_query() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), None);

        let voice = uploaded_voice(&app, upload_form("/upload/", Some("sage"))).await;
        assert_eq!(voice, "sage");

        let voice = uploaded_voice(&app, upload_form("/upload?voice=coral", Some("sage"))).await;
        assert_eq!(voice, "sage");

        let voice = uploaded_voice(&app, upload_form("/upload?voice=coral", None)).await;
        assert_eq!(voice, "coral");
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let dir = tempfile::tempdir().unwrap();
        let body = "--BOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"notes\"\r\n\r\n\
                    hello\r\n\
                    --BOUNDARY--\r\n";
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=BOUNDARY")
            .body(Body::from(body))
            .unwrap();

        let response = send(&app(dir.path(), None), request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = send(
            &app(dir.path(), None),
            post_json("/jobs", serde_json::json!({ "text": "   " })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], 422);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path(), None);

        for uri in ["/progress/nope", "/audio/nope", "/jobs/nope"] {
            let response = send(&app, get(uri)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_audio_not_ready_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Notify::new());
        let app = app(dir.path(), Some(gate.clone()));

        let body = json_body(
            send(&app, post_json("/jobs", serde_json::json!({ "text": "one two" }))).await,
        )
        .await;
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let response = send(&app, get(&format!("/audio/{}", job_id))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let cancel = Request::builder()
            .method("POST")
            .uri(format!("/jobs/{}/cancel", job_id))
            .body(Body::empty())
            .unwrap();
        let response = send(&app, cancel).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["cancel_requested"], true);
    }
}
