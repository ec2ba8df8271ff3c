//! Client for OpenAI-compatible `/audio/speech` endpoints

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::SpeechSynthesizer;
use crate::audio::AudioFormat;
use crate::config::SynthesisConfig;
use crate::error::{Error, Result};

/// Request body for the speech endpoint
#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

enum AttemptError {
    Retryable(String),
    Fatal(String),
}

/// HTTP speech synthesizer with bounded retries
pub struct OpenAiSpeechClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    format: AudioFormat,
    max_retries: u32,
    retry_backoff: Duration,
}

impl OpenAiSpeechClient {
    pub fn new(config: &SynthesisConfig, format: AudioFormat) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                Error::ConfigError("OPENAI_API_KEY environment variable not set".to_string())
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/audio/speech", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            format,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, text: &str, voice: &str) -> std::result::Result<Bytes, AttemptError> {
        let request = SpeechRequest {
            model: &self.model,
            voice,
            input: text,
            response_format: self.format.as_str(),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let audio = response
                .bytes()
                .await
                .map_err(|e| AttemptError::Retryable(format!("failed to read audio: {}", e)))?;
            if audio.is_empty() {
                return Err(AttemptError::Fatal("service returned no audio".to_string()));
            }
            return Ok(audio);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!(
            "{} ({})",
            api_error_message(&body).unwrap_or(body),
            status
        );

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(AttemptError::Retryable(message))
        } else {
            Err(AttemptError::Fatal(message))
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes> {
        debug!(
            "Synthesizing {} chars with voice {} via {}",
            text.chars().count(),
            voice,
            self.endpoint
        );

        let mut delay = self.retry_backoff;
        let mut retries = 0;

        loop {
            match self.attempt(text, voice).await {
                Ok(audio) => return Ok(audio),
                Err(AttemptError::Retryable(message)) if retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        "Speech request failed, retry {}/{} in {:?}: {}",
                        retries, self.max_retries, delay, message
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(AttemptError::Retryable(message)) | Err(AttemptError::Fatal(message)) => {
                    return Err(Error::SynthesisError(message));
                }
            }
        }
    }
}

/// Pull `error.message` out of an API error body
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn config(base_url: String) -> SynthesisConfig {
        SynthesisConfig {
            base_url,
            api_key: Some("sk-test".to_string()),
            max_retries: 2,
            retry_backoff_ms: 1,
            ..SynthesisConfig::default()
        }
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let mut config = SynthesisConfig::default();
        config.api_key = None;
        assert!(matches!(
            OpenAiSpeechClient::new(&config, AudioFormat::Mp3),
            Err(Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client =
            OpenAiSpeechClient::new(&config("http://localhost:9/v1/".to_string()), AudioFormat::Mp3)
                .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9/v1/audio/speech");
    }

    #[test]
    fn test_api_error_message_extraction() {
        let body = r#"{"error":{"message":"Invalid voice","type":"invalid_request_error"}}"#;
        assert_eq!(api_error_message(body).as_deref(), Some("Invalid voice"));
        assert_eq!(api_error_message("not json"), None);
    }

    #[tokio::test]
    async fn test_successful_synthesis_returns_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/audio/speech")
                    .header("authorization", "Bearer sk-test");
                then.status(200)
                    .header("content-type", "audio/mpeg")
                    .body([0xffu8, 0xfb, 0x90, 0x64]);
            })
            .await;

        let client = OpenAiSpeechClient::new(&config(server.url("/v1")), AudioFormat::Mp3).unwrap();
        let audio = client.synthesize("Hello there", "ash").await.unwrap();

        assert_eq!(&audio[..], &[0xff, 0xfb, 0x90, 0x64]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/audio/speech");
                then.status(400)
                    .body(r#"{"error":{"message":"Invalid voice"}}"#);
            })
            .await;

        let client = OpenAiSpeechClient::new(&config(server.url("/v1")), AudioFormat::Mp3).unwrap();
        let err = client.synthesize("Hello", "nobody").await.unwrap_err();

        match err {
            Error::SynthesisError(message) => assert!(message.contains("Invalid voice")),
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/audio/speech");
                then.status(503).body("overloaded");
            })
            .await;

        let client = OpenAiSpeechClient::new(&config(server.url("/v1")), AudioFormat::Mp3).unwrap();
        let result = client.synthesize("Hello", "ash").await;

        assert!(matches!(result, Err(Error::SynthesisError(_))));
        mock.assert_calls_async(3).await;
    }
}
