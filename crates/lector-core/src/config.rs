//! Configuration types for the Lector pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::audio::AudioFormat;
use crate::error::{Error, Result};

/// Environment variable naming an explicit settings file
pub const CONFIG_PATH_ENV: &str = "LECTOR_CONFIG";

/// Top-level settings, one section per component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

impl Settings {
    /// Load settings from an optional file overlaid with `LECTOR__*` environment variables.
    ///
    /// Without an explicit path, `LECTOR_CONFIG` is consulted, then an optional
    /// `lector.toml` in the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        builder = match explicit {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("lector").required(false)),
        };

        builder = builder.add_source(
            config::Environment::with_prefix("LECTOR")
                .separator("__")
                .try_parsing(true),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if settings.synthesis.api_key.is_none() {
            settings.synthesis.api_key = std::env::var("OPENAI_API_KEY").ok();
        }

        settings.validate()?;
        debug!("Loaded settings: {:?}", settings.redacted());
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;

        if self.synthesis.max_retries > 10 {
            return Err(Error::ConfigError(format!(
                "synthesis.max_retries must be at most 10, got {}",
                self.synthesis.max_retries
            )));
        }

        Ok(())
    }

    /// Copy of the settings safe to log
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.synthesis.api_key.is_some() {
            copy.synthesis.api_key = Some("***".to_string());
        }
        copy
    }
}

/// Job pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory where finished artifacts are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Upper bound on chunk length, in characters
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Jobs allowed to synthesize at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Jobs allowed to wait for a free slot before submissions are rejected
    #[serde(default = "default_max_queued_jobs")]
    pub max_queued_jobs: usize,

    /// Voice used when a submission does not name one
    #[serde(default = "default_voice")]
    pub default_voice: String,

    /// Output audio format requested from the synthesizer
    #[serde(default)]
    pub audio_format: AudioFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_chunk_size: default_max_chunk_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_queued_jobs: default_max_queued_jobs(),
            default_voice: default_voice(),
            audio_format: AudioFormat::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_size == 0 {
            return Err(Error::ConfigError(
                "pipeline.max_chunk_size must be positive".to_string(),
            ));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(Error::ConfigError(
                "pipeline.max_concurrent_jobs must be positive".to_string(),
            ));
        }
        if self.default_voice.trim().is_empty() {
            return Err(Error::ConfigError(
                "pipeline.default_voice must not be empty".to_string(),
            ));
        }
        self.audio_format.merge_policy()?;
        Ok(())
    }

    /// Total jobs (running plus queued) admitted at once
    pub fn job_capacity(&self) -> usize {
        self.max_concurrent_jobs + self.max_queued_jobs
    }
}

fn default_output_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lector")
        .join("audio")
}

fn default_max_chunk_size() -> usize {
    4000
}

fn default_max_concurrent_jobs() -> usize {
    get_num_cpus().min(4)
}

fn default_max_queued_jobs() -> usize {
    32
}

fn default_voice() -> String {
    "ash".to_string()
}

/// Speech synthesis backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Speech model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token; falls back to `OPENAI_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retries after the first attempt for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay, doubled on every attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini-tts".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Largest accepted upload, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_cors_enabled(),
            cors_origins: default_cors_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_enabled() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn get_num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}
