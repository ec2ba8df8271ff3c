//! Error types for the Lector job pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Input text is empty or contains only whitespace")]
    EmptyInput,

    #[error("Text extraction failed: {0}")]
    ExtractionError(String),

    #[error("Speech synthesis failed: {0}")]
    SynthesisError(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job {0} has not produced an artifact")]
    JobNotReady(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job capacity exceeded: {0} jobs already in flight")]
    CapacityExceeded(usize),

    #[error("Invalid job transition: {0}")]
    InvalidTransition(String),

    #[error("Audio assembly error: {0}")]
    AudioError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::ConfigError(e.to_string())
    }
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::AudioError(e.to_string())
    }
}
