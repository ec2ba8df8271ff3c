//! Lector Core - Chunked Text-to-Speech Job Pipeline
//!
//! This crate turns long document text into one synthesized audio artifact
//! while clients poll for progress.
//!
//! # Architecture
//!
//! - [`chunker`] splits text into bounded, whitespace-aligned chunks
//! - [`job::JobRegistry`] holds per-job state behind per-entry locks
//! - [`job::JobRunner`] synthesizes chunks in order and publishes progress
//! - [`audio::AudioAssembler`] merges per-chunk audio under a declared policy
//! - [`job::JobSupervisor`] admits jobs, bounds concurrency and answers queries
//!
//! Text extraction ([`extract`]) and speech synthesis ([`synthesis`]) sit
//! behind traits so they can be swapped or mocked.
//!
//! # Example
//!
//! ```ignore
//! use lector_core::{JobSupervisor, OpenAiSpeechClient, Settings};
//!
//! let settings = Settings::load(None)?;
//! let client = OpenAiSpeechClient::new(&settings.synthesis, settings.pipeline.audio_format)?;
//! let supervisor = JobSupervisor::new(settings.pipeline, Arc::new(client))?;
//!
//! let job_id = supervisor.submit("Call me Ishmael.", "ash").await?;
//! let progress = supervisor.get_progress(job_id.as_str()).await?;
//! ```

pub mod audio;
pub mod chunker;
pub mod config;
pub mod error;
pub mod extract;
pub mod job;
pub mod synthesis;

pub use audio::{Artifact, AudioAssembler, AudioFormat, MergePolicy};
pub use chunker::Chunk;
pub use config::{PipelineConfig, ServerConfig, Settings, SynthesisConfig};
pub use error::{Error, Result};
pub use extract::{Document, DocumentExtractor, DocumentKind, TextExtractor};
pub use job::{Job, JobId, JobRegistry, JobRunner, JobStatus, JobSupervisor, Progress};
pub use synthesis::{OpenAiSpeechClient, SpeechSynthesizer};
