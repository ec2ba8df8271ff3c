//! Sequential chunk synthesis for a single job

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::{JobId, JobRegistry, JobStatus};
use crate::audio::{Artifact, AudioAssembler, AudioFormat};
use crate::chunker::Chunk;
use crate::error::{Error, Result};
use crate::synthesis::SpeechSynthesizer;

/// Drives one job from `pending` to a terminal state.
///
/// Chunk `i + 1` is not synthesized until chunk `i` has been appended to the
/// assembler and its progress published. Every error ends the job as
/// `failed`; nothing is retried here.
pub struct JobRunner {
    job_id: JobId,
    chunks: Vec<Chunk>,
    voice: String,
    format: AudioFormat,
    output_dir: PathBuf,
    registry: Arc<JobRegistry>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl JobRunner {
    pub fn new(
        job_id: JobId,
        chunks: Vec<Chunk>,
        voice: String,
        format: AudioFormat,
        output_dir: PathBuf,
        registry: Arc<JobRegistry>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            job_id,
            chunks,
            voice,
            format,
            output_dir,
            registry,
            synthesizer,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Run the job to completion and return its terminal status
    pub async fn run(self) -> JobStatus {
        let job_id = self.job_id.clone();
        let registry = self.registry.clone();
        let started = Instant::now();

        match self.execute().await {
            Ok(artifact) => {
                info!(
                    "Job {} succeeded in {:.1}s: {:?} ({} bytes)",
                    job_id,
                    started.elapsed().as_secs_f32(),
                    artifact.path,
                    artifact.size_bytes
                );
                JobStatus::Succeeded
            }
            Err(e) => {
                warn!("Job {} failed: {}", job_id, e);
                if let Err(record_err) = registry.fail(job_id.as_str(), e.to_string()).await {
                    error!("Could not record failure of job {}: {}", job_id, record_err);
                }
                JobStatus::Failed
            }
        }
    }

    async fn execute(self) -> Result<Artifact> {
        let id = self.job_id.as_str();
        let total = self.chunks.len();

        self.registry.mark_running(id).await?;
        info!("Job {} running: {} chunks, voice {}", id, total, self.voice);

        let mut slot = Some(create_assembler(&self.output_dir, id, self.format, total).await?);

        if let Err(e) = self.write_chunks(&mut slot).await {
            if let Some(assembler) = slot.take() {
                discard(assembler).await;
            }
            return Err(e);
        }

        let assembler = slot
            .take()
            .ok_or_else(|| Error::AudioError("assembler lost before finalize".to_string()))?;
        let artifact = tokio::task::spawn_blocking(move || assembler.finalize())
            .await
            .map_err(|e| Error::AudioError(format!("finalize task failed: {}", e)))??;

        if let Err(e) = self.registry.succeed(id, artifact.clone()).await {
            // Never leave an artifact behind for a job that is not `succeeded`
            if let Err(remove_err) = tokio::fs::remove_file(&artifact.path).await {
                warn!("Failed to remove artifact {:?}: {}", artifact.path, remove_err);
            }
            return Err(e);
        }

        Ok(artifact)
    }

    /// Synthesize and append every chunk; `slot` keeps the assembler on error
    async fn write_chunks(&self, slot: &mut Option<AudioAssembler>) -> Result<()> {
        let id = self.job_id.as_str();
        let total = self.chunks.len();

        for chunk in &self.chunks {
            if self.registry.is_cancel_requested(id).await? {
                info!("Job {} cancelled before chunk {}/{}", id, chunk.index, total);
                return Err(Error::Cancelled);
            }

            if chunk.is_blank() {
                debug!("Job {} chunk {}/{} is blank, skipping", id, chunk.index, total);
                slot.as_mut()
                    .ok_or_else(|| Error::AudioError("assembler unavailable".to_string()))?
                    .skip(chunk.index)?;
            } else {
                let audio = self.synthesizer.synthesize(&chunk.text, &self.voice).await?;
                debug!(
                    "Job {} chunk {}/{}: {} chars -> {} bytes",
                    id,
                    chunk.index,
                    total,
                    chunk.char_len(),
                    audio.len()
                );
                append_segment(slot, chunk.index, audio).await?;
            }

            self.registry.advance(id, chunk.index).await?;
        }
        Ok(())
    }
}

/// Open the job's output on the blocking pool
async fn create_assembler(
    output_dir: &Path,
    job_id: &str,
    format: AudioFormat,
    total: usize,
) -> Result<AudioAssembler> {
    let output_dir = output_dir.to_path_buf();
    let job_id = job_id.to_string();
    tokio::task::spawn_blocking(move || AudioAssembler::new(&output_dir, &job_id, format, total))
        .await
        .map_err(|e| Error::AudioError(format!("assembler task failed: {}", e)))?
}

/// Hand a segment to the assembler on the blocking pool.
///
/// The assembler goes back into `slot` when the write succeeds; on failure it
/// is dropped on the blocking thread, removing its partial file there.
async fn append_segment(
    slot: &mut Option<AudioAssembler>,
    index: usize,
    audio: Bytes,
) -> Result<()> {
    let mut assembler = slot
        .take()
        .ok_or_else(|| Error::AudioError("assembler unavailable".to_string()))?;
    let assembler = tokio::task::spawn_blocking(move || -> Result<AudioAssembler> {
        assembler.append(index, audio)?;
        Ok(assembler)
    })
    .await
    .map_err(|e| Error::AudioError(format!("append task failed: {}", e)))??;
    *slot = Some(assembler);
    Ok(())
}

/// Drop an unfinished assembler on the blocking pool
async fn discard(assembler: AudioAssembler) {
    if let Err(e) = tokio::task::spawn_blocking(move || assembler.discard()).await {
        warn!("Discard task failed: {}", e);
    }
}
