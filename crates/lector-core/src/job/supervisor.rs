//! Job submission, worker scheduling and progress queries

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::{Job, JobId, JobRegistry, JobRunner, Progress};
use crate::audio::Artifact;
use crate::chunker;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::job::JobStatus;
use crate::synthesis::SpeechSynthesizer;

/// Accepts jobs, runs them on a bounded set of workers and answers queries.
///
/// At most `max_concurrent_jobs` runners synthesize at once; up to
/// `max_queued_jobs` more wait as `pending`. Submissions beyond that are
/// rejected with [`Error::CapacityExceeded`].
pub struct JobSupervisor {
    config: PipelineConfig,
    registry: Arc<JobRegistry>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    workers: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

/// Releases an admission slot when the job's task ends
struct AdmissionSlot(Arc<AtomicUsize>);

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl JobSupervisor {
    pub fn new(config: PipelineConfig, synthesizer: Arc<dyn SpeechSynthesizer>) -> Result<Self> {
        config.validate()?;
        let workers = Arc::new(Semaphore::new(config.max_concurrent_jobs));

        info!(
            "Job supervisor ready: {} workers, {} queue slots, {} output in {:?}",
            config.max_concurrent_jobs, config.max_queued_jobs, config.audio_format, config.output_dir
        );

        Ok(Self {
            config,
            registry: Arc::new(JobRegistry::new()),
            synthesizer,
            workers,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Jobs admitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Chunk `text`, register a pending job and start it in the background.
    ///
    /// An empty `voice` selects the configured default.
    pub async fn submit(&self, text: &str, voice: &str) -> Result<JobId> {
        let chunks = chunker::split(text, self.config.max_chunk_size)?;
        let slot = self.admit()?;

        let voice = match voice.trim() {
            "" => self.config.default_voice.clone(),
            v => v.to_string(),
        };

        let job_id = JobId::new();
        let job = Job::new(job_id.clone(), voice.clone(), self.config.audio_format, chunks.len());
        self.registry.register(job).await?;

        info!(
            "Submitted job {}: {} chars in {} chunks, voice {}",
            job_id,
            text.chars().count(),
            chunks.len(),
            voice
        );

        let runner = JobRunner::new(
            job_id.clone(),
            chunks,
            voice,
            self.config.audio_format,
            self.config.output_dir.clone(),
            self.registry.clone(),
            self.synthesizer.clone(),
        );
        self.launch(runner, slot);

        Ok(job_id)
    }

    fn admit(&self) -> Result<AdmissionSlot> {
        let capacity = self.config.job_capacity();
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|n| {
                warn!("Rejecting submission: {} jobs in flight", n);
                Error::CapacityExceeded(n)
            })?;
        Ok(AdmissionSlot(self.in_flight.clone()))
    }

    fn launch(&self, runner: JobRunner, slot: AdmissionSlot) {
        let workers = self.workers.clone();
        let registry = self.registry.clone();
        let job_id = runner.job_id().clone();

        tokio::spawn(async move {
            let _slot = slot;

            let _permit = match workers.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!("Job {} not started: worker pool closed", job_id);
                    record_failure(&registry, &job_id, "worker pool closed").await;
                    return;
                }
            };

            if let Err(panic) = AssertUnwindSafe(runner.run()).catch_unwind().await {
                let reason = format!("worker panicked: {}", panic_message(&*panic));
                error!("Job {} {}", job_id, reason);
                record_failure(&registry, &job_id, reason).await;
            }
        });
    }

    pub async fn get_progress(&self, job_id: &str) -> Result<Progress> {
        self.registry.progress(job_id).await
    }

    pub async fn get_artifact(&self, job_id: &str) -> Result<Artifact> {
        let job = self.registry.get(job_id).await?;
        match (job.status, job.artifact) {
            (JobStatus::Succeeded, Some(artifact)) => Ok(artifact),
            _ => Err(Error::JobNotReady(job_id.to_string())),
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.registry.get(job_id).await
    }

    /// Ask a job to stop at its next chunk boundary
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let job = self.registry.request_cancel(job_id).await?;
        if job.cancel_requested {
            info!("Cancellation requested for job {}", job_id);
        }
        Ok(job)
    }
}

/// Mark a job failed, logging when the registry refuses
async fn record_failure(
    registry: &JobRegistry,
    job_id: &JobId,
    reason: impl Into<String>,
) -> bool {
    match registry.fail(job_id.as_str(), reason).await {
        Ok(()) => true,
        Err(e) => {
            error!("Could not record failure of job {}: {}", job_id, e);
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
