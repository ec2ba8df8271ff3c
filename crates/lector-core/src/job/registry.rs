//! Concurrency-safe store of job state
//!
//! The map lock is held only to insert or look up an entry. Each entry has its
//! own mutex, so every update of a job's status, chunk count, artifact and
//! failure reason happens as one step and jobs never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{Job, JobId, Progress};
use crate::audio::Artifact;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created job
    pub async fn register(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(Error::InvalidTransition(format!(
                "job {} is already registered",
                job.id
            )));
        }
        debug!("Registered job {} ({} chunks)", job.id, job.total_chunks);
        jobs.insert(job.id.clone(), Arc::new(Mutex::new(job)));
        Ok(())
    }

    async fn entry(&self, id: &str) -> Result<Arc<Mutex<Job>>> {
        let jobs = self.jobs.read().await;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownJob(id.to_string()))
    }

    async fn update<T>(&self, id: &str, f: impl FnOnce(&mut Job) -> Result<T>) -> Result<T> {
        let entry = self.entry(id).await?;
        let mut job = entry.lock().await;
        f(&mut job)
    }

    /// Copy of the last published state
    pub async fn get(&self, id: &str) -> Result<Job> {
        let entry = self.entry(id).await?;
        let job = entry.lock().await;
        Ok(job.clone())
    }

    pub async fn progress(&self, id: &str) -> Result<Progress> {
        let entry = self.entry(id).await?;
        let job = entry.lock().await;
        Ok(job.progress())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn mark_running(&self, id: &str) -> Result<()> {
        self.update(id, Job::start).await
    }

    /// Publish a new completed-chunk count
    pub async fn advance(&self, id: &str, completed: usize) -> Result<()> {
        self.update(id, |job| job.advance(completed)).await
    }

    pub async fn succeed(&self, id: &str, artifact: Artifact) -> Result<()> {
        self.update(id, |job| job.succeed(artifact)).await
    }

    pub async fn fail(&self, id: &str, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.update(id, |job| job.fail(reason)).await
    }

    /// Flag a job for cancellation and return its current state.
    ///
    /// Terminal jobs are left untouched.
    pub async fn request_cancel(&self, id: &str) -> Result<Job> {
        self.update(id, |job| {
            if !job.status.is_terminal() {
                job.cancel_requested = true;
            }
            Ok(job.clone())
        })
        .await
    }

    pub async fn is_cancel_requested(&self, id: &str) -> Result<bool> {
        let entry = self.entry(id).await?;
        let job = entry.lock().await;
        Ok(job.cancel_requested)
    }
}
