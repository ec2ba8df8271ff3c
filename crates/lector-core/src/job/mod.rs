//! Text-to-speech jobs: state, registry, runner and supervisor
//!
//! A job moves `pending → running → {succeeded | failed}` and never leaves a
//! terminal state. Progress is derived from the completed chunk count; failed
//! jobs report [`Progress::FAILED_SENTINEL`] instead of a percentage.

mod registry;
mod runner;
mod supervisor;

pub use registry::JobRegistry;
pub use runner::JobRunner;
pub use supervisor::JobSupervisor;

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

use crate::audio::{Artifact, AudioFormat};
use crate::error::{Error, Result};

/// Opaque, globally unique job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress as reported to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Completed share of chunks, `0..=100`
    Percent(u8),
    /// The job failed; no percentage applies
    Failed { reason: String },
}

impl Progress {
    /// Wire value reported for failed jobs
    pub const FAILED_SENTINEL: i32 = -1;

    /// Percentage, or the failed sentinel
    pub fn value(&self) -> i32 {
        match self {
            Progress::Percent(p) => i32::from(*p),
            Progress::Failed { .. } => Self::FAILED_SENTINEL,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Progress::Failed { .. })
    }
}

/// State of one job as held by the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub voice: String,
    pub format: AudioFormat,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    /// Set only once the job has succeeded
    pub artifact: Option<Artifact>,
    /// Set only once the job has failed
    pub error: Option<String>,
    pub cancel_requested: bool,
}

impl Job {
    /// A new pending job with `total_chunks` chunks
    pub fn new(id: JobId, voice: impl Into<String>, format: AudioFormat, total_chunks: usize) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            voice: voice.into(),
            format,
            total_chunks,
            completed_chunks: 0,
            artifact: None,
            error: None,
            cancel_requested: false,
        }
    }

    /// `floor(completed / total * 100)`
    pub fn percentage(&self) -> u8 {
        if self.total_chunks == 0 {
            return 0;
        }
        (self.completed_chunks * 100 / self.total_chunks) as u8
    }

    pub fn progress(&self) -> Progress {
        match self.status {
            JobStatus::Failed => Progress::Failed {
                reason: self.error.clone().unwrap_or_default(),
            },
            _ => Progress::Percent(self.percentage()),
        }
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(self.invalid("start"));
        }
        self.status = JobStatus::Running;
        self.completed_chunks = 0;
        Ok(())
    }

    pub(crate) fn advance(&mut self, completed: usize) -> Result<()> {
        if self.status != JobStatus::Running
            || completed < self.completed_chunks
            || completed > self.total_chunks
        {
            return Err(self.invalid(&format!("advance to {}", completed)));
        }
        self.completed_chunks = completed;
        Ok(())
    }

    pub(crate) fn succeed(&mut self, artifact: Artifact) -> Result<()> {
        if self.status != JobStatus::Running || self.completed_chunks != self.total_chunks {
            return Err(self.invalid("succeed"));
        }
        self.status = JobStatus::Succeeded;
        self.artifact = Some(artifact);
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: String) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.invalid("fail"));
        }
        self.status = JobStatus::Failed;
        self.error = Some(reason);
        Ok(())
    }

    fn invalid(&self, action: &str) -> Error {
        Error::InvalidTransition(format!(
            "cannot {} job {} in state {} ({}/{} chunks)",
            action, self.id, self.status, self.completed_chunks, self.total_chunks
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn artifact() -> Artifact {
        Artifact {
            path: PathBuf::from("/tmp/out.mp3"),
            size_bytes: 42,
            format: AudioFormat::Mp3,
        }
    }

    #[test]
    fn test_job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = Job::new(JobId::new(), "ash", AudioFormat::Mp3, 3);
        assert_eq!(job.progress(), Progress::Percent(0));

        job.start().unwrap();
        job.advance(1).unwrap();
        assert_eq!(job.percentage(), 33);
        job.advance(2).unwrap();
        assert_eq!(job.percentage(), 66);
        job.advance(3).unwrap();
        job.succeed(artifact()).unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.progress().value(), 100);
    }

    #[test]
    fn test_progress_never_regresses_or_overflows() {
        let mut job = Job::new(JobId::new(), "ash", AudioFormat::Mp3, 2);
        job.start().unwrap();
        job.advance(2).unwrap();
        assert!(job.advance(1).is_err());
        assert!(job.advance(3).is_err());
        assert_eq!(job.completed_chunks, 2);
    }

    #[test]
    fn test_cannot_succeed_before_all_chunks() {
        let mut job = Job::new(JobId::new(), "ash", AudioFormat::Mp3, 2);
        job.start().unwrap();
        job.advance(1).unwrap();
        assert!(matches!(job.succeed(artifact()), Err(Error::InvalidTransition(_))));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new(JobId::new(), "ash", AudioFormat::Mp3, 1);
        job.start().unwrap();
        job.fail("boom".to_string()).unwrap();

        assert!(job.start().is_err());
        assert!(job.advance(1).is_err());
        assert!(job.succeed(artifact()).is_err());
        assert!(job.fail("again".to_string()).is_err());
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.completed_chunks, 0);
    }

    #[test]
    fn test_failed_progress_uses_sentinel() {
        let mut job = Job::new(JobId::new(), "ash", AudioFormat::Mp3, 4);
        job.fail("synthesis down".to_string()).unwrap();
        let progress = job.progress();
        assert!(progress.is_failed());
        assert_eq!(progress.value(), Progress::FAILED_SENTINEL);
        assert_eq!(
            progress,
            Progress::Failed {
                reason: "synthesis down".to_string()
            }
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }
}
