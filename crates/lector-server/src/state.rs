//! Application state management

use lector_core::{JobSupervisor, TextExtractor};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<JobSupervisor>,
    pub extractor: Arc<dyn TextExtractor>,
}

impl AppState {
    pub fn new(supervisor: JobSupervisor, extractor: impl TextExtractor + 'static) -> Self {
        Self {
            supervisor: Arc::new(supervisor),
            extractor: Arc::new(extractor),
        }
    }
}
