//! Audio formats and artifact assembly for synthesized speech

mod assembler;
mod format;

pub use assembler::{artifact_path, Artifact, AudioAssembler};
pub use format::{AudioFormat, MergePolicy};
