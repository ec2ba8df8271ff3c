//! Speech synthesis backends

mod openai;

pub use openai::OpenAiSpeechClient;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Converts one text segment into encoded audio.
///
/// Implementations report every failure as [`crate::Error::SynthesisError`]
/// and own any retry policy; callers treat errors as final.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Bytes>;
}
