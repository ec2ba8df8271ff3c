//! Splitting document text into synthesis-sized chunks

use serde::Serialize;

use crate::error::{Error, Result};

/// One ordered, bounded segment of the source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// 1-based position in synthesis order
    pub index: usize,
    pub text: String,
}

impl Chunk {
    /// Payload length in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// True when the payload has nothing to speak
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Split `text` into chunks of at most `max_chunk_size` characters.
///
/// Boundaries prefer whitespace: a chunk ends at the last whitespace at or
/// before the bound, and is cut exactly at the bound only when a single token
/// is longer than it. Concatenating the chunks yields `text` unchanged.
pub fn split(text: &str, max_chunk_size: usize) -> Result<Vec<Chunk>> {
    if max_chunk_size == 0 {
        return Err(Error::ConfigError(
            "chunk size must be positive".to_string(),
        ));
    }
    if text.trim().is_empty() {
        return Err(Error::EmptyInput);
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let (head, tail) = rest.split_at(cut_point(rest, max_chunk_size));
        chunks.push(Chunk {
            index: chunks.len() + 1,
            text: head.to_string(),
        });
        rest = tail;
    }

    Ok(chunks)
}

/// Byte offset where the next chunk of `text` ends
fn cut_point(text: &str, max_chars: usize) -> usize {
    let mut after_last_space = None;

    for (count, (offset, ch)) in text.char_indices().enumerate() {
        if count == max_chars {
            // `ch` is the first character past the window
            if ch.is_whitespace() {
                return offset;
            }
            return after_last_space.unwrap_or(offset);
        }
        if ch.is_whitespace() {
            after_last_space = Some(offset + ch.len_utf8());
        }
    }

    text.len()
}
