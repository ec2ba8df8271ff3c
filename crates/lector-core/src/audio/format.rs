//! Output audio formats and the merge policy each one supports

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Audio formats a synthesizer can be asked to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// MPEG layer III frame stream
    #[default]
    Mp3,
    /// Ogg/Opus
    Opus,
    /// AAC in ADTS framing
    Aac,
    /// FLAC
    Flac,
    /// RIFF WAVE (PCM)
    Wav,
    /// Headerless 16-bit little-endian PCM
    Pcm,
}

/// How per-chunk segments are combined into one artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Self-synchronizing frame streams; segments are appended after tag stripping
    FrameAppend,
    /// Headerless sample data; segments are appended verbatim
    RawAppend,
    /// Segments are decoded and re-written into a single container
    ContainerMerge,
}

impl AudioFormat {
    /// Name used on the wire and in config files
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "opus",
            AudioFormat::Aac => "aac",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
            AudioFormat::Pcm => "pcm",
        }
    }

    /// File extension for artifacts
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Get content type for format
    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Opus => "audio/ogg",
            AudioFormat::Aac => "audio/aac",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Pcm => "application/octet-stream",
        }
    }

    /// Merge policy for this format, or an error when segments cannot be joined.
    ///
    /// Ogg pages carry per-stream serial numbers and granule positions, and FLAC
    /// has a single stream header, so neither survives byte concatenation.
    pub fn merge_policy(&self) -> Result<MergePolicy> {
        match self {
            AudioFormat::Mp3 | AudioFormat::Aac => Ok(MergePolicy::FrameAppend),
            AudioFormat::Pcm => Ok(MergePolicy::RawAppend),
            AudioFormat::Wav => Ok(MergePolicy::ContainerMerge),
            AudioFormat::Opus | AudioFormat::Flac => Err(Error::ConfigError(format!(
                "{} output cannot be assembled from independent segments",
                self
            ))),
        }
    }

    /// Validate one appendable segment and return the bytes that belong in the stream.
    ///
    /// Only meaningful for `FrameAppend` and `RawAppend` formats.
    pub fn stream_payload<'a>(&self, segment: &'a [u8], is_first: bool) -> Result<&'a [u8]> {
        if segment.is_empty() {
            return Err(Error::AudioError("empty audio segment".to_string()));
        }

        match self {
            AudioFormat::Mp3 => {
                let body = strip_id3v1(segment);
                let frames = skip_id3v2(body);
                if !is_mpeg_frame_sync(frames) {
                    return Err(Error::AudioError(
                        "segment does not start with an MPEG audio frame".to_string(),
                    ));
                }
                Ok(if is_first { body } else { frames })
            }
            AudioFormat::Aac => {
                if !is_adts_sync(segment) {
                    return Err(Error::AudioError(
                        "segment does not start with an ADTS frame".to_string(),
                    ));
                }
                Ok(segment)
            }
            AudioFormat::Pcm => {
                if segment.len() % 2 != 0 {
                    return Err(Error::AudioError(format!(
                        "PCM segment of {} bytes does not hold whole 16-bit samples",
                        segment.len()
                    )));
                }
                Ok(segment)
            }
            other => Err(Error::AudioError(format!(
                "{} segments are not appended as a byte stream",
                other
            ))),
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Skip a leading ID3v2 tag, if any
fn skip_id3v2(data: &[u8]) -> &[u8] {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return data;
    }

    // Tag size is a 28-bit syncsafe integer that excludes the 10-byte header
    let size = data[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7f) as usize);
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    let end = (10 + size + footer).min(data.len());
    &data[end..]
}

/// Drop a trailing 128-byte ID3v1 tag, if any
fn strip_id3v1(data: &[u8]) -> &[u8] {
    if data.len() >= 128 && &data[data.len() - 128..data.len() - 125] == b"TAG" {
        &data[..data.len() - 128]
    } else {
        data
    }
}

fn is_mpeg_frame_sync(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xff && data[1] & 0xe0 == 0xe0
}

fn is_adts_sync(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xff && data[1] & 0xf0 == 0xf0
}
