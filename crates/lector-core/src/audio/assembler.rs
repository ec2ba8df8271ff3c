//! Ordered assembly of per-chunk audio into a single artifact
//!
//! Segments are written to `<job_id>.<ext>.part` as soon as every earlier
//! chunk has arrived; the file is renamed to `<job_id>.<ext>` only by
//! [`AudioAssembler::finalize`]. An assembler dropped before finalizing removes
//! its partial file, so a failed job never leaves a truncated artifact behind.

use bytes::Bytes;
use hound::{SampleFormat, WavReader, WavWriter};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::format::{AudioFormat, MergePolicy};
use crate::error::{Error, Result};

/// A finished audio artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub format: AudioFormat,
}

enum Sink {
    Stream(BufWriter<File>),
    /// Created from the first segment's spec
    Wav(Option<WavWriter<BufWriter<File>>>),
}

/// Accumulates audio segments for one job in chunk order
pub struct AudioAssembler {
    format: AudioFormat,
    policy: MergePolicy,
    part_path: PathBuf,
    final_path: PathBuf,
    sink: Option<Sink>,
    /// Segments that arrived ahead of `next_index`; `None` marks a silent chunk
    pending: BTreeMap<usize, Option<Bytes>>,
    next_index: usize,
    expected_segments: usize,
    bytes_written: u64,
    finalized: bool,
}

impl AudioAssembler {
    /// Create an assembler expecting segments `1..=expected_segments`
    pub fn new(
        output_dir: &Path,
        job_id: &str,
        format: AudioFormat,
        expected_segments: usize,
    ) -> Result<Self> {
        let policy = format.merge_policy()?;
        fs::create_dir_all(output_dir)?;

        let final_path = artifact_path(output_dir, job_id, format);
        let part_path = output_dir.join(format!("{}.{}.part", job_id, format.extension()));

        let sink = match policy {
            MergePolicy::FrameAppend | MergePolicy::RawAppend => {
                Sink::Stream(BufWriter::new(File::create(&part_path)?))
            }
            MergePolicy::ContainerMerge => Sink::Wav(None),
        };

        debug!(
            "Assembling {} segments into {:?} ({:?})",
            expected_segments, final_path, policy
        );

        Ok(Self {
            format,
            policy,
            part_path,
            final_path,
            sink: Some(sink),
            pending: BTreeMap::new(),
            next_index: 1,
            expected_segments,
            bytes_written: 0,
            finalized: false,
        })
    }

    /// Add the audio for chunk `index`
    pub fn append(&mut self, index: usize, segment: Bytes) -> Result<()> {
        self.accept(index, Some(segment))
    }

    /// Record chunk `index` as producing no audio
    pub fn skip(&mut self, index: usize) -> Result<()> {
        self.accept(index, None)
    }

    /// Number of leading chunks already written
    pub fn segments_written(&self) -> usize {
        self.next_index - 1
    }

    fn accept(&mut self, index: usize, segment: Option<Bytes>) -> Result<()> {
        if index == 0 || index > self.expected_segments {
            return Err(Error::AudioError(format!(
                "segment {} outside 1..={}",
                index, self.expected_segments
            )));
        }
        if index < self.next_index || self.pending.contains_key(&index) {
            return Err(Error::AudioError(format!("duplicate segment {}", index)));
        }

        self.pending.insert(index, segment);

        while let Some(next) = self.pending.remove(&self.next_index) {
            if let Some(bytes) = next {
                self.write_segment(&bytes)?;
            }
            self.next_index += 1;
        }
        Ok(())
    }

    fn write_segment(&mut self, segment: &[u8]) -> Result<()> {
        let is_first = self.bytes_written == 0;
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| Error::AudioError("assembler already closed".to_string()))?;

        match sink {
            Sink::Stream(writer) => {
                let payload = self.format.stream_payload(segment, is_first)?;
                writer.write_all(payload)?;
                self.bytes_written += payload.len() as u64;
            }
            Sink::Wav(slot) => {
                let segment = with_sized_data_chunk(segment);
                let mut reader = WavReader::new(Cursor::new(segment.as_ref()))?;
                let spec = reader.spec();

                if slot.is_none() {
                    *slot = Some(WavWriter::create(&self.part_path, spec)?);
                }
                let writer = slot
                    .as_mut()
                    .ok_or_else(|| Error::AudioError("WAV writer unavailable".to_string()))?;
                if writer.spec() != spec {
                    return Err(Error::AudioError(format!(
                        "WAV segment spec {:?} differs from {:?}",
                        spec,
                        writer.spec()
                    )));
                }

                let mut count = 0u64;
                match spec.sample_format {
                    SampleFormat::Int => {
                        for sample in reader.samples::<i32>() {
                            writer.write_sample(sample?)?;
                            count += 1;
                        }
                    }
                    SampleFormat::Float => {
                        for sample in reader.samples::<f32>() {
                            writer.write_sample(sample?)?;
                            count += 1;
                        }
                    }
                }
                self.bytes_written += count * u64::from(spec.bits_per_sample / 8);
            }
        }
        Ok(())
    }

    /// Close the output and move it to its final location
    pub fn finalize(mut self) -> Result<Artifact> {
        if self.segments_written() != self.expected_segments {
            return Err(Error::AudioError(format!(
                "only {} of {} segments were assembled",
                self.segments_written(),
                self.expected_segments
            )));
        }
        if self.bytes_written == 0 {
            return Err(Error::AudioError("no audio was produced".to_string()));
        }

        match self.sink.take() {
            Some(Sink::Stream(writer)) => {
                let file = writer
                    .into_inner()
                    .map_err(|e| Error::IoError(e.into_error()))?;
                file.sync_all()?;
            }
            Some(Sink::Wav(Some(writer))) => writer.finalize()?,
            Some(Sink::Wav(None)) | None => {
                return Err(Error::AudioError("no audio was produced".to_string()));
            }
        }

        fs::rename(&self.part_path, &self.final_path)?;
        self.finalized = true;

        let size_bytes = fs::metadata(&self.final_path)?.len();
        debug!(
            "Finalized {:?}: {} bytes via {:?}",
            self.final_path, size_bytes, self.policy
        );

        Ok(Artifact {
            path: self.final_path.clone(),
            size_bytes,
            format: self.format,
        })
    }

    /// Abandon the output, removing any partial file
    pub fn discard(self) {
        debug!("Discarding partial artifact {:?}", self.part_path);
    }
}

impl Drop for AudioAssembler {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        // Close the handle before unlinking
        self.sink.take();
        if let Err(e) = fs::remove_file(&self.part_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial artifact {:?}: {}", self.part_path, e);
            }
        }
    }
}

/// Size field written by streaming encoders that do not know the length up front
const STREAMED_CHUNK_SIZE: u32 = u32::MAX;

/// Replace placeholder RIFF and `data` sizes with the actual lengths.
///
/// The `data` size becomes the bytes remaining after its header, rounded down
/// to whole sample frames. Segments with exact sizes are returned untouched.
fn with_sized_data_chunk(segment: &[u8]) -> Cow<'_, [u8]> {
    if segment.len() < 12 || &segment[0..4] != b"RIFF" || &segment[8..12] != b"WAVE" {
        return Cow::Borrowed(segment);
    }

    let read_u32 = |at: usize| {
        u32::from_le_bytes([segment[at], segment[at + 1], segment[at + 2], segment[at + 3]])
    };

    let mut block_align = 1usize;
    let mut pos = 12;
    while pos + 8 <= segment.len() {
        let id = &segment[pos..pos + 4];
        let size = read_u32(pos + 4);
        let body = pos + 8;

        if id == b"fmt " && body + 14 <= segment.len() {
            block_align = usize::from(u16::from_le_bytes([segment[body + 12], segment[body + 13]]))
                .max(1);
        }

        if id == b"data" {
            let remaining = segment.len() - body;
            if (size as usize) <= remaining && read_u32(4) != STREAMED_CHUNK_SIZE {
                return Cow::Borrowed(segment);
            }
            let data_len = remaining - remaining % block_align;
            let riff_len = (body + data_len - 8) as u32;

            let mut fixed = segment[..body + data_len].to_vec();
            fixed[4..8].copy_from_slice(&riff_len.to_le_bytes());
            fixed[pos + 4..pos + 8].copy_from_slice(&(data_len as u32).to_le_bytes());
            return Cow::Owned(fixed);
        }

        let Some(next) = body.checked_add(size as usize + (size as usize & 1)) else {
            break;
        };
        pos = next;
    }

    Cow::Borrowed(segment)
}

/// Location of the finished artifact for a job
pub fn artifact_path(output_dir: &Path, job_id: &str, format: AudioFormat) -> PathBuf {
    output_dir.join(format!("{}.{}", job_id, format.extension()))
}
