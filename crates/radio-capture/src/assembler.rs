//! Ordered reassembly of the segment cache into one recording.
//!
//! Segments are always read in ascending sequence order. Fetch tasks finish
//! in whatever order the network allows, so completion order is never used.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::codec::{AudioCodec, PcmFrames};
use crate::error::{CaptureError, Result};
use crate::store::{CachedSegment, SegmentStore};

/// A finished recording.
#[derive(Debug, Clone)]
pub struct Recording {
    pub path: PathBuf,
    pub segments: usize,
    pub duration: Duration,
}

pub struct Assembler {
    codec: Arc<dyn AudioCodec>,
    output_dir: PathBuf,
}

impl Assembler {
    pub fn new(codec: Arc<dyn AudioCodec>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            codec,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Decode every cached segment in sequence order, concatenate, encode and
    /// write `<station>_<started>.<ext>`. Nothing is written on failure.
    /// The cache is left untouched; clearing it is the caller's job.
    pub async fn assemble(
        &self,
        store: &SegmentStore,
        station_name: &str,
        started: DateTime<Local>,
    ) -> Result<Recording> {
        let segments: Vec<CachedSegment> = store
            .cached_segments()
            .await?
            .into_iter()
            .filter(|s| {
                if s.bytes == 0 {
                    warn!("[assemble] skipping empty segment {}", s.sequence);
                }
                s.bytes > 0
            })
            .collect();

        if segments.is_empty() {
            return Err(CaptureError::NoSegments);
        }

        let count = segments.len();
        info!(
            "[assemble] combining {} segments ({}..={})",
            count,
            segments[0].sequence,
            segments[count - 1].sequence
        );

        let codec = Arc::clone(&self.codec);
        let (encoded, duration) =
            tokio::task::spawn_blocking(move || decode_and_encode(codec.as_ref(), &segments))
                .await
                .map_err(|e| CaptureError::EncodeFailed(format!("assembly task failed: {}", e)))??;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| CaptureError::io("create output dir", &self.output_dir, e))?;

        let path = self.unique_output_path(station_name, started, self.codec.extension());
        let part = path.with_extension("part");
        tokio::fs::write(&part, &encoded)
            .await
            .map_err(|e| CaptureError::io("write recording", &part, e))?;
        tokio::fs::rename(&part, &path)
            .await
            .map_err(|e| CaptureError::io("finalize recording", &path, e))?;

        info!(
            "[assemble] recording combined into {} ({} bytes, {:.1}s)",
            path.display(),
            encoded.len(),
            duration.as_secs_f64()
        );
        Ok(Recording {
            path,
            segments: count,
            duration,
        })
    }

    fn unique_output_path(
        &self,
        station_name: &str,
        started: DateTime<Local>,
        ext: &str,
    ) -> PathBuf {
        let base = output_file_stem(station_name, started);
        let mut path = self.output_dir.join(format!("{}.{}", base, ext));
        let mut n = 1;
        while path.exists() {
            path = self.output_dir.join(format!("{}-{}.{}", base, n, ext));
            n += 1;
        }
        path
    }
}

fn decode_and_encode(
    codec: &dyn AudioCodec,
    segments: &[CachedSegment],
) -> Result<(Vec<u8>, Duration)> {
    let mut combined: Option<PcmFrames> = None;

    for segment in segments {
        let bytes = std::fs::read(&segment.path)
            .map_err(|e| CaptureError::io("read cached segment", &segment.path, e))?;
        let pcm = codec.decode(&bytes).map_err(|e| CaptureError::DecodeFailed {
            sequence: segment.sequence,
            reason: e.to_string(),
        })?;
        match combined.as_mut() {
            None => combined = Some(pcm),
            Some(all) => all.append(&pcm).map_err(|e| CaptureError::DecodeFailed {
                sequence: segment.sequence,
                reason: e.to_string(),
            })?,
        }
    }

    let combined = combined.ok_or(CaptureError::NoSegments)?;
    let encoded = codec
        .encode(&combined)
        .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
    Ok((encoded, combined.duration()))
}

/// `<station>_<YYYY-MM-DD_HH-MM-SS>` with path separators and other
/// filesystem-hostile characters replaced.
pub fn output_file_stem(station_name: &str, started: DateTime<Local>) -> String {
    format!(
        "{}_{}",
        safe_filename(station_name),
        started.format("%Y-%m-%d_%H-%M-%S")
    )
}

fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "recording".to_string()
    } else {
        cleaned
    }
}
