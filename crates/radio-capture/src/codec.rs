//! Audio decode/encode collaborator.
//!
//! The assembler only needs two pure functions: segment bytes -> PCM and
//! PCM -> container bytes. `FfmpegCodec` provides both by piping through an
//! ffmpeg child process; tests substitute their own `AudioCodec`.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;

use crate::config::CodecConfig;

/// Interleaved signed 16-bit little-endian PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrames {
    pub sample_rate: u32,
    pub channels: u16,
    pub data: Vec<u8>,
}

impl PcmFrames {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            data: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }

    pub fn frame_count(&self) -> usize {
        match self.bytes_per_frame() {
            0 => 0,
            n => self.data.len() / n,
        }
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    /// Plain append, no cross-fade. Both sides must share a format.
    pub fn append(&mut self, other: &PcmFrames) -> Result<()> {
        if other.sample_rate != self.sample_rate || other.channels != self.channels {
            bail!(
                "format mismatch: {} Hz/{} ch vs {} Hz/{} ch",
                other.sample_rate,
                other.channels,
                self.sample_rate,
                self.channels
            );
        }
        self.data.extend_from_slice(&other.data);
        Ok(())
    }
}

pub trait AudioCodec: Send + Sync {
    fn decode(&self, segment: &[u8]) -> Result<PcmFrames>;

    fn encode(&self, pcm: &PcmFrames) -> Result<Vec<u8>>;

    /// Extension of the encoded container.
    fn extension(&self) -> &str {
        "mp3"
    }
}

/// ffmpeg-backed AAC -> PCM -> MP3 codec.
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
    ffmpeg: PathBuf,
    sample_rate: u32,
    channels: u16,
    bitrate: String,
}

impl FfmpegCodec {
    pub fn from_config(config: &CodecConfig) -> Result<Self> {
        let ffmpeg = match &config.ffmpeg_path {
            Some(p) => p.clone(),
            None => crate::platform::find_ffmpeg_binary()
                .ok_or_else(|| anyhow!("ffmpeg not found (set FFMPEG_PATH or codec.ffmpeg_path)"))?,
        };
        Ok(Self {
            ffmpeg,
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate: config.mp3_bitrate.clone(),
        })
    }

    fn run(&self, args: &[&str], input: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.ffmpeg.display()))?;

        // Feed stdin from a separate thread so a full stdout pipe can't deadlock us.
        // The scope lets the writer borrow `input` instead of copying it.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdin unavailable"))?;

        let (output, write_result) = std::thread::scope(|scope| -> Result<_> {
            let writer = scope.spawn(move || {
                let result = stdin.write_all(input);
                drop(stdin);
                result
            });
            let output = child.wait_with_output().context("failed to wait for ffmpeg")?;
            let write_result = writer
                .join()
                .map_err(|_| anyhow!("ffmpeg stdin writer panicked"))?;
            Ok((output, write_result))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("ffmpeg exited {}: {}", output.status, stderr.trim());
        }
        write_result.context("failed to write ffmpeg stdin")?;
        Ok(output.stdout)
    }
}

impl AudioCodec for FfmpegCodec {
    fn decode(&self, segment: &[u8]) -> Result<PcmFrames> {
        let rate = self.sample_rate.to_string();
        let channels = self.channels.to_string();
        let data = self.run(
            &[
                "-f", "aac",
                "-i", "pipe:0",
                "-vn",
                "-ar", &rate,
                "-ac", &channels,
                "-f", "s16le",
                "pipe:1",
            ],
            segment,
        )?;
        if data.is_empty() {
            bail!("ffmpeg produced no audio");
        }
        debug!("[codec] decoded {} bytes -> {} PCM bytes", segment.len(), data.len());
        Ok(PcmFrames {
            sample_rate: self.sample_rate,
            channels: self.channels,
            data,
        })
    }

    fn encode(&self, pcm: &PcmFrames) -> Result<Vec<u8>> {
        let rate = pcm.sample_rate.to_string();
        let channels = pcm.channels.to_string();
        self.run(
            &[
                "-f", "s16le",
                "-ar", &rate,
                "-ac", &channels,
                "-i", "pipe:0",
                "-codec:a", "libmp3lame",
                "-b:a", &self.bitrate,
                "-f", "mp3",
                "pipe:1",
            ],
            &pcm.data,
        )
    }
}
