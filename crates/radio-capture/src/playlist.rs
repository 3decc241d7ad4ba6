//! Two-tier playlist parsing.
//!
//! The master playlist points at a single variant through the line that
//! follows `#EXT-X-STREAM-INF`. The variant lists the current rolling window
//! of `.aac` segments, each preceded by an `#EXTINF` line that carries the
//! now-playing title and artist inline:
//!
//! ```text
//! #EXTINF:10,title="Levitating",artist="Dua Lipa",url="..."
//! https://host/zc1469/seg_88123.aac
//! ```
//!
//! Malformed input never panics: a master without a stream entry is
//! `StreamUrlNotFound`, a variant without entries parses to an empty list.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CaptureError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistTier {
    Master,
    Variant,
}

/// A playlist location. Recomputed on every poll, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRef {
    pub url: String,
    pub tier: PlaylistTier,
}

/// One segment of the variant window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentRef {
    /// Ordering key taken from the segment filename.
    pub sequence: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
}

impl TrackMetadata {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.artist.is_empty()
    }
}

/// Parsed variant playlist, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantPlaylist {
    pub entries: Vec<TrackMetadata>,
    pub segments: Vec<SegmentRef>,
    /// `.aac` URIs dropped because no sequence number could be read.
    pub skipped: usize,
}

impl VariantPlaylist {
    /// Now-playing metadata: only the last entry counts, earlier ones are
    /// overlap from previous windows.
    pub fn current_metadata(&self) -> Option<&TrackMetadata> {
        self.entries.last()
    }

    /// The `n` most recent segments, oldest first.
    pub fn recent_segments(&self, n: usize) -> &[SegmentRef] {
        let start = self.segments.len().saturating_sub(n);
        &self.segments[start..]
    }
}

fn stream_inf_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"#EXT-X-STREAM-INF[^\n]*\r?\n[ \t]*(https?://[^\s]*\.m3u8[^\s]*)")
            .expect("stream-inf pattern is valid")
    })
}

fn extinf_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"#EXTINF:[-\d.]+,\s*title="([^"]+)",\s*artist="([^"]+)","#)
            .expect("extinf pattern is valid")
    })
}

/// Master playlist URL for a station: every `{id}` in the template is
/// replaced, all other query parameters are kept verbatim.
pub fn master_url(template: &str, station_id: &str) -> PlaylistRef {
    PlaylistRef {
        url: template.replace("{id}", station_id),
        tier: PlaylistTier::Master,
    }
}

/// Find the variant playlist the master points at (first entry wins).
pub fn parse_master(text: &str) -> Result<PlaylistRef> {
    let caps = stream_inf_re()
        .captures(text)
        .ok_or(CaptureError::StreamUrlNotFound)?;
    let url = caps
        .get(1)
        .map(|m| m.as_str().to_string())
        .ok_or(CaptureError::StreamUrlNotFound)?;
    Ok(PlaylistRef {
        url,
        tier: PlaylistTier::Variant,
    })
}

/// Parse a variant playlist. Relative segment URIs are resolved against
/// `base_url`; segments whose filename carries no number are skipped.
pub fn parse_variant(text: &str, base_url: &str) -> VariantPlaylist {
    let entries = extinf_re()
        .captures_iter(text)
        .map(|caps| TrackMetadata {
            title: caps[1].trim().to_string(),
            artist: caps[2].trim().to_string(),
        })
        .collect();

    let base = Url::parse(base_url).ok();
    let mut segments = Vec::new();
    let mut skipped = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || !is_aac_uri(line) {
            continue;
        }
        let url = if line.starts_with("https://") || line.starts_with("http://") {
            line.to_string()
        } else {
            match base.as_ref().and_then(|b| b.join(line).ok()) {
                Some(u) => u.to_string(),
                None => {
                    warn!("[playlist] cannot resolve relative segment {}", line);
                    skipped += 1;
                    continue;
                }
            }
        };
        match sequence_from_url(&url) {
            Some(sequence) => segments.push(SegmentRef { sequence, url }),
            None => {
                warn!("[playlist] no usable sequence number in {}", url);
                skipped += 1;
            }
        }
    }

    VariantPlaylist {
        entries,
        segments,
        skipped,
    }
}

fn is_aac_uri(line: &str) -> bool {
    strip_query(line).ends_with(".aac")
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// Numeric sequence id from a segment URL: the last run of digits in the
/// file stem, e.g. `.../zc1469/seg_20240101_88123.aac` -> 88123.
pub fn sequence_from_url(url: &str) -> Option<u64> {
    let path = strip_query(url);
    let file = path.rsplit('/').next()?;
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);

    let bytes = stem.as_bytes();
    let end = bytes.iter().rposition(|b| b.is_ascii_digit())? + 1;
    let start = bytes[..end]
        .iter()
        .rposition(|b| !b.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    stem[start..end].parse().ok()
}
