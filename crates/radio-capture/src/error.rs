use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the capture engine.
///
/// Only a playlist failure on the first poll of a session is fatal to the
/// session itself; everything else is reported through the status surface
/// and the session keeps going.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Transport error or non-success status while fetching a playlist.
    #[error("playlist unavailable at {url}: {reason}")]
    PlaylistUnavailable { url: String, reason: String },

    /// The master playlist had no `#EXT-X-STREAM-INF` entry.
    #[error("could not find the stream URL in the master playlist")]
    StreamUrlNotFound,

    /// A segment could not be retrieved within the retry budget.
    #[error("failed to download {url} after {attempts} attempts")]
    FetchFailed { url: String, attempts: u32 },

    /// Assembly was requested but the cache holds no segments.
    #[error("no valid audio files to combine")]
    NoSegments,

    #[error("failed to decode segment {sequence}: {reason}")]
    DecodeFailed { sequence: u64, reason: String },

    #[error("failed to encode output: {0}")]
    EncodeFailed(String),

    /// Lifecycle call made from the wrong `SessionState`.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{context} ({}): {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CaptureError {
    pub(crate) fn io(
        context: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// True for the errors that make a first poll unusable.
    pub fn is_playlist_error(&self) -> bool {
        matches!(
            self,
            Self::PlaylistUnavailable { .. } | Self::StreamUrlNotFound
        )
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
