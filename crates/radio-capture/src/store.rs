//! Segment cache and the session-wide seen-set.
//!
//! Every accepted segment gets exactly one cache slot,
//! `<cache_dir>/<sequence:020>.aac`. Downloads land in a `.part` sibling and
//! are renamed on completion, so anything with the final name is complete.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::error::{CaptureError, Result};
use crate::playlist::SegmentRef;

const SEGMENT_EXT: &str = "aac";
const PART_EXT: &str = "part";

/// A completed segment file in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSegment {
    pub sequence: u64,
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct SegmentStore {
    cache_dir: PathBuf,
    seen: Mutex<HashSet<u64>>,
}

impl SegmentStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| CaptureError::io("create cache dir", &self.cache_dir, e))
    }

    /// Claim a segment for download. Returns false if this sequence was
    /// already claimed during the session, whether or not it succeeded.
    pub fn accept(&self, segment: &SegmentRef) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(segment.sequence)
    }

    pub fn is_accepted(&self, sequence: u64) -> bool {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.contains(&sequence)
    }

    pub fn accepted_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn cache_path_for(&self, segment: &SegmentRef) -> PathBuf {
        self.cache_dir.join(format!("{:020}.{}", segment.sequence, SEGMENT_EXT))
    }

    pub(crate) fn partial_path_for(&self, segment: &SegmentRef) -> PathBuf {
        self.cache_dir.join(format!("{:020}.{}.{}", segment.sequence, SEGMENT_EXT, PART_EXT))
    }

    /// Completed cache files, ascending by sequence number.
    pub async fn cached_segments(&self) -> Result<Vec<CachedSegment>> {
        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CaptureError::io("read cache dir", &self.cache_dir, e)),
        };

        let mut segments = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CaptureError::io("read cache dir", &self.cache_dir, e))?
        {
            let path = entry.path();
            let Some(sequence) = sequence_of_cache_file(&path) else {
                continue;
            };
            let bytes = match entry.metadata().await {
                Ok(m) if m.is_file() => m.len(),
                Ok(_) => continue,
                Err(e) => {
                    warn!("[store] cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            segments.push(CachedSegment {
                sequence,
                path,
                bytes,
            });
        }

        segments.sort_by_key(|s| s.sequence);
        Ok(segments)
    }

    /// Total bytes of completed segments.
    pub async fn cache_size(&self) -> u64 {
        match self.cached_segments().await {
            Ok(segments) => segments.iter().map(|s| s.bytes).sum(),
            Err(e) => {
                debug!("[store] cache size unavailable: {}", e);
                0
            }
        }
    }

    /// Remove every cached and partial segment and forget the seen-set.
    /// Returns the number of files removed.
    pub async fn clear(&self) -> Result<usize> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clear();

        let mut entries = match tokio::fs::read_dir(&self.cache_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CaptureError::io("read cache dir", &self.cache_dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CaptureError::io("read cache dir", &self.cache_dir, e))?
        {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some(SEGMENT_EXT) | Some(PART_EXT)) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CaptureError::io("remove cached segment", path, e)),
            }
        }

        info!("[store] cleared {} cached files", removed);
        Ok(removed)
    }
}

fn sequence_of_cache_file(path: &Path) -> Option<u64> {
    if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
