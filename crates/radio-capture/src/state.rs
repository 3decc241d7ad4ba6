use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::playlist::TrackMetadata;
use crate::protocol::{CaptureSnapshot, SessionState, Station};

/// Shared, observable view of the capture session.
///
/// The session is the only writer; the HTTP API and any UI read snapshots.
/// Every mutation bumps `rev`.
#[derive(Clone, Default)]
pub struct SessionMonitor {
    state: Arc<RwLock<CaptureSnapshot>>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> CaptureSnapshot {
        self.state.read().await.clone()
    }

    pub async fn session_state(&self) -> SessionState {
        self.state.read().await.state
    }

    async fn update(&self, f: impl FnOnce(&mut CaptureSnapshot)) {
        let mut state = self.state.write().await;
        f(&mut state);
        state.rev += 1;
    }

    pub(crate) async fn set_recording(&self, station: &Station) {
        let station = station.clone();
        self.update(|s| {
            s.status = format!("Recording {}...", station.name);
            s.state = SessionState::Recording;
            s.station = Some(station);
            s.elapsed_secs = 0;
            s.cache_size_bytes = 0;
            s.segments_cached = 0;
            s.segments_failed = 0;
            s.title = None;
            s.artist = None;
            s.error = None;
        })
        .await;
    }

    pub(crate) async fn set_state(&self, state: SessionState) {
        self.update(|s| s.state = state).await;
    }

    pub(crate) async fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.update(|s| s.status = status).await;
    }

    pub(crate) async fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        self.update(|s| {
            s.status = format!("Error: {}", error);
            s.error = Some(error);
        })
        .await;
    }

    pub(crate) async fn set_track(&self, track: &TrackMetadata) {
        self.update(|s| {
            s.title = Some(track.title.clone());
            s.artist = Some(track.artist.clone());
        })
        .await;
    }

    pub(crate) async fn set_progress(&self, elapsed: Duration, cache_size_bytes: u64) {
        self.update(|s| {
            s.elapsed_secs = elapsed.as_secs();
            s.cache_size_bytes = cache_size_bytes;
        })
        .await;
    }

    pub(crate) async fn segment_cached(&self) {
        self.update(|s| s.segments_cached += 1).await;
    }

    pub(crate) async fn segment_failed(&self) {
        self.update(|s| s.segments_failed += 1).await;
    }

    pub(crate) async fn set_finished(&self, output: Option<PathBuf>, status: impl Into<String>) {
        let status = status.into();
        self.update(|s| {
            s.state = SessionState::Idle;
            s.cache_size_bytes = 0;
            if output.is_some() {
                s.last_output = output;
            }
            s.status = status;
        })
        .await;
    }
}
