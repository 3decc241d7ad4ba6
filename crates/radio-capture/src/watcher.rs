use std::time::Duration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::playlist::TrackMetadata;

/// A discrete now-playing change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackChangeEvent {
    pub timestamp: DateTime<Local>,
    /// Time since the session started.
    pub elapsed: Duration,
    pub title: String,
    pub artist: String,
}

/// Strict change detector over the poller's metadata stream.
///
/// Consecutive polls overlap, so the same pair shows up again and again;
/// only a differing `(title, artist)` produces an event.
#[derive(Debug, Default)]
pub struct TrackWatcher {
    last: Option<TrackMetadata>,
}

impl TrackWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(
        &mut self,
        metadata: &TrackMetadata,
        elapsed: Duration,
    ) -> Option<TrackChangeEvent> {
        self.observe_at(metadata, elapsed, Local::now())
    }

    pub fn observe_at(
        &mut self,
        metadata: &TrackMetadata,
        elapsed: Duration,
        timestamp: DateTime<Local>,
    ) -> Option<TrackChangeEvent> {
        if metadata.is_empty() || self.last.as_ref() == Some(metadata) {
            return None;
        }
        self.last = Some(metadata.clone());
        Some(TrackChangeEvent {
            timestamp,
            elapsed,
            title: metadata.title.clone(),
            artist: metadata.artist.clone(),
        })
    }

    pub fn current(&self) -> Option<&TrackMetadata> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_pair_twice_emits_once() {
        let mut w = TrackWatcher::new();
        let m = TrackMetadata::new("Levitating", "Dua Lipa");
        assert!(w.observe(&m, Duration::from_secs(1)).is_some());
        assert!(w.observe(&m, Duration::from_secs(2)).is_none());
        assert_eq!(w.current(), Some(&m));
    }

    #[test]
    fn test_artist_only_change_is_a_change() {
        let mut w = TrackWatcher::new();
        w.observe(&TrackMetadata::new("Intro", "A"), Duration::ZERO);
        let ev = w
            .observe(&TrackMetadata::new("Intro", "B"), Duration::from_secs(61))
            .unwrap();
        assert_eq!(ev.artist, "B");
        assert_eq!(ev.elapsed, Duration::from_secs(61));
    }

    #[test]
    fn test_returning_track_after_another_is_reported() {
        let mut w = TrackWatcher::new();
        let a = TrackMetadata::new("A", "x");
        let b = TrackMetadata::new("B", "y");
        let emitted = [&a, &a, &b, &b, &a]
            .iter()
            .filter(|m| w.observe(m, Duration::ZERO).is_some())
            .count();
        assert_eq!(emitted, 3);
    }

    #[test]
    fn test_empty_metadata_ignored_and_reset() {
        let mut w = TrackWatcher::new();
        assert!(w.observe(&TrackMetadata::default(), Duration::ZERO).is_none());
        let m = TrackMetadata::new("T", "A");
        assert!(w.observe(&m, Duration::ZERO).is_some());
        w.reset();
        assert!(w.current().is_none());
        assert!(w.observe(&m, Duration::ZERO).is_some());
    }
}
