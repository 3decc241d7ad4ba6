use reqwest::Client;
use tracing::debug;

use crate::config::{CaptureConfig, StreamConfig};
use crate::error::Result;
use crate::fetcher::fetch_text;
use crate::playlist::{self, PlaylistRef, SegmentRef, TrackMetadata};
use crate::protocol::Station;

/// What one master -> variant round trip produced.
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    /// Most recent segments of the window, oldest first. Not yet deduplicated.
    pub segments: Vec<SegmentRef>,
    /// Now-playing metadata (last `#EXTINF` entry).
    pub metadata: Option<TrackMetadata>,
    /// Number of `#EXTINF` entries in the variant.
    pub entries: usize,
    /// Segment URIs the parser could not order.
    pub skipped: usize,
}

pub struct PlaylistPoller {
    client: Client,
    master_template: String,
    segments_per_poll: usize,
}

impl PlaylistPoller {
    pub fn new(client: Client, stream: &StreamConfig, capture: &CaptureConfig) -> Self {
        Self::with_template(client, &stream.master_url_template, capture.segments_per_poll)
    }

    pub fn with_template(client: Client, master_template: &str, segments_per_poll: usize) -> Self {
        Self {
            client,
            master_template: master_template.to_string(),
            segments_per_poll: segments_per_poll.max(1),
        }
    }

    pub fn master_for(&self, station: &Station) -> PlaylistRef {
        playlist::master_url(&self.master_template, &station.id)
    }

    /// One poll cycle: master, then variant. Each call starts from the
    /// master so a rotated variant URL is picked up immediately.
    pub async fn poll_once(&self, station: &Station) -> Result<PollOutcome> {
        let master = self.master_for(station);
        let master_text = fetch_text(&self.client, &master.url).await?;
        let variant = playlist::parse_master(&master_text)?;
        debug!("[poll] variant {}", variant.url);

        let variant_text = fetch_text(&self.client, &variant.url).await?;
        let parsed = playlist::parse_variant(&variant_text, &variant.url);

        let outcome = PollOutcome {
            segments: parsed.recent_segments(self.segments_per_poll).to_vec(),
            metadata: parsed.current_metadata().cloned(),
            entries: parsed.entries.len(),
            skipped: parsed.skipped,
        };
        debug!(
            "[poll] {} entries, {} segment(s), now playing {:?}",
            outcome.entries,
            outcome.segments.len(),
            outcome.metadata
        );
        Ok(outcome)
    }
}
