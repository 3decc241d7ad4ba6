use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

use crate::watcher::TrackChangeEvent;

/// Commands accepted by the recorder host (HTTP API, CLI, signals).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Start recording the station matching `station` (id or name).
    Record { station: String },
    Stop,
    GetState,
}

/// Lifecycle of a capture session.
///
/// Transitions:
///   Idle -> Recording (start) -> Stopping (stop) -> Idle (assembly done)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    Stopping,
}

/// Everything an observer may want to display about the running session.
/// `rev` increases on every change so pollers can skip unchanged snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CaptureSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub state: SessionState,
    pub station: Option<Station>,
    pub elapsed_secs: u64,
    pub cache_size_bytes: u64,
    pub segments_cached: usize,
    pub segments_failed: usize,
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Human-readable status line.
    pub status: String,
    /// Terminal error of the last session, if any.
    pub error: Option<String>,
    pub last_output: Option<PathBuf>,
}

impl CaptureSnapshot {
    /// "mm:ss" rendering of the elapsed time.
    pub fn elapsed_label(&self) -> String {
        crate::track_log::format_elapsed(std::time::Duration::from_secs(self.elapsed_secs))
    }

    pub fn cache_size_label(&self) -> String {
        format!("Cache Size: {:.2} KB", self.cache_size_bytes as f64 / 1024.0)
    }

    pub fn current_track_label(&self) -> String {
        match (&self.title, &self.artist) {
            (Some(t), Some(a)) => format!("Current Track: {} - {}", t, a),
            _ => "Current Track: N/A".to_string(),
        }
    }
}

/// Notifications pushed by a running session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TrackChanged(TrackChangeEvent),
    Status(String),
    SegmentCached { sequence: u64, bytes: u64 },
    SegmentFailed { url: String, attempts: u32 },
    /// Assembly finished; `Err` carries the display text of the failure.
    Finished(Result<PathBuf, String>),
}

/// A station from the catalog. Only `id` and `name` matter to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Station {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    /// Short description / blurb
    #[serde(default)]
    pub description: String,
}

impl Station {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
        }
    }

    /// Look a station up by exact id, then by case-insensitive name.
    pub fn find<'a>(stations: &'a [Station], key: &str) -> Option<&'a Station> {
        let key = key.trim();
        stations
            .iter()
            .find(|s| s.id == key)
            .or_else(|| stations.iter().find(|s| s.name.eq_ignore_ascii_case(key)))
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_id_accepts_numbers_and_strings() {
        let stations: Vec<Station> = serde_json::from_str(
            r#"[
                {"id": 1469, "name": "Z100", "description": "Hit music"},
                {"id": "4802", "name": "KIIS FM"}
            ]"#,
        )
        .unwrap();
        assert_eq!(stations[0].id, "1469");
        assert_eq!(stations[1].id, "4802");
        assert_eq!(stations[1].description, "");
    }

    #[test]
    fn test_find_by_id_then_name() {
        let stations = vec![Station::new("1469", "Z100"), Station::new("4802", "KIIS FM")];
        assert_eq!(Station::find(&stations, "4802").unwrap().name, "KIIS FM");
        assert_eq!(Station::find(&stations, "kiis fm").unwrap().id, "4802");
        assert!(Station::find(&stations, "nope").is_none());
    }

    #[test]
    fn test_snapshot_labels() {
        let mut snap = CaptureSnapshot {
            elapsed_secs: 125,
            cache_size_bytes: 2048,
            ..Default::default()
        };
        assert_eq!(snap.elapsed_label(), "02:05");
        assert_eq!(snap.cache_size_label(), "Cache Size: 2.00 KB");
        assert_eq!(snap.current_track_label(), "Current Track: N/A");
        snap.title = Some("Levitating".into());
        snap.artist = Some("Dua Lipa".into());
        assert_eq!(snap.current_track_label(), "Current Track: Levitating - Dua Lipa");
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(r#"{"cmd":"Record","station":"1469"}"#).unwrap();
        assert!(matches!(cmd, Command::Record { station } if station == "1469"));
    }
}
