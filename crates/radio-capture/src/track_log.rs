//! Append-only track-change log.
//!
//! One line per change:
//!
//!   2024-05-01 14:03:12 - 03:41 - Levitating by Dua Lipa

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::watcher::TrackChangeEvent;

/// "mm:ss" with minutes allowed to grow past 59.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

pub fn format_line(event: &TrackChangeEvent) -> String {
    format!(
        "{} - {} - {} by {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        format_elapsed(event.elapsed),
        one_line(&event.title),
        one_line(&event.artist),
    )
}

fn one_line(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

pub struct TrackLog {
    path: PathBuf,
}

impl TrackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, event: &TrackChangeEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = format_line(event);
        f.write_all(line.as_bytes()).await?;
        f.write_all(b"\n").await?;
        debug!("[tracklog] {}", line);
        Ok(())
    }
}
