//! Live HLS radio capture.
//!
//! Polls a station's two-tier playlist, downloads every new segment once,
//! reports now-playing changes, and on stop stitches the cached segments back
//! together in sequence order into a single recording.

pub mod assembler;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod platform;
pub mod playlist;
pub mod poller;
pub mod protocol;
pub mod session;
pub mod state;
pub mod store;
pub mod track_log;
pub mod watcher;

pub use error::{CaptureError, Result};
pub use session::CaptureSession;
