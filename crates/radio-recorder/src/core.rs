//! Single owner of the capture session.
//!
//! Every external input (HTTP, CLI argument, Ctrl-C) arrives as a
//! `RecorderEvent` on one channel; session notifications arrive on the
//! session's broadcast channel. Both are handled here, one at a time, so the
//! session never needs a lock.

use std::sync::Arc;

use anyhow::Context;
use radio_capture::codec::AudioCodec;
use radio_capture::config::Config;
use radio_capture::protocol::{Command, SessionEvent, Station};
use radio_capture::state::SessionMonitor;
use radio_capture::track_log::TrackLog;
use radio_capture::{CaptureError, CaptureSession};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::BroadcastMessage;

/// What a command produced: a status line for the caller.
pub type CommandReply = Result<String, CommandError>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown station: {0}")]
    UnknownStation(String),
    #[error("already recording {0}")]
    Busy(String),
    #[error("not recording")]
    NotRecording,
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

pub enum RecorderEvent {
    Command {
        command: Command,
        reply: Option<oneshot::Sender<CommandReply>>,
    },
    Shutdown,
}

impl RecorderEvent {
    pub fn command(command: Command) -> Self {
        Self::Command {
            command,
            reply: None,
        }
    }
}

pub struct RecorderCore {
    session: CaptureSession,
    stations: Arc<Vec<Station>>,
    track_log: TrackLog,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl RecorderCore {
    pub fn new(
        config: &Config,
        stations: Arc<Vec<Station>>,
        codec: Arc<dyn AudioCodec>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> anyhow::Result<Self> {
        let session =
            CaptureSession::new(config, codec).context("failed to build capture session")?;
        Ok(Self::with_session(
            session,
            stations,
            TrackLog::new(&config.paths.track_log),
            broadcast_tx,
        ))
    }

    pub fn with_session(
        session: CaptureSession,
        stations: Arc<Vec<Station>>,
        track_log: TrackLog,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            session,
            stations,
            track_log,
            broadcast_tx,
        }
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.session.monitor()
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<RecorderEvent>) -> anyhow::Result<()> {
        let mut session_rx = self.session.subscribe();

        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(RecorderEvent::Command { command, reply }) => {
                        let result = self.handle_command(command).await;
                        if let Err(e) = &result {
                            warn!("Command failed: {}", e);
                        }
                        // Session events raised while the command ran.
                        self.drain_session_events(&mut session_rx).await;
                        self.notify();
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    Some(RecorderEvent::Shutdown) | None => break,
                },
                event = session_rx.recv() => match event {
                    Ok(event) => self.handle_session_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Recorder missed {} session events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        self.shutdown(&mut session_rx).await;
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> CommandReply {
        match command {
            Command::Record { station } => {
                let found = Station::find(&self.stations, &station)
                    .cloned()
                    .ok_or_else(|| CommandError::UnknownStation(station.clone()))?;
                if let Some(current) = self.session.station() {
                    return Err(CommandError::Busy(current.name.clone()));
                }
                let name = found.name.clone();
                self.session.start(found).await?;
                Ok(format!("Recording {}...", name))
            }
            Command::Stop => {
                if !self.session.is_recording() {
                    return Err(CommandError::NotRecording);
                }
                let recording = self.session.stop().await?;
                Ok(format!("Recording complete: {}", recording.path.display()))
            }
            Command::GetState => Ok(self.session.monitor().snapshot().await.status),
        }
    }

    async fn drain_session_events(&mut self, session_rx: &mut broadcast::Receiver<SessionEvent>) {
        while let Ok(event) = session_rx.try_recv() {
            self.handle_session_event(event).await;
        }
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::TrackChanged(track) => {
                if let Err(e) = self.track_log.append(track).await {
                    let path = self.track_log.path().display();
                    error!("Failed to write track log {}: {:#}", path, e);
                }
            }
            SessionEvent::Status(status) => info!("{}", status),
            SessionEvent::SegmentCached { sequence, bytes } => {
                debug!("Segment {} cached ({} bytes)", sequence, bytes)
            }
            SessionEvent::SegmentFailed { url, attempts } => {
                warn!("Failed to download file after {} attempts: {}", attempts, url)
            }
            SessionEvent::Finished(Ok(path)) => info!("Recording saved to {}", path.display()),
            SessionEvent::Finished(Err(e)) => warn!("Recording not saved: {}", e),
        }
        self.notify();
    }

    fn notify(&self) {
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    /// Assemble whatever was captured before exiting.
    async fn shutdown(&mut self, session_rx: &mut broadcast::Receiver<SessionEvent>) {
        if !self.session.is_recording() {
            info!("Recorder shutting down");
            return;
        }
        info!("Recorder shutting down, finishing active recording");
        // The outcome is reported through the Finished event.
        let _ = self.session.stop().await;
        self.drain_session_events(session_rx).await;
    }
}
