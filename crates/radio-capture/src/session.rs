//! Capture session: lifecycle, poll cadence and fetch dispatch.
//!
//! One cadence task polls the playlist every `poll_interval` and hands each
//! newly accepted segment to its own fetch task, so a slow download never
//! delays the next poll. Fetch tasks live in a `JoinSet` owned by the cadence
//! task and bounded by a semaphore; on stop the set is handed back, drained
//! for at most `drain_grace`, and only then is the cache assembled.
//!
//! State:
//!   Idle -> Recording   start(), after the first poll succeeded
//!   Recording -> Stopping   stop()
//!   Stopping -> Idle   assembly finished (ok or not) and cache cleared

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::assembler::{Assembler, Recording};
use crate::codec::AudioCodec;
use crate::config::{CaptureConfig, Config};
use crate::error::{CaptureError, Result};
use crate::fetcher::{build_client, SegmentFetcher};
use crate::poller::{PlaylistPoller, PollOutcome};
use crate::protocol::{SessionEvent, SessionState, Station};
use crate::state::SessionMonitor;
use crate::store::SegmentStore;
use crate::watcher::TrackWatcher;

const EVENT_CAPACITY: usize = 256;
const PROGRESS_TICK: Duration = Duration::from_secs(1);

struct ActiveCapture {
    station: Station,
    started_at: Instant,
    started_wall: DateTime<Local>,
    stop_tx: watch::Sender<bool>,
    cadence: JoinHandle<JoinSet<()>>,
    ticker: JoinHandle<()>,
}

/// Everything the cadence task and its fetch tasks share.
#[derive(Clone)]
struct CadenceContext {
    station: Station,
    started_at: Instant,
    interval: Duration,
    poller: Arc<PlaylistPoller>,
    fetcher: SegmentFetcher,
    store: Arc<SegmentStore>,
    monitor: SessionMonitor,
    events: broadcast::Sender<SessionEvent>,
    permits: Arc<Semaphore>,
}

pub struct CaptureSession {
    capture: CaptureConfig,
    poller: Arc<PlaylistPoller>,
    fetcher: SegmentFetcher,
    store: Arc<SegmentStore>,
    assembler: Assembler,
    monitor: SessionMonitor,
    events: broadcast::Sender<SessionEvent>,
    active: Option<ActiveCapture>,
}

impl CaptureSession {
    pub fn new(config: &Config, codec: Arc<dyn AudioCodec>) -> Result<Self> {
        let client = build_client(&config.stream, &config.capture)?;
        Ok(Self::with_parts(
            config.capture.clone(),
            PlaylistPoller::new(client.clone(), &config.stream, &config.capture),
            SegmentFetcher::new(client, &config.capture),
            SegmentStore::new(&config.paths.cache_dir),
            Assembler::new(codec, &config.paths.output_dir),
        ))
    }

    pub fn with_parts(
        capture: CaptureConfig,
        poller: PlaylistPoller,
        fetcher: SegmentFetcher,
        store: SegmentStore,
        assembler: Assembler,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            capture,
            poller: Arc::new(poller),
            fetcher,
            store: Arc::new(store),
            assembler,
            monitor: SessionMonitor::new(),
            events,
            active: None,
        }
    }

    pub fn monitor(&self) -> SessionMonitor {
        self.monitor.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn station(&self) -> Option<&Station> {
        self.active.as_ref().map(|a| &a.station)
    }

    /// Wall-clock time since `start()`.
    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.started_at.elapsed())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Reset the cache, run the first poll and start recording.
    ///
    /// A failing first poll means no stream could be resolved at all: the
    /// error is returned and the session stays `Idle`.
    pub async fn start(&mut self, station: Station) -> Result<()> {
        if self.active.is_some() {
            return Err(CaptureError::InvalidState("a session is already recording"));
        }

        let prepared = match self.store.clear().await {
            Ok(_) => self.store.prepare().await,
            Err(e) => Err(e),
        };
        if let Err(e) = prepared {
            error!("[session] cannot reset segment cache: {}", e);
            self.report_start_failure(&e).await;
            return Err(e);
        }

        info!("[session] starting capture of {} ({})", station.name, station.id);
        let first = match self.poller.poll_once(&station).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[session] first poll failed for {}: {}", station.name, e);
                self.report_start_failure(&e).await;
                return Err(e);
            }
        };

        let started_at = Instant::now();
        let started_wall = Local::now();
        self.monitor.set_recording(&station).await;
        self.emit(SessionEvent::Status(format!("Recording {}...", station.name)));

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = CadenceContext {
            station: station.clone(),
            started_at,
            interval: self.capture.poll_interval(),
            poller: Arc::clone(&self.poller),
            fetcher: self.fetcher.clone(),
            store: Arc::clone(&self.store),
            monitor: self.monitor.clone(),
            events: self.events.clone(),
            permits: Arc::new(Semaphore::new(self.capture.max_concurrent_fetches.max(1))),
        };

        let ticker = spawn_progress_ticker(
            self.monitor.clone(),
            Arc::clone(&self.store),
            started_at,
            stop_tx.subscribe(),
        );
        let cadence = tokio::spawn(run_cadence(ctx, first, stop_rx));

        self.active = Some(ActiveCapture {
            station,
            started_at,
            started_wall,
            stop_tx,
            cadence,
            ticker,
        });
        Ok(())
    }

    /// Stop polling, let in-flight downloads finish (bounded by the drain
    /// grace period), assemble the recording and clear the cache.
    ///
    /// The session is `Idle` again when this returns, whatever the outcome.
    pub async fn stop(&mut self) -> Result<Recording> {
        let active = self
            .active
            .take()
            .ok_or(CaptureError::InvalidState("no session is recording"))?;

        info!(
            "[session] stopping capture of {} after {:.1}s",
            active.station.name,
            active.started_at.elapsed().as_secs_f64()
        );
        self.monitor.set_state(SessionState::Stopping).await;
        self.monitor.set_status("Recording stopped.").await;
        let _ = active.stop_tx.send(true);

        let fetches = match active.cadence.await {
            Ok(fetches) => fetches,
            Err(e) => {
                error!("[session] cadence task failed: {}", e);
                JoinSet::new()
            }
        };
        if let Err(e) = active.ticker.await {
            warn!("[session] progress ticker failed: {}", e);
        }
        self.drain(fetches).await;

        let result = self
            .assembler
            .assemble(&self.store, &active.station.name, active.started_wall)
            .await;

        let cleanup = self.store.clear().await.err();
        if let Some(e) = &cleanup {
            warn!("[session] failed to clear segment cache: {}", e);
        }

        match &result {
            Ok(recording) => {
                info!("[session] recording saved to {}", recording.path.display());
                self.monitor
                    .set_finished(Some(recording.path.clone()), "Recording complete.")
                    .await;
                self.emit(SessionEvent::Finished(Ok(recording.path.clone())));
            }
            Err(CaptureError::NoSegments) => {
                warn!("[session] nothing to assemble for {}", active.station.name);
                self.monitor
                    .set_finished(None, "No valid audio files to combine.")
                    .await;
                self.emit(SessionEvent::Finished(Err(CaptureError::NoSegments.to_string())));
            }
            Err(e) => {
                error!("[session] assembly failed: {}", e);
                self.monitor
                    .set_finished(None, format!("Failed to combine audio files: {}", e))
                    .await;
                self.emit(SessionEvent::Finished(Err(e.to_string())));
            }
        }

        if let Some(e) = cleanup {
            let outcome = self.monitor.snapshot().await.status;
            let status = format!("{} Failed to clear segment cache: {}", outcome, e);
            self.monitor.set_status(status.clone()).await;
            self.emit(SessionEvent::Status(status));
        }
        result
    }

    async fn report_start_failure(&self, error: &CaptureError) {
        self.monitor.set_error(error.to_string()).await;
        self.emit(SessionEvent::Status(format!("Error: {}", error)));
    }

    async fn drain(&self, mut fetches: JoinSet<()>) {
        if fetches.is_empty() {
            return;
        }
        let pending = fetches.len();
        let grace = self.capture.drain_grace();
        info!("[session] waiting up to {:?} for {} in-flight fetches", grace, pending);

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = fetches.join_next().await {
                log_join_error(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "[session] {} fetches still running after {:?}, aborting",
                fetches.len(),
                grace
            );
            fetches.shutdown().await;
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop_tx.send(true);
            active.ticker.abort();
        }
    }
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            error!("[session] fetch task panicked: {}", e);
        }
    }
}

/// Poll until stopped. Returns the fetch tasks that are still running so the
/// caller can drain them.
async fn run_cadence(
    ctx: CadenceContext,
    first: PollOutcome,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut fetches = JoinSet::new();
    let mut watcher = TrackWatcher::new();

    ctx.handle_outcome(first, &mut watcher, &mut fetches).await;

    loop {
        let sleep = tokio::time::sleep(ctx.interval);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                _ = stop_rx.changed() => return fetches,
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                    log_join_error(joined)
                }
            }
        }
        if *stop_rx.borrow() {
            return fetches;
        }

        let polled = tokio::select! {
            polled = ctx.poller.poll_once(&ctx.station) => polled,
            _ = stop_rx.changed() => return fetches,
        };

        match polled {
            Ok(outcome) => ctx.handle_outcome(outcome, &mut watcher, &mut fetches).await,
            Err(e) => {
                warn!("[poll] cycle failed for {}: {}", ctx.station.name, e);
                let status = format!("Failed to process stream: {}", e);
                ctx.monitor.set_status(status.clone()).await;
                let _ = ctx.events.send(SessionEvent::Status(status));
            }
        }
    }
}

impl CadenceContext {
    async fn handle_outcome(
        &self,
        outcome: PollOutcome,
        watcher: &mut TrackWatcher,
        fetches: &mut JoinSet<()>,
    ) {
        if outcome.entries == 0 {
            let status = "Failed to process stream: No AAC files found in the stream data.";
            warn!("[poll] variant playlist for {} has no entries", self.station.name);
            self.monitor.set_status(status).await;
            let _ = self.events.send(SessionEvent::Status(status.to_string()));
        } else if outcome.segments.is_empty() && outcome.skipped > 0 {
            let status = format!(
                "Failed to process stream: {} segment name(s) carry no sequence number.",
                outcome.skipped
            );
            warn!("[poll] {} for {}", status, self.station.name);
            self.monitor.set_status(status.clone()).await;
            let _ = self.events.send(SessionEvent::Status(status));
        }

        if let Some(metadata) = &outcome.metadata {
            if let Some(event) = watcher.observe(metadata, self.started_at.elapsed()) {
                info!("[track] now playing: {} by {}", event.title, event.artist);
                self.monitor.set_track(metadata).await;
                let _ = self.events.send(SessionEvent::TrackChanged(event));
            }
        }

        for segment in outcome.segments {
            if !self.store.accept(&segment) {
                continue;
            }
            let ctx = self.clone();
            fetches.spawn(async move {
                let Ok(_permit) = ctx.permits.clone().acquire_owned().await else {
                    return;
                };
                match ctx.fetcher.fetch(&segment, &ctx.store).await {
                    Ok(fetched) => {
                        ctx.monitor.segment_cached().await;
                        let _ = ctx.events.send(SessionEvent::SegmentCached {
                            sequence: fetched.sequence,
                            bytes: fetched.bytes,
                        });
                    }
                    Err(e) => {
                        let (url, attempts) = match &e {
                            CaptureError::FetchFailed { url, attempts } => (url.clone(), *attempts),
                            _ => (segment.url.clone(), 0),
                        };
                        ctx.monitor.segment_failed().await;
                        ctx.monitor
                            .set_status(format!(
                                "Failed to download file after {} attempts: {}",
                                attempts, url
                            ))
                            .await;
                        let _ = ctx.events.send(SessionEvent::SegmentFailed { url, attempts });
                    }
                }
            });
        }
    }
}

fn spawn_progress_ticker(
    monitor: SessionMonitor,
    store: Arc<SegmentStore>,
    started_at: Instant,
    mut stop_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PROGRESS_TICK);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let size = store.cache_size().await;
                    monitor.set_progress(started_at.elapsed(), size).await;
                }
                _ = stop_rx.changed() => break,
            }
        }
    })
}
