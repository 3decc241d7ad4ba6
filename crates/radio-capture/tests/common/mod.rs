#![allow(dead_code)]

//! Scripted local HLS origin for integration tests.
//!
//! Serves a master playlist per station, a variant playlist that advances
//! through a script on every request (the last entry repeats), and `.aac`
//! segments that can be told to fail or stall a number of times.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use radio_capture::codec::{AudioCodec, PcmFrames};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Script {
    base: String,
    master_status: Option<StatusCode>,
    omit_stream_marker: bool,
    master_hits: usize,
    variants: Vec<String>,
    variant_hits: usize,
    segment_failures: HashMap<String, u32>,
    segment_delays: HashMap<String, Duration>,
    segment_hits: HashMap<String, u32>,
}

type Shared = Arc<Mutex<Script>>;

pub struct MockOrigin {
    pub base: String,
    script: Shared,
    server: JoinHandle<()>,
}

impl MockOrigin {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock origin");
        let addr = listener.local_addr().expect("mock origin addr");
        let base = format!("http://{}", addr);

        let script: Shared = Arc::new(Mutex::new(Script {
            base: base.clone(),
            ..Default::default()
        }));

        let app = Router::new()
            .route("/station/:id/master.m3u8", get(master))
            .route("/variant.m3u8", get(variant))
            .route("/seg/:name", get(segment))
            .with_state(script.clone());

        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { base, script, server }
    }

    /// Template the poller expands per station.
    pub fn master_template(&self) -> String {
        format!("{}/station/{{id}}/master.m3u8?streamid={{id}}", self.base)
    }

    pub fn segment_url(&self, name: &str) -> String {
        format!("{}/seg/{}", self.base, name)
    }

    /// A variant playlist whose entries all carry `(title, artist)` and
    /// list the given segment file names in order.
    pub fn variant_text(&self, title: &str, artist: &str, segments: &[&str]) -> String {
        let mut text = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:10\n");
        for name in segments {
            text.push_str(&format!(
                "#EXTINF:10,title=\"{}\",artist=\"{}\",url=\"song\"\n{}\n",
                title,
                artist,
                self.segment_url(name)
            ));
        }
        text
    }

    pub fn push_variant(&self, text: String) {
        self.script.lock().unwrap().variants.push(text);
    }

    pub fn fail_master(&self, status: StatusCode) {
        self.script.lock().unwrap().master_status = Some(status);
    }

    /// Serve the master playlist normally again after `fail_master`.
    pub fn restore_master(&self) {
        self.script.lock().unwrap().master_status = None;
    }

    pub fn omit_stream_marker(&self) {
        self.script.lock().unwrap().omit_stream_marker = true;
    }

    pub fn fail_segment(&self, name: &str, times: u32) {
        self.script
            .lock()
            .unwrap()
            .segment_failures
            .insert(name.to_string(), times);
    }

    pub fn delay_segment(&self, name: &str, delay: Duration) {
        self.script
            .lock()
            .unwrap()
            .segment_delays
            .insert(name.to_string(), delay);
    }

    pub fn master_hits(&self) -> usize {
        self.script.lock().unwrap().master_hits
    }

    pub fn variant_hits(&self) -> usize {
        self.script.lock().unwrap().variant_hits
    }

    pub fn segment_hits(&self, name: &str) -> u32 {
        self.script
            .lock()
            .unwrap()
            .segment_hits
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Wait until `check` holds, polling every 10 ms for at most `timeout`.
    pub async fn wait_for(&self, timeout: Duration, check: impl Fn(&Self) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check(self)
    }
}

impl Drop for MockOrigin {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Body served for a segment file name.
pub fn segment_body(name: &str) -> Vec<u8> {
    format!("<{}>", name).into_bytes()
}

async fn master(State(script): State<Shared>, Path(_id): Path<String>) -> Response {
    let mut s = script.lock().unwrap();
    s.master_hits += 1;
    if let Some(status) = s.master_status {
        return (status, "unavailable").into_response();
    }
    let body = if s.omit_stream_marker {
        format!("#EXTM3U\n{}/variant.m3u8\n", s.base)
    } else {
        format!(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=64000,CODECS=\"mp4a.40.2\"\n{}/variant.m3u8\n",
            s.base
        )
    };
    (StatusCode::OK, body).into_response()
}

async fn variant(State(script): State<Shared>) -> Response {
    let mut s = script.lock().unwrap();
    let idx = s.variant_hits.min(s.variants.len().saturating_sub(1));
    s.variant_hits += 1;
    let body = s.variants.get(idx).cloned().unwrap_or_default();
    (StatusCode::OK, body).into_response()
}

async fn segment(State(script): State<Shared>, Path(name): Path<String>) -> Response {
    let (fail, delay) = {
        let mut s = script.lock().unwrap();
        *s.segment_hits.entry(name.clone()).or_insert(0) += 1;
        let fail = match s.segment_failures.get_mut(&name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        (fail, s.segment_delays.get(&name).copied())
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if fail {
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }
    (StatusCode::OK, segment_body(&name)).into_response()
}

/// Codec that treats segment bytes as PCM and "encodes" by passing the
/// concatenated PCM through. Records the order segments were decoded in.
#[derive(Default)]
pub struct PassthroughCodec {
    decoded: Mutex<Vec<Vec<u8>>>,
    reject: Option<Vec<u8>>,
}

impl PassthroughCodec {
    pub fn rejecting(segment: Vec<u8>) -> Self {
        Self {
            decoded: Mutex::new(Vec::new()),
            reject: Some(segment),
        }
    }

    pub fn decoded(&self) -> Vec<Vec<u8>> {
        self.decoded.lock().unwrap().clone()
    }
}

impl AudioCodec for PassthroughCodec {
    fn decode(&self, segment: &[u8]) -> Result<PcmFrames> {
        if self.reject.as_deref() == Some(segment) {
            bail!("invalid data found when processing input");
        }
        self.decoded.lock().unwrap().push(segment.to_vec());
        Ok(PcmFrames {
            sample_rate: 44_100,
            channels: 2,
            data: segment.to_vec(),
        })
    }

    fn encode(&self, pcm: &PcmFrames) -> Result<Vec<u8>> {
        Ok(pcm.data.clone())
    }
}
