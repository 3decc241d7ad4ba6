mod core;
mod http;

use std::sync::Arc;

use anyhow::Context;
use radio_capture::codec::FfmpegCodec;
use radio_capture::config::Config;
use radio_capture::protocol::Command;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Log(String),
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR end up in /api/logs
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is OK
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = radio_capture::platform::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let log_path = data_dir.join("recorder.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,radio_recorder=debug,radio_capture=debug,hyper_util=warn,reqwest=warn",
                )
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let stations = Arc::new(radio_capture::catalog::load_stations(&config.catalog).await?);
    let codec = Arc::new(FfmpegCodec::from_config(&config.codec)?);

    // Event channel: all external inputs funnel into RecorderCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::RecorderEvent>(64);

    let recorder = core::RecorderCore::new(&config, stations.clone(), codec, broadcast_tx.clone())?;

    let logs = http::RecentLogs::default();
    let _log_collector = logs.spawn_collector(broadcast_tx.subscribe());

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::ApiState {
                monitor: recorder.monitor(),
                stations: stations.clone(),
                event_tx: event_tx.clone(),
                logs,
            },
        );
    }

    if let Some(station) = std::env::args().nth(1) {
        info!("Recording {} from the command line", station);
        let record = core::RecorderEvent::command(Command::Record { station });
        if event_tx.send(record).await.is_err() {
            warn!("Recorder event loop is gone");
        }
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, stopping"),
            Err(e) => {
                warn!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
        }
        let _ = shutdown_tx.send(core::RecorderEvent::Shutdown).await;
    });

    info!("Recorder initialised, running event loop");
    recorder.run(event_rx).await?;

    Ok(())
}
