use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub codec: CodecConfig,
}

/// Timing and retry knobs for a capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Sleep between playlist polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Total attempts per segment, including the first one.
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// How long `stop()` waits for in-flight segment downloads.
    #[serde(default = "default_drain_grace_secs")]
    pub drain_grace_secs: u64,
    /// Most-recent `.aac` URLs taken from each variant poll.
    #[serde(default = "default_segments_per_poll")]
    pub segments_per_poll: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Master playlist URL; every `{id}` is replaced with the station id.
    #[serde(default = "default_master_url_template")]
    pub master_url_template: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Segment cache, wiped before and after each session.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Where assembled recordings land.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_track_log")]
    pub track_log: PathBuf,
}

/// Station list source: an https:// URL or a local JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_stations_url")]
    pub stations_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Explicit ffmpeg binary; falls back to `platform::find_ffmpeg_binary`.
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_mp3_bitrate")]
    pub mp3_bitrate: String,
}

impl CaptureConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            fetch_attempts: default_fetch_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            drain_grace_secs: default_drain_grace_secs(),
            segments_per_poll: default_segments_per_poll(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            master_url_template: default_master_url_template(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            output_dir: default_output_dir(),
            track_log: default_track_log(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            stations_url: default_stations_url(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            mp3_bitrate: default_mp3_bitrate(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    900
}

fn default_fetch_attempts() -> u32 {
    7
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_drain_grace_secs() -> u64 {
    15
}

fn default_segments_per_poll() -> usize {
    1
}

fn default_master_url_template() -> String {
    "https://n3ab-e2.revma.ihrhls.com/zc{id}/hls.m3u8?zip=&rj-ttl=5&streamid={id}\
     &pname=live_profile&companionAds=false&dist=iheart&terminalId=159\
     &deviceName=web-mobile&rj-tok=AAABkw0KFxQAuzoCaJGbh-Xaaw\
     &aw_0_1st.playerid=iHeartRadioWebPlayer&listenerId=&clientType=web\
     &profileId=9434678024&aw_0_1st.skey=9434678024&host=webapp.US\
     &playedFrom=157&stationid={id}&territory=US"
        .to_string()
}

fn default_user_agent() -> String {
    concat!("radio-capture/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_cache_dir() -> PathBuf {
    platform::data_dir().join("segment-cache")
}

fn default_output_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("radio-recordings")
}

fn default_track_log() -> PathBuf {
    platform::data_dir().join("tracks.log")
}

fn default_stations_url() -> String {
    "https://raw.githubusercontent.com/Ghosty-Tongue/public-api/refs/heads/main/IHR/stations.json"
        .to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8991
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channels() -> u16 {
    2
}

fn default_mp3_bitrate() -> String {
    "192k".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.capture.poll_interval(), Duration::from_millis(900));
        assert_eq!(config.capture.fetch_attempts, 7);
        assert_eq!(config.capture.segments_per_poll, 1);
        assert!(config.http.enabled);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert!(config.catalog.stations_url.starts_with("https://"));
        assert!(config.paths.cache_dir.ends_with("radio-capture/segment-cache"));
    }

    #[test]
    fn test_master_template_has_three_id_slots() {
        let template = default_master_url_template();
        assert_eq!(template.matches("{id}").count(), 3);
        assert!(template.contains("streamid={id}"));
        assert!(template.contains("stationid={id}"));
        assert!(!template.contains(' '));
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            [capture]
            poll_interval_ms = 250

            [http]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.poll_interval_ms, 250);
        assert_eq!(config.capture.fetch_attempts, 7);
        assert!(!config.http.enabled);
        assert_eq!(config.http.port, 8991);
        assert_eq!(config.codec.sample_rate, 44100);
    }
}
