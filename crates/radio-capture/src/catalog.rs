//! Station catalog loading.
//!
//! The catalog is a JSON array of `{ "id", "name", "description" }` records,
//! either served over HTTP(S) or stored in a local file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::config::CatalogConfig;
use crate::protocol::Station;

pub fn parse_stations_from_json_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let stations: Vec<Station> =
        serde_json::from_str(content).context("station list is not a JSON array of stations")?;
    Ok(stations)
}

pub fn load_stations_from_file(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_stations_from_json_str(&content)
}

async fn fetch_stations_url(url: &str) -> anyhow::Result<Vec<Station>> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        anyhow::bail!("HTTP {}", response.status());
    }
    let text = response.text().await?;
    parse_stations_from_json_str(&text)
}

/// Load the catalog from `config.stations_url` (URL or file path), falling
/// back to a `stations.json` in the working directory.
pub async fn load_stations(config: &CatalogConfig) -> anyhow::Result<Vec<Station>> {
    let source = config.stations_url.trim();

    if source.starts_with("http://") || source.starts_with("https://") {
        match fetch_stations_url(source).await {
            Ok(s) => {
                info!("Loaded {} stations from {}", s.len(), source);
                return Ok(s);
            }
            Err(e) => warn!("Failed to fetch stations from URL: {}", e),
        }
    } else if !source.is_empty() {
        let path = PathBuf::from(source);
        match load_stations_from_file(&path) {
            Ok(s) => {
                info!("Loaded {} stations from {}", s.len(), path.display());
                return Ok(s);
            }
            Err(e) => warn!("Failed to load stations file: {:#}", e),
        }
    }

    let local = PathBuf::from("stations.json");
    if local.exists() {
        let s = load_stations_from_file(&local)?;
        info!("Loaded {} stations from local stations.json", s.len());
        return Ok(s);
    }

    anyhow::bail!("no station catalog available (tried {:?})", source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CATALOG: &str = r#"[
        {"id": 1469, "name": "Z100", "description": "New York's #1 Hit Music Station"},
        {"id": 4802, "name": "KIIS FM", "description": "LA"}
    ]"#;

    #[test]
    fn test_parse_catalog_preserves_order() {
        let stations = parse_stations_from_json_str(CATALOG).unwrap();
        let names: Vec<&str> = stations.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Z100", "KIIS FM"]);
        assert_eq!(stations[0].id, "1469");
    }

    #[test]
    fn test_parse_catalog_rejects_garbage() {
        assert!(parse_stations_from_json_str("{\"stations\": []}").is_err());
        assert!(parse_stations_from_json_str("[{\"name\": \"no id\"}]").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stations.json");
        std::fs::write(&path, CATALOG).unwrap();
        let config = CatalogConfig {
            stations_url: path.display().to_string(),
        };
        let stations = load_stations(&config).await.unwrap();
        assert_eq!(stations.len(), 2);
    }
}
