// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON configuration loading (§6). Generalized from the reference
//! codebase's `ConfigFile` trait: same CWD → XDG → `/etc` search-path
//! shape, `serde_json` instead of `toml`, and no combined-file section
//! support since §6 describes one flat document rather than a family of
//! per-binary files sharing a host file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Standard,
    Flex,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StationConfig {
    pub callsign: String,
    #[serde(default)]
    pub grid: Option<String>,
    pub continent: String,
    pub dxcc: String,
    #[serde(default)]
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlexConfig {
    pub host: String,
    #[serde(default = "default_cat_base_port")]
    pub cat_base_port: u16,
    #[serde(default)]
    pub default_bands: Vec<u64>,
}

fn default_cat_base_port() -> u16 {
    7809
}

impl Default for FlexConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), cat_base_port: default_cat_base_port(), default_bands: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WsjtxConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogbookConfig {
    #[serde(default = "default_logbook_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub enable_hrd_server: bool,
    #[serde(default = "default_hrd_port")]
    pub hrd_port: u16,
}

fn default_logbook_path() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("trx-rs").join("trx-rs.adi")
}

fn default_hrd_port() -> u16 {
    7800
}

impl Default for LogbookConfig {
    fn default() -> Self {
        Self { path: default_logbook_path(), enable_hrd_server: true, hrd_port: default_hrd_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardConfig {
    #[serde(default = "default_station_lifetime")]
    pub station_lifetime_seconds: u64,
    #[serde(default)]
    pub snr_thresholds: Vec<i32>,
}

fn default_station_lifetime() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub flex: Option<FlexConfig>,
    #[serde(default)]
    pub wsjtx: WsjtxConfig,
    #[serde(default)]
    pub logbook: LogbookConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Trait for loading configuration files with default search paths. Kept
/// as a trait (rather than inlining the logic into `ServerConfig`) so a
/// future second binary on this surface can reuse the same search tiers.
pub trait ConfigFile: Sized + Default + serde::de::DeserializeOwned {
    fn config_filename() -> &'static str;

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(Self::config_filename())];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("trx-rs").join(Self::config_filename()));
        }
        paths.push(PathBuf::from("/etc/trx-rs").join(Self::config_filename()));
        paths
    }

    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in Self::default_search_paths() {
            if path.exists() {
                let cfg = Self::load_from_file(&path)?;
                return Ok((cfg, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }
}

impl ConfigFile for ServerConfig {
    fn config_filename() -> &'static str {
        "trx-server.json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_standard_mode_with_no_document() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.mode, RunMode::Standard);
        assert_eq!(cfg.logbook.hrd_port, 7800);
    }

    #[test]
    fn unknown_top_level_fields_are_ignored() {
        let json = r#"{
            "mode": "flex",
            "station": {"callsign": "K1XYZ", "continent": "NA", "dxcc": "K"},
            "flex": {"host": "192.168.1.10"},
            "some_future_field": {"whatever": true}
        }"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.mode, RunMode::Flex);
        assert_eq!(cfg.station.callsign, "K1XYZ");
        assert_eq!(cfg.flex.unwrap().host, "192.168.1.10");
    }

    #[test]
    fn log_level_is_optional_and_top_level() {
        let json = r#"{"station": {"callsign": "K1XYZ", "continent": "NA", "dxcc": "K"}, "log_level": "debug"}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
    }
}
