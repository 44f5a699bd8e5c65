use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::CatalogEntry;
use crate::hysteresis::{PresenceThresholds, STREAK_CEILING};

const DEFAULT_DB_PATH: &str = "till.db";
const DEFAULT_STOCK_PATH: &str = "till_stock.json";
const DEFAULT_CASHIER_ID: u32 = 1;
const DEFAULT_SOURCE_URL: &str = "stub://counter";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_DETECTION_INTERVAL: u32 = 3;
const DEFAULT_COOLDOWN_TICKS: u32 = 600;
const DEFAULT_LOOP_YIELD_MS: u64 = 10;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 200;
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Deserialize, Default)]
struct TillConfigFile {
    db_path: Option<String>,
    stock_path: Option<PathBuf>,
    cashier_id: Option<u32>,
    loop_yield_ms: Option<u64>,
    refresh_interval_ms: Option<u64>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    sampler: Option<SamplerConfigFile>,
    presence: Option<PresenceConfigFile>,
    cooldown: Option<CooldownConfigFile>,
    backend: Option<BackendConfigFile>,
    catalog: Option<Vec<CatalogEntry>>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    script: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SamplerConfigFile {
    detection_interval: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PresenceConfigFile {
    presence_frames: Option<u32>,
    absence_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CooldownConfigFile {
    ticks: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    enabled: Option<bool>,
    url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TillConfig {
    pub db_path: String,
    pub stock_path: PathBuf,
    pub cashier_id: u32,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub detection_interval: u32,
    pub presence: PresenceThresholds,
    pub cooldown_ticks: u32,
    pub loop_yield: Duration,
    pub refresh_interval: Duration,
    pub backend: BackendSettings,
    /// Replaces the built-in catalog when set.
    pub catalog: Option<Vec<CatalogEntry>>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    /// Label script for the `scripted` backend.
    pub script: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub enabled: bool,
    pub url: String,
    pub timeout: Duration,
}

impl TillConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TILL_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same layering as `load`, with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TillConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let presence = file.presence.unwrap_or_default();
        let backend = file.backend.unwrap_or_default();
        let defaults = PresenceThresholds::default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            stock_path: file
                .stock_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STOCK_PATH)),
            cashier_id: file.cashier_id.unwrap_or(DEFAULT_CASHIER_ID),
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                script: detector.script,
            },
            detection_interval: file
                .sampler
                .and_then(|sampler| sampler.detection_interval)
                .unwrap_or(DEFAULT_DETECTION_INTERVAL),
            presence: PresenceThresholds {
                presence_frames: presence.presence_frames.unwrap_or(defaults.presence_frames),
                absence_frames: presence.absence_frames.unwrap_or(defaults.absence_frames),
            },
            cooldown_ticks: file
                .cooldown
                .and_then(|cooldown| cooldown.ticks)
                .unwrap_or(DEFAULT_COOLDOWN_TICKS),
            loop_yield: Duration::from_millis(file.loop_yield_ms.unwrap_or(DEFAULT_LOOP_YIELD_MS)),
            refresh_interval: Duration::from_millis(
                file.refresh_interval_ms
                    .unwrap_or(DEFAULT_REFRESH_INTERVAL_MS),
            ),
            backend: BackendSettings {
                enabled: backend.enabled.unwrap_or(true),
                url: backend
                    .url
                    .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
                timeout: Duration::from_millis(
                    backend.timeout_ms.unwrap_or(DEFAULT_BACKEND_TIMEOUT_MS),
                ),
            },
            catalog: file.catalog,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("TILL_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(path) = std::env::var("TILL_STOCK_PATH") {
            if !path.trim().is_empty() {
                self.stock_path = PathBuf::from(path);
            }
        }
        if let Ok(url) = std::env::var("TILL_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(name) = std::env::var("TILL_DETECTOR") {
            if !name.trim().is_empty() {
                self.detector.backend = name.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("TILL_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend.url = url;
            }
        }
        if let Ok(flag) = std::env::var("TILL_BACKEND_SYNC") {
            self.backend.enabled = parse_flag(&flag)
                .ok_or_else(|| anyhow!("TILL_BACKEND_SYNC must be one of 0, 1, true, false"))?;
        }
        if let Ok(id) = std::env::var("TILL_CASHIER_ID") {
            self.cashier_id = id
                .trim()
                .parse()
                .map_err(|_| anyhow!("TILL_CASHIER_ID must be a positive integer"))?;
        }
        if let Ok(ticks) = std::env::var("TILL_COOLDOWN_TICKS") {
            self.cooldown_ticks = ticks
                .trim()
                .parse()
                .map_err(|_| anyhow!("TILL_COOLDOWN_TICKS must be an integer number of ticks"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.detection_interval == 0 {
            return Err(anyhow!("sampler.detection_interval must be at least 1"));
        }
        for (name, value) in [
            ("presence.presence_frames", self.presence.presence_frames),
            ("presence.absence_frames", self.presence.absence_frames),
        ] {
            if value == 0 || value > STREAK_CEILING {
                return Err(anyhow!(
                    "{} must be between 1 and {}",
                    name,
                    STREAK_CEILING
                ));
            }
        }
        if self.cooldown_ticks == 0 {
            return Err(anyhow!("cooldown.ticks must be at least 1"));
        }
        if self.refresh_interval.is_zero() {
            return Err(anyhow!("refresh_interval_ms must be greater than zero"));
        }
        if self.backend.timeout.is_zero() {
            return Err(anyhow!("backend.timeout_ms must be greater than zero"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if let Some(entries) = &mut self.catalog {
            if entries.is_empty() {
                return Err(anyhow!("catalog must list at least one item"));
            }
            let mut seen = BTreeSet::new();
            for entry in entries.iter_mut() {
                entry.key = entry.key.trim().to_lowercase();
                if !seen.insert(entry.key.clone()) {
                    return Err(anyhow!("duplicate catalog key '{}'", entry.key));
                }
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TillConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}
