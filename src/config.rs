//! Runtime configuration for the feedd demo daemon.
//!
//! Sources, in order of precedence: `FEED_*` environment variables, then the
//! JSON config file named by `FEED_CONFIG`, then built-in defaults.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::source::{BackendPreference, OpenOptions, SourceTarget};

const DEFAULT_SOURCE: &str = "stub://live";
const DEFAULT_STATS_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct FeedConfigFile {
    source: Option<String>,
    capture: Option<CaptureConfigFile>,
    stats: Option<StatsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
    fourcc: Option<String>,
    backend: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StatsConfigFile {
    seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Device index, path, or stub:// URI.
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub fourcc: String,
    pub backend: BackendPreference,
    pub stats_interval: Duration,
}

impl FeedConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FEED_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FeedConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let capture = file.capture.unwrap_or_default();
        let backend = capture
            .backend
            .as_deref()
            .unwrap_or("")
            .parse::<BackendPreference>()?;
        let stats_interval = Duration::from_secs(
            file.stats
                .and_then(|stats| stats.seconds)
                .unwrap_or(DEFAULT_STATS_SECS),
        );
        Ok(Self {
            source,
            width: capture.width.unwrap_or(0),
            height: capture.height.unwrap_or(0),
            fps: capture.fps.unwrap_or(0.0),
            fourcc: capture.fourcc.unwrap_or_default(),
            backend,
            stats_interval,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("FEED_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(width) = std::env::var("FEED_WIDTH") {
            self.width = width
                .parse()
                .map_err(|_| anyhow!("FEED_WIDTH must be an integer pixel count"))?;
        }
        if let Ok(height) = std::env::var("FEED_HEIGHT") {
            self.height = height
                .parse()
                .map_err(|_| anyhow!("FEED_HEIGHT must be an integer pixel count"))?;
        }
        if let Ok(fps) = std::env::var("FEED_FPS") {
            self.fps = fps
                .parse()
                .map_err(|_| anyhow!("FEED_FPS must be a frame rate"))?;
        }
        if let Ok(fourcc) = std::env::var("FEED_FOURCC") {
            self.fourcc = fourcc.trim().to_string();
        }
        if let Ok(backend) = std::env::var("FEED_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Ok(secs) = std::env::var("FEED_STATS_SECS") {
            let seconds: u64 = secs
                .parse()
                .map_err(|_| anyhow!("FEED_STATS_SECS must be an integer number of seconds"))?;
            self.stats_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(anyhow!("capture source must not be empty"));
        }
        if !self.fourcc.is_empty() && self.fourcc.len() != 4 {
            return Err(anyhow!(
                "fourcc '{}' must be empty or exactly four characters",
                self.fourcc
            ));
        }
        if self.fps < 0.0 {
            return Err(anyhow!("fps must not be negative"));
        }
        if self.stats_interval.as_secs() == 0 {
            return Err(anyhow!("stats interval must be greater than zero"));
        }
        Ok(())
    }

    pub fn target(&self) -> SourceTarget {
        SourceTarget::parse(&self.source)
    }

    pub fn open_options(&self) -> OpenOptions {
        OpenOptions {
            width: self.width,
            height: self.height,
            fps: self.fps,
            fourcc: self.fourcc.clone(),
            backend: self.backend,
        }
    }
}

fn read_config_file(path: &Path) -> Result<FeedConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
