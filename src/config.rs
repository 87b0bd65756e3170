//! Feed configuration
//!
//! Stored as JSON. Every field has a default, so a partial file (or no
//! file at all) is valid. A handful of environment variables override
//! the file for paths that differ between machines.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::export::print::{PageGeometry, PagePreset, PrintJob, ScaleMode};
use crate::state::feed::DEFAULT_DECODE_SIZE;

pub const ENV_STORAGE_DIR: &str = "FILMSTRIP_STORAGE_DIR";
pub const ENV_DATABASE: &str = "FILMSTRIP_DATABASE";
pub const ENV_FFPROBE: &str = "FFPROBE_PATH";
pub const ENV_FFMPEG: &str = "FFMPEG_PATH";

/// All settings for the feed, the decode pool and the print utility
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    /// Managed storage directory; only assets under it are shown
    pub storage_dir: PathBuf,

    /// Location of the SQLite catalog
    pub database_path: PathBuf,

    /// Decode bound used until a consumer suggests a size
    pub default_decode_size: u32,

    /// Background jobs allowed to run at once
    pub max_workers: usize,

    /// Idle decode buffers kept for reuse
    pub scratch_buffers: usize,

    /// Timestamp of the fallback frame for videos without a cover picture
    pub video_frame_time_ms: u64,

    pub ffprobe_path: PathBuf,
    pub ffmpeg_path: PathBuf,

    pub print: PrintConfig,
}

/// Page setup for the print utility
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PrintConfig {
    pub page: PagePreset,
    pub scale_mode: ScaleMode,
    /// Margin on every side, in points
    pub margin_pt: f32,
    /// JPEG quality of the embedded page image (1-100)
    pub jpeg_quality: u8,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            page: PagePreset::A4,
            scale_mode: ScaleMode::Fill,
            margin_pt: 18.0,
            jpeg_quality: 90,
        }
    }
}

impl PrintConfig {
    pub fn job(&self) -> PrintJob {
        PrintJob {
            page: PageGeometry::from_preset(self.page, self.margin_pt),
            mode: self.scale_mode,
            jpeg_quality: self.jpeg_quality,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_path: default_database_path(),
            default_decode_size: DEFAULT_DECODE_SIZE,
            max_workers: 4,
            scratch_buffers: 4,
            video_frame_time_ms: 0,
            ffprobe_path: PathBuf::from("ffprobe"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            print: PrintConfig::default(),
        }
    }
}

/// `<Pictures>/Camera`, falling back to the home directory
pub fn default_storage_dir() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_default()
        .join("Camera")
}

/// `<data dir>/filmstrip/catalog.db`
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filmstrip")
        .join("catalog.db")
}

/// `<config dir>/filmstrip/config.json`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filmstrip")
        .join("config.json")
}

impl FeedConfig {
    /// Convert to a pretty JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Read the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(json) => {
                debug!(path = %path.display(), "config loaded");
                Ok(Self::from_json(&json)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var_os(key).map(PathBuf::from));
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<PathBuf>) {
        let targets: [(&str, &mut PathBuf); 4] = [
            (ENV_STORAGE_DIR, &mut self.storage_dir),
            (ENV_DATABASE, &mut self.database_path),
            (ENV_FFPROBE, &mut self.ffprobe_path),
            (ENV_FFMPEG, &mut self.ffmpeg_path),
        ];
        for (key, target) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.as_os_str().is_empty()) {
                debug!(key, value = %value.display(), "environment override");
                *target = value;
            }
        }
    }

    /// Reject values the feed cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(invalid("max_workers", "must be at least 1"));
        }
        if self.default_decode_size == 0 {
            return Err(invalid("default_decode_size", "must be at least 1"));
        }
        if !(1..=100).contains(&self.print.jpeg_quality) {
            return Err(invalid("print.jpeg_quality", "must be between 1 and 100"));
        }
        if !self.print.margin_pt.is_finite() || self.print.margin_pt < 0.0 {
            return Err(invalid("print.margin_pt", "must be a non-negative number"));
        }
        Ok(())
    }

    pub fn video_frame_time(&self) -> Duration {
        Duration::from_millis(self.video_frame_time_ms)
    }

    /// The storage directory as the prefix catalog paths are matched against
    pub fn storage_prefix(&self) -> String {
        let mut prefix = self.storage_dir.to_string_lossy().to_string();
        if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
            prefix.push(std::path::MAIN_SEPARATOR);
        }
        prefix
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
