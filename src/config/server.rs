//! Server configuration.
//!
//! Consolidates every tunable of the composite service into a single typed
//! struct. Loaded once at startup from an optional JSON file, then patched by
//! environment overrides and clamped by `validate`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compose::filter_graph::{CompositionMode, CompositionPreset};
use crate::error::{CompositeError, CompositeResult};

/// Largest accepted frame dimension in pixels.
const MAX_DIMENSION: u32 = 8192;

/// Read-chunk bounds for renderer stdout.
const MIN_CHUNK_SIZE: usize = 4 * 1024;
const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Centralized server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to. Port 0 picks a free port.
    pub bind_addr: SocketAddr,

    /// Directory holding the fixed image assets.
    pub assets_dir: PathBuf,

    /// Overlay file name inside `assets_dir`.
    pub overlay_file: String,

    /// Background file name inside `assets_dir` (fixed-offset route).
    pub fixed_background_file: String,

    /// JSON file carrying the inline background (`{ "image": ... }`).
    pub payload_file: PathBuf,

    /// Explicit renderer binary. None = resolve via ffmpeg-sidecar / PATH.
    pub ffmpeg_path: Option<PathBuf>,

    /// Directory for temporary backgrounds. None = system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Cover-crop preset geometry.
    pub cover_crop: CoverCropConfig,

    /// Fixed-offset preset geometry.
    pub fixed_offset: FixedOffsetConfig,

    /// Maximum bytes read from renderer stdout per chunk.
    pub chunk_size: usize,

    /// Chunks buffered between the renderer and the HTTP body.
    pub channel_capacity: usize,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Geometry of the cover-crop preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoverCropConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CoverCropConfig {
    fn default() -> Self {
        Self {
            width: 1020,
            height: 1280,
        }
    }
}

/// Geometry of the fixed-offset preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FixedOffsetConfig {
    /// Overlay width after scaling.
    pub width: u32,
    /// Overlay height after scaling (aspect ratio is not preserved).
    pub height: u32,
    /// Pixels removed from the bottom of the scaled overlay.
    pub crop_bottom: u32,
    /// Vertical offset of the overlay from the top of the background.
    pub top: u32,
}

impl Default for FixedOffsetConfig {
    fn default() -> Self {
        Self {
            width: 1020,
            height: 1280,
            crop_bottom: 80,
            top: 120,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rotated log files. None = console only.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            assets_dir: PathBuf::from("public/images"),
            overlay_file: "passe_trans.png".to_string(),
            fixed_background_file: "background.png".to_string(),
            payload_file: PathBuf::from("public/base64.json"),
            ffmpeg_path: None,
            temp_dir: None,
            cover_crop: CoverCropConfig::default(),
            fixed_offset: FixedOffsetConfig::default(),
            chunk_size: 64 * 1024,
            channel_capacity: 16,
            logging: LoggingConfig::default(),
        }
    }
}

/// Where a loaded config came from. Loading runs before the logger exists,
/// so the caller reports this once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Defaults,
    File(PathBuf),
    MissingFile(PathBuf),
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::Defaults => log::info!("[CONFIG] No config file, using defaults"),
            ConfigSource::File(path) => log::info!("[CONFIG] Loaded {}", path.display()),
            ConfigSource::MissingFile(path) => {
                log::warn!("[CONFIG] {} not found, using defaults", path.display())
            },
        }
    }
}

impl ServerConfig {
    /// Load config from an optional JSON file, then apply environment overrides.
    ///
    /// A missing file falls back to defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> CompositeResult<(Self, ConfigSource)> {
        let (mut config, source) = match path {
            Some(path) => Self::from_file(path)?,
            None => (Self::default(), ConfigSource::Defaults),
        };
        config.apply_env_overrides()?;
        config.validate();
        Ok((config, source))
    }

    fn from_file(path: &Path) -> CompositeResult<(Self, ConfigSource)> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Self::default(), ConfigSource::MissingFile(path.to_path_buf())));
            },
            Err(e) => {
                return Err(CompositeError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            },
        };

        let config = serde_json::from_str(&content).map_err(|e| {
            CompositeError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    fn apply_env_overrides(&mut self) -> CompositeResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup (environment in production).
    fn apply_overrides<F>(&mut self, lookup: F) -> CompositeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("PNGCOMP_BIND") {
            self.bind_addr = bind.parse().map_err(|e| {
                CompositeError::Config(format!("Invalid PNGCOMP_BIND '{}': {}", bind, e))
            })?;
        }
        if let Some(dir) = lookup("PNGCOMP_ASSETS_DIR") {
            self.assets_dir = PathBuf::from(dir);
        }
        if let Some(ffmpeg) = lookup("PNGCOMP_FFMPEG") {
            self.ffmpeg_path = Some(PathBuf::from(ffmpeg));
        }
        if let Some(payload) = lookup("PNGCOMP_PAYLOAD") {
            self.payload_file = PathBuf::from(payload);
        }
        if let Some(temp) = lookup("PNGCOMP_TEMP_DIR") {
            self.temp_dir = Some(PathBuf::from(temp));
        }
        Ok(())
    }

    /// Validate and clamp settings to acceptable ranges.
    pub fn validate(&mut self) {
        self.cover_crop.width = self.cover_crop.width.clamp(1, MAX_DIMENSION);
        self.cover_crop.height = self.cover_crop.height.clamp(1, MAX_DIMENSION);

        let fixed = &mut self.fixed_offset;
        fixed.width = fixed.width.clamp(1, MAX_DIMENSION);
        fixed.height = fixed.height.clamp(1, MAX_DIMENSION);
        fixed.crop_bottom = fixed.crop_bottom.min(fixed.height - 1);
        fixed.top = fixed.top.min(fixed.height - 1);

        self.chunk_size = self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self.channel_capacity = self.channel_capacity.clamp(1, 1024);
    }

    /// Full path of the overlay asset.
    pub fn overlay_path(&self) -> PathBuf {
        self.assets_dir.join(&self.overlay_file)
    }

    /// Full path of the fixed background asset.
    pub fn fixed_background_path(&self) -> PathBuf {
        self.assets_dir.join(&self.fixed_background_file)
    }

    /// Directory temporary backgrounds are written to.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Resolve a preset into concrete composition geometry.
    pub fn mode(&self, preset: CompositionPreset) -> CompositionMode {
        match preset {
            CompositionPreset::Cover => CompositionMode::CoverCrop {
                width: self.cover_crop.width,
                height: self.cover_crop.height,
            },
            CompositionPreset::Fixed => CompositionMode::FixedOffset {
                width: self.fixed_offset.width,
                height: self.fixed_offset.height,
                crop_bottom: self.fixed_offset.crop_bottom,
                top: self.fixed_offset.top,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_cover_preset() {
        let config = ServerConfig::default();
        assert_eq!(
            config.mode(CompositionPreset::Cover),
            CompositionMode::CoverCrop {
                width: 1020,
                height: 1280
            }
        );
        assert_eq!(
            config.overlay_path(),
            PathBuf::from("public/images/passe_trans.png")
        );
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{ "overlayFile": "frame.png", "fixedOffset": { "top": 40 } }"#)
                .unwrap();
        assert_eq!(config.overlay_file, "frame.png");
        assert_eq!(config.fixed_offset.top, 40);
        assert_eq!(config.fixed_offset.width, 1020);
        assert_eq!(config.chunk_size, 64 * 1024);
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = ServerConfig::default();
        config.cover_crop.width = 0;
        config.fixed_offset.height = 100;
        config.fixed_offset.crop_bottom = 500;
        config.chunk_size = 1;
        config.channel_capacity = 0;
        config.validate();

        assert_eq!(config.cover_crop.width, 1);
        assert_eq!(config.fixed_offset.crop_bottom, 99);
        assert_eq!(config.chunk_size, MIN_CHUNK_SIZE);
        assert_eq!(config.channel_capacity, 1);
    }

    #[test]
    fn test_validate_keeps_top_offset_inside_canvas() {
        let mut config = ServerConfig::default();
        config.fixed_offset.height = 200;
        config.fixed_offset.top = 5000;
        config.validate();
        assert_eq!(config.fixed_offset.top, 199);

        let mut config = ServerConfig::default();
        config.validate();
        assert_eq!(config.fixed_offset.top, 120);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PNGCOMP_BIND", "0.0.0.0:8080"),
            ("PNGCOMP_FFMPEG", "/opt/ffmpeg/bin/ffmpeg"),
            ("PNGCOMP_TEMP_DIR", "/var/tmp/pngcomp"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(
            config.ffmpeg_path,
            Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"))
        );
        assert_eq!(config.temp_dir(), PathBuf::from("/var/tmp/pngcomp"));
    }

    #[test]
    fn test_invalid_bind_override() {
        let mut config = ServerConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "PNGCOMP_BIND").then(|| "not-an-address".to_string())
        });
        assert!(matches!(result, Err(CompositeError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let absent = dir.path().join("absent.json");
        let (config, source) = ServerConfig::from_file(&absent).unwrap();
        assert_eq!(config.overlay_file, "passe_trans.png");
        assert_eq!(source, ConfigSource::MissingFile(absent));
    }

    #[test]
    fn test_load_reports_file_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "overlayFile": "frame.png" }"#).unwrap();

        let (config, source) = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.overlay_file, "frame.png");
        assert_eq!(source, ConfigSource::File(path));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(CompositeError::Config(_))
        ));
    }
}
