use crate::bus::readings::{DEFAULT_MAX_READINGS, DEFAULT_RETENTION};
use crate::coverage::{
    CoverageMethod, CoverageSettings, DEFAULT_CONTOUR_MIN_AREA, DEFAULT_OBJECT_MIN_AREA,
    DEFAULT_PIXEL_THRESHOLD,
};
use crate::estimation::occupancy::DEFAULT_MAX_CAPACITY;
use crate::estimation::refresh::{DEFAULT_REFRESH_INTERVAL, DEFAULT_REFRESH_TIMEOUT, WindowAnchor};
use crate::fusion::DEFAULT_WINDOW;
use crate::fusion::schema::FeatureField;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub fusion: Option<FusionSection>,
    #[serde(default)]
    pub cache: Option<CacheSection>,
    #[serde(default)]
    pub predictor: Option<PredictorSection>,
    #[serde(default)]
    pub coverage: Option<CoverageSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FusionSection {
    /// Length of the fusion window in seconds (default: 60)
    pub window_secs: Option<u64>,
    /// How long buffered readings are kept (default: 300)
    pub retention_secs: Option<u64>,
    pub max_buffered_readings: Option<usize>,
    pub anchor: Option<WindowAnchor>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSection {
    /// Refresh cadence in seconds (default: 30)
    pub refresh_interval_secs: Option<u64>,
    /// Upper bound on one refresh cycle in seconds (default: 10)
    pub refresh_timeout_secs: Option<u64>,
    /// People count treated as 100% occupancy (default: 30)
    pub max_capacity: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictorSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CoverageSection {
    /// Empty-scene reference image. Coverage is disabled without it.
    pub reference_image: Option<PathBuf>,
    /// Latest camera frame, rewritten by the capture process.
    pub frame_path: Option<PathBuf>,
    /// Feature field the coverage metric is folded into (default: density)
    pub field: Option<FeatureField>,
    pub metric: Option<CoverageMethod>,
    pub pixel_threshold: Option<u8>,
    pub contour_min_area: Option<usize>,
    pub object_min_area: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

fn non_empty(path: Option<&Path>) -> Option<&Path> {
    path.filter(|path| !path.as_os_str().is_empty())
}

impl Config {
    /// Reject values the refresh loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fusion_window().is_zero() {
            return Err(ConfigError::Invalid("fusion.window_secs must be positive".into()));
        }
        if self.refresh_interval().is_zero() {
            return Err(ConfigError::Invalid(
                "cache.refresh_interval_secs must be positive".into(),
            ));
        }
        if self.refresh_timeout().is_zero() {
            return Err(ConfigError::Invalid(
                "cache.refresh_timeout_secs must be positive".into(),
            ));
        }
        let max_capacity = self.max_capacity();
        if !max_capacity.is_finite() || max_capacity <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "cache.max_capacity must be positive, got {max_capacity}"
            )));
        }
        Ok(())
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn fusion_window(&self) -> Duration {
        self.fusion
            .as_ref()
            .and_then(|f| f.window_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WINDOW)
    }

    pub fn retention(&self) -> Duration {
        self.fusion
            .as_ref()
            .and_then(|f| f.retention_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETENTION)
    }

    pub fn max_buffered_readings(&self) -> usize {
        self.fusion
            .as_ref()
            .and_then(|f| f.max_buffered_readings)
            .unwrap_or(DEFAULT_MAX_READINGS)
    }

    pub fn window_anchor(&self) -> WindowAnchor {
        self.fusion
            .as_ref()
            .and_then(|f| f.anchor)
            .unwrap_or_default()
    }

    /// Returns the refresh interval (default: 30 seconds)
    pub fn refresh_interval(&self) -> Duration {
        self.cache
            .as_ref()
            .and_then(|c| c.refresh_interval_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }

    pub fn refresh_timeout(&self) -> Duration {
        self.cache
            .as_ref()
            .and_then(|c| c.refresh_timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REFRESH_TIMEOUT)
    }

    /// Age past which a cached value is reported stale: one interval plus the
    /// longest a refresh may take.
    pub fn stale_after(&self) -> Duration {
        self.refresh_interval() + self.refresh_timeout()
    }

    pub fn max_capacity(&self) -> f64 {
        self.cache
            .as_ref()
            .and_then(|c| c.max_capacity)
            .unwrap_or(DEFAULT_MAX_CAPACITY)
    }

    pub fn predictor_path(&self) -> Option<&Path> {
        non_empty(self.predictor.as_ref()?.path.as_deref())
    }

    pub fn coverage_reference(&self) -> Option<&Path> {
        non_empty(self.coverage.as_ref()?.reference_image.as_deref())
    }

    pub fn coverage_frame(&self) -> Option<&Path> {
        non_empty(self.coverage.as_ref()?.frame_path.as_deref())
    }

    pub fn coverage_field(&self) -> FeatureField {
        self.coverage
            .as_ref()
            .and_then(|c| c.field)
            .unwrap_or(FeatureField::Density)
    }

    pub fn coverage_metric(&self) -> CoverageMethod {
        self.coverage
            .as_ref()
            .and_then(|c| c.metric)
            .unwrap_or(CoverageMethod::Pixel)
    }

    pub fn coverage_settings(&self) -> CoverageSettings {
        let section = self.coverage.as_ref();
        CoverageSettings {
            pixel_threshold: section
                .and_then(|c| c.pixel_threshold)
                .unwrap_or(DEFAULT_PIXEL_THRESHOLD),
            contour_min_area: section
                .and_then(|c| c.contour_min_area)
                .unwrap_or(DEFAULT_CONTOUR_MIN_AREA),
            object_min_area: section
                .and_then(|c| c.object_min_area)
                .unwrap_or(DEFAULT_OBJECT_MIN_AREA),
        }
    }
}
