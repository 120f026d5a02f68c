//! Folds a coverage metric into fusion as a synthetic reading.

use crate::bus::{RawValue, Reading};
use crate::coverage::{CoverageError, CoverageEstimator, CoverageMethod, CoverageMethods};
use crate::fusion::schema::FeatureField;
use image::DynamicImage;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

pub const COVERAGE_DEVICE_ID: &str = "coverage-estimator";

/// A camera frame and the time it was captured.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at: SystemTime,
}

/// Supplies the most recent camera frame.
pub trait FrameSource: Send + Sync + fmt::Debug {
    fn latest_frame(&self) -> Result<Frame, CoverageError>;
}

/// Frame written to a fixed path by an external capture process.
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    path: PathBuf,
}

impl FileFrameSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FrameSource for FileFrameSource {
    /// The capture time is the file's modification time.
    fn latest_frame(&self) -> Result<Frame, CoverageError> {
        let captured_at = std::fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .map_err(|err| CoverageError::NoFrame(format!("{}: {err}", self.path.display())))?;
        let image = image::open(&self.path).map_err(CoverageError::TestImage)?;
        Ok(Frame { image, captured_at })
    }
}

#[derive(Debug, Clone)]
pub struct CoverageFeed {
    estimator: Arc<CoverageEstimator>,
    frames: Arc<dyn FrameSource>,
    metric: CoverageMethod,
    field: FeatureField,
}

impl CoverageFeed {
    pub fn new(
        estimator: Arc<CoverageEstimator>,
        frames: Arc<dyn FrameSource>,
        metric: CoverageMethod,
        field: FeatureField,
    ) -> Self {
        Self {
            estimator,
            frames,
            metric,
            field,
        }
    }

    pub fn field(&self) -> FeatureField {
        self.field
    }

    /// Analyze the latest frame and turn the configured metric into a reading
    /// stamped with the frame's capture time, never later than `now`. An old
    /// frame therefore falls out of the fusion window like any stale reading.
    pub fn sample(&self, now: SystemTime) -> Result<Reading, CoverageError> {
        let frame = self.frames.latest_frame()?;
        let result = self
            .estimator
            .analyze(&frame.image, CoverageMethods::only(self.metric));
        debug!(record = ?result.to_record(), "Coverage frame analyzed");
        let value = result
            .metric(self.metric)
            .map_or(RawValue::Missing, RawValue::Number);
        Ok(Reading::new(
            COVERAGE_DEVICE_ID,
            self.field.name(),
            value,
            frame.captured_at.min(now),
        ))
    }
}
