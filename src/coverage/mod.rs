//! Image coverage estimation against a fixed empty-scene reference.
//!
//! Three independent methods run on the grayscale difference between the
//! reference and a test frame:
//! - pixel: share of pixels whose difference exceeds a fixed threshold
//! - contour: area of the significant outer blobs of the cleaned change mask
//! - object: blobs of a locally adaptive threshold, each with area and box

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

pub mod contours;
pub mod feed;
pub mod morphology;

use contours::{BoundingBox, external_blobs};
use morphology::{Mask, close, open};

pub const DEFAULT_PIXEL_THRESHOLD: u8 = 30;
pub const DEFAULT_CONTOUR_MIN_AREA: usize = 100;
pub const DEFAULT_OBJECT_MIN_AREA: usize = 200;

const CONTOUR_KERNEL: usize = 5;
const OBJECT_KERNEL: usize = 3;
const OBJECT_CLOSE_ITERATIONS: usize = 2;
const ADAPTIVE_BLOCK: usize = 11;
const ADAPTIVE_OFFSET: f64 = 2.0;
/// Differences below this never count as an object pixel, whatever the local mean.
const ADAPTIVE_MIN_CONTRAST: u8 = 15;

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("unreadable reference image: {0}")]
    Reference(#[source] image::ImageError),
    #[error("reference image has no pixels")]
    EmptyReference,
    #[error("unreadable test image: {0}")]
    TestImage(#[source] image::ImageError),
    #[error("no frame available: {0}")]
    NoFrame(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageMethod {
    Pixel,
    Contour,
    Object,
}

impl fmt::Display for CoverageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoverageMethod::Pixel => "pixel",
            CoverageMethod::Contour => "contour",
            CoverageMethod::Object => "object",
        };
        f.write_str(name)
    }
}

impl FromStr for CoverageMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pixel" => Ok(CoverageMethod::Pixel),
            "contour" => Ok(CoverageMethod::Contour),
            "object" => Ok(CoverageMethod::Object),
            other => Err(format!("unknown coverage method: {other}")),
        }
    }
}

/// Which methods a call to [`CoverageEstimator::analyze`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageMethods {
    pub pixel: bool,
    pub contour: bool,
    pub object: bool,
}

impl CoverageMethods {
    pub const ALL: CoverageMethods = CoverageMethods {
        pixel: true,
        contour: true,
        object: true,
    };

    pub fn only(method: CoverageMethod) -> Self {
        Self {
            pixel: method == CoverageMethod::Pixel,
            contour: method == CoverageMethod::Contour,
            object: method == CoverageMethod::Object,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageSettings {
    pub pixel_threshold: u8,
    pub contour_min_area: usize,
    pub object_min_area: usize,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            contour_min_area: DEFAULT_CONTOUR_MIN_AREA,
            object_min_area: DEFAULT_OBJECT_MIN_AREA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PixelCoverage {
    pub changed_pixels: usize,
    pub total_pixels: usize,
    pub coverage_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContourCoverage {
    pub total_contours: usize,
    pub significant_contours: usize,
    pub covered_pixels: usize,
    pub coverage_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedObject {
    pub area: usize,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectCoverage {
    pub objects: Vec<DetectedObject>,
    pub coverage_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageResult {
    pub width: u32,
    pub height: u32,
    pub pixel: Option<PixelCoverage>,
    pub contour: Option<ContourCoverage>,
    pub objects: Option<ObjectCoverage>,
}

impl CoverageResult {
    pub fn pixel_coverage_pct(&self) -> Option<f64> {
        self.pixel.as_ref().map(|p| p.coverage_pct)
    }

    pub fn contour_coverage_pct(&self) -> Option<f64> {
        self.contour.as_ref().map(|c| c.coverage_pct)
    }

    pub fn object_count(&self) -> Option<usize> {
        self.objects.as_ref().map(|o| o.objects.len())
    }

    pub fn object_areas(&self) -> Option<Vec<usize>> {
        self.objects
            .as_ref()
            .map(|o| o.objects.iter().map(|object| object.area).collect())
    }

    /// Scalar signal for one method: a percentage, or the object count.
    pub fn metric(&self, method: CoverageMethod) -> Option<f64> {
        match method {
            CoverageMethod::Pixel => self.pixel_coverage_pct(),
            CoverageMethod::Contour => self.contour_coverage_pct(),
            CoverageMethod::Object => self.object_count().map(|count| count as f64),
        }
    }

    /// Flat record for logs and telemetry, values rounded to 2 decimals.
    pub fn to_record(&self) -> BTreeMap<String, f64> {
        let mut record = BTreeMap::new();
        if let Some(pixel) = &self.pixel {
            record.insert("pixel_coverage_pct".to_string(), round2(pixel.coverage_pct));
            record.insert("pixel_changed".to_string(), pixel.changed_pixels as f64);
        }
        if let Some(contour) = &self.contour {
            record.insert(
                "contour_coverage_pct".to_string(),
                round2(contour.coverage_pct),
            );
            record.insert(
                "contour_count".to_string(),
                contour.significant_contours as f64,
            );
        }
        if let Some(objects) = &self.objects {
            record.insert("object_count".to_string(), objects.objects.len() as f64);
            record.insert(
                "object_coverage_pct".to_string(),
                round2(objects.coverage_pct),
            );
        }
        record
    }
}

/// Compares frames against an empty-scene reference captured once at startup.
#[derive(Debug, Clone)]
pub struct CoverageEstimator {
    reference: GrayImage,
    settings: CoverageSettings,
}

impl CoverageEstimator {
    pub fn new(reference: &DynamicImage, settings: CoverageSettings) -> Result<Self, CoverageError> {
        let reference = reference.to_luma8();
        if reference.width() == 0 || reference.height() == 0 {
            return Err(CoverageError::EmptyReference);
        }
        Ok(Self {
            reference,
            settings,
        })
    }

    pub fn from_path(path: impl AsRef<Path>, settings: CoverageSettings) -> Result<Self, CoverageError> {
        let image = image::open(path).map_err(CoverageError::Reference)?;
        Self::new(&image, settings)
    }

    pub fn from_bytes(bytes: &[u8], settings: CoverageSettings) -> Result<Self, CoverageError> {
        let image = image::load_from_memory(bytes).map_err(CoverageError::Reference)?;
        Self::new(&image, settings)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.reference.dimensions()
    }

    pub fn settings(&self) -> &CoverageSettings {
        &self.settings
    }

    pub fn analyze_path(
        &self,
        path: impl AsRef<Path>,
        methods: CoverageMethods,
    ) -> Result<CoverageResult, CoverageError> {
        let image = image::open(path).map_err(CoverageError::TestImage)?;
        Ok(self.analyze(&image, methods))
    }

    pub fn analyze_bytes(
        &self,
        bytes: &[u8],
        methods: CoverageMethods,
    ) -> Result<CoverageResult, CoverageError> {
        let image = image::load_from_memory(bytes).map_err(CoverageError::TestImage)?;
        Ok(self.analyze(&image, methods))
    }

    pub fn analyze(&self, test: &DynamicImage, methods: CoverageMethods) -> CoverageResult {
        let (width, height) = self.reference.dimensions();
        let mut test = test.to_luma8();
        if test.dimensions() != (width, height) {
            debug!(
                from_width = test.width(),
                from_height = test.height(),
                width,
                height,
                "Resizing test image to reference resolution"
            );
            test = imageops::resize(&test, width, height, FilterType::Triangle);
        }
        let diff = DiffMap::new(&self.reference, &test);

        let changed = diff.threshold(self.settings.pixel_threshold);
        let pixel = methods.pixel.then(|| pixel_coverage(&changed));
        let contour = methods
            .contour
            .then(|| contour_coverage(&changed, self.settings.contour_min_area));
        let objects = methods
            .object
            .then(|| object_coverage(&diff, self.settings.object_min_area));

        CoverageResult {
            width,
            height,
            pixel,
            contour,
            objects,
        }
    }
}

struct DiffMap {
    width: usize,
    height: usize,
    values: Vec<u8>,
}

impl DiffMap {
    fn new(reference: &GrayImage, test: &GrayImage) -> Self {
        let values = reference
            .as_raw()
            .iter()
            .zip(test.as_raw())
            .map(|(a, b)| a.abs_diff(*b))
            .collect();
        Self {
            width: reference.width() as usize,
            height: reference.height() as usize,
            values,
        }
    }

    fn at(&self, x: usize, y: usize) -> u8 {
        self.values[y * self.width + x]
    }

    fn threshold(&self, threshold: u8) -> Mask {
        Mask::from_fn(self.width, self.height, |x, y| self.at(x, y) > threshold)
    }

    /// Foreground where a pixel beats its `block`-square neighbourhood mean
    /// less `offset`, restricted to pixels with real contrast.
    fn adaptive_threshold(&self, block: usize, offset: f64, min_contrast: u8) -> Mask {
        let integral = self.integral();
        let stride = self.width + 1;
        let radius = block / 2;
        Mask::from_fn(self.width, self.height, |x, y| {
            let value = self.at(x, y);
            if value < min_contrast {
                return false;
            }
            let (x0, y0) = (x.saturating_sub(radius), y.saturating_sub(radius));
            let (x1, y1) = (
                (x + radius + 1).min(self.width),
                (y + radius + 1).min(self.height),
            );
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            f64::from(value) > sum as f64 / count - offset
        })
    }

    fn integral(&self) -> Vec<u64> {
        let stride = self.width + 1;
        let mut table = vec![0u64; stride * (self.height + 1)];
        for y in 0..self.height {
            let mut row = 0u64;
            for x in 0..self.width {
                row += u64::from(self.at(x, y));
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
            }
        }
        table
    }
}

fn pixel_coverage(changed: &Mask) -> PixelCoverage {
    let changed_pixels = changed.count();
    let total_pixels = changed.len();
    PixelCoverage {
        changed_pixels,
        total_pixels,
        coverage_pct: percent(changed_pixels, total_pixels),
    }
}

fn contour_coverage(changed: &Mask, min_area: usize) -> ContourCoverage {
    let cleaned = open(&close(changed, CONTOUR_KERNEL, 1), CONTOUR_KERNEL, 1);
    let blobs = external_blobs(&cleaned);
    let significant: Vec<_> = blobs.iter().filter(|blob| blob.area >= min_area).collect();
    let covered_pixels: usize = significant.iter().map(|blob| blob.area).sum();
    ContourCoverage {
        total_contours: blobs.len(),
        significant_contours: significant.len(),
        covered_pixels,
        coverage_pct: percent(covered_pixels, cleaned.len()),
    }
}

fn object_coverage(diff: &DiffMap, min_area: usize) -> ObjectCoverage {
    let mask = diff.adaptive_threshold(ADAPTIVE_BLOCK, ADAPTIVE_OFFSET, ADAPTIVE_MIN_CONTRAST);
    let cleaned = open(
        &close(&mask, OBJECT_KERNEL, OBJECT_CLOSE_ITERATIONS),
        OBJECT_KERNEL,
        1,
    );
    let objects: Vec<DetectedObject> = external_blobs(&cleaned)
        .into_iter()
        .filter(|blob| blob.area >= min_area)
        .map(|blob| DetectedObject {
            area: blob.area,
            bbox: blob.bbox,
        })
        .collect();
    let covered: usize = objects.iter().map(|object| object.area).sum();
    ObjectCoverage {
        coverage_pct: percent(covered, cleaned.len()),
        objects,
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 * 100.0 / total as f64).min(100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
