use crate::error::AppError;
use crate::fusion::FusionWindow;
use std::time::{Duration, SystemTime};

pub mod payload;
pub mod readings;

pub type DeviceId = String;

/// How far ahead of the local clock a capture time may be before it is
/// treated as a bad device clock.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Raw value as delivered by a device, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
    Missing,
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Integer(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

/// One field-keyed observation from one device.
///
/// `sequence` is the ingestion order assigned by the collector and breaks ties
/// between readings captured at the same instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: DeviceId,
    pub field: String,
    pub value: RawValue,
    pub captured_at: SystemTime,
    pub sequence: u64,
}

impl Reading {
    pub fn new(
        device_id: impl Into<DeviceId>,
        field: impl Into<String>,
        value: impl Into<RawValue>,
        captured_at: SystemTime,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            field: field.into(),
            value: value.into(),
            captured_at,
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }
}

/// Anything that can hand the fusion engine a snapshot of readings for a window.
pub trait ReadingSource: Send + Sync + std::fmt::Debug {
    fn snapshot(&self, window: &FusionWindow) -> Result<Vec<Reading>, AppError>;

    /// Capture time of the newest reading held by the source, if any.
    fn latest_captured_at(&self) -> Result<Option<SystemTime>, AppError>;
}
