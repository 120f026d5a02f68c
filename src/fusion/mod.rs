//! Window fusion: one feature vector from many devices' readings.
//!
//! For every field of the schema, the most recent reading in the window whose
//! normalized value is not the sentinel wins. Fields are resolved
//! independently, so one device can supply `voice` while another supplies
//! `people_count`. No averaging and no device priority.

use crate::bus::{DeviceId, Reading};
use serde::Serialize;
use std::cmp::Ordering;
use std::time::{Duration, SystemTime};

pub mod normalize;
pub mod schema;

use normalize::{SENTINEL, is_sentinel, normalize_kind};
use schema::{FeatureField, FieldSchema};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Closed interval `[end - duration, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionWindow {
    pub end: SystemTime,
    pub duration: Duration,
}

impl FusionWindow {
    pub fn new(end: SystemTime, duration: Duration) -> Self {
        Self { end, duration }
    }

    pub fn start(&self) -> SystemTime {
        self.end
            .checked_sub(self.duration)
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    pub fn contains(&self, timestamp: SystemTime) -> bool {
        timestamp >= self.start() && timestamp <= self.end
    }
}

/// Normalized values in schema order. Only fusion builds these, so the field
/// set always matches the schema it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    schema_version: u32,
    fields: Vec<FeatureField>,
    values: Vec<f64>,
}

impl FeatureVector {
    fn all_sentinel(schema: &FieldSchema) -> Self {
        Self {
            schema_version: schema.version(),
            fields: schema.fields().to_vec(),
            values: vec![SENTINEL; schema.len()],
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn fields(&self) -> &[FeatureField] {
        &self.fields
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, field: FeatureField) -> Option<f64> {
        self.fields
            .iter()
            .position(|f| *f == field)
            .map(|index| self.values[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureField, f64)> + '_ {
        self.fields.iter().copied().zip(self.values.iter().copied())
    }

    pub fn observed_count(&self) -> usize {
        self.values.iter().filter(|v| !is_sentinel(**v)).count()
    }

    pub fn is_all_sentinel(&self) -> bool {
        self.observed_count() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionDiagnostics {
    pub empty_window: bool,
    pub readings_in_window: usize,
    pub readings_outside_window: usize,
    pub missing_fields: Vec<FeatureField>,
    /// Device that supplied each resolved field.
    pub sources: Vec<(FeatureField, DeviceId)>,
    pub latest_captured_at: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fusion {
    pub features: FeatureVector,
    pub diagnostics: FusionDiagnostics,
}

/// Fuse readings into one vector for `schema`. Total over any input.
pub fn fuse(readings: &[Reading], window: &FusionWindow, schema: &FieldSchema) -> Fusion {
    let mut candidates: Vec<&Reading> = readings
        .iter()
        .filter(|reading| window.contains(reading.captured_at))
        .collect();
    let mut features = FeatureVector::all_sentinel(schema);
    let mut diagnostics = FusionDiagnostics {
        readings_in_window: candidates.len(),
        readings_outside_window: readings.len() - candidates.len(),
        ..FusionDiagnostics::default()
    };

    if candidates.is_empty() {
        diagnostics.empty_window = true;
        diagnostics.missing_fields = schema.fields().to_vec();
        return Fusion {
            features,
            diagnostics,
        };
    }

    candidates.sort_by(|a, b| newest_first(a, b));
    diagnostics.latest_captured_at = candidates.first().map(|r| r.captured_at);

    let mut resolved = vec![false; schema.len()];
    let mut remaining = schema.len();
    for reading in candidates {
        if remaining == 0 {
            break;
        }
        let Some(field) = FeatureField::from_name(&reading.field) else {
            continue;
        };
        let Some(index) = schema.position(field) else {
            continue;
        };
        if resolved[index] {
            continue;
        }
        let value = normalize_kind(field.kind(), &reading.value);
        if is_sentinel(value) {
            continue;
        }
        features.values[index] = value;
        resolved[index] = true;
        remaining -= 1;
        diagnostics.sources.push((field, reading.device_id.clone()));
    }

    diagnostics.missing_fields = schema
        .fields()
        .iter()
        .zip(&resolved)
        .filter(|(_, resolved)| !**resolved)
        .map(|(field, _)| *field)
        .collect();

    Fusion {
        features,
        diagnostics,
    }
}

fn newest_first(a: &Reading, b: &Reading) -> Ordering {
    b.captured_at
        .cmp(&a.captured_at)
        .then_with(|| b.sequence.cmp(&a.sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RawValue;
    use std::time::UNIX_EPOCH;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn window_0_60() -> FusionWindow {
        FusionWindow::new(at(60), Duration::from_secs(60))
    }

    fn reading(device: &str, field: &str, value: impl Into<RawValue>, secs: u64) -> Reading {
        Reading::new(device, field, value, at(secs))
    }

    fn schema(fields: &[FeatureField]) -> FieldSchema {
        FieldSchema::new(1, fields.to_vec()).expect("valid schema")
    }

    #[test]
    fn sentinel_does_not_override_earlier_value() {
        let readings = vec![
            reading("ir-01", "people_count", 5.0, 10),
            reading("ir-01", "people_count", SENTINEL, 50),
            reading("cam", "density", 7.0, 30),
        ];

        let fusion = fuse(
            &readings,
            &window_0_60(),
            &schema(&[FeatureField::PeopleCount]),
        );

        assert_eq!(fusion.features.get(FeatureField::PeopleCount), Some(5.0));
        assert!(!fusion.diagnostics.empty_window);
        assert!(fusion.diagnostics.missing_fields.is_empty());
    }

    #[test]
    fn latest_valid_value_wins_not_average() {
        let readings = vec![
            reading("a", "density", 1.0, 5),
            reading("b", "density", 9.0, 40),
            reading("c", "density", 4.0, 20),
        ];

        let fusion = fuse(&readings, &window_0_60(), &schema(&[FeatureField::Density]));

        assert_eq!(fusion.features.get(FeatureField::Density), Some(9.0));
        assert_eq!(
            fusion.diagnostics.sources,
            vec![(FeatureField::Density, "b".to_string())]
        );
    }

    #[test]
    fn fields_resolve_independently_across_devices() {
        let readings = vec![
            reading("mic", "voice", "true", 55),
            reading("ir-01", "people_count", 3.0, 12),
            reading("cam", "crowd_level", "2_medium", 30),
            reading("cam", "voice", "garbage", 59),
        ];
        let schema = schema(&[
            FeatureField::PeopleCount,
            FeatureField::Voice,
            FeatureField::CrowdLevel,
            FeatureField::Confidence,
        ]);

        let fusion = fuse(&readings, &window_0_60(), &schema);

        assert_eq!(fusion.features.values(), &[3.0, 1.0, 2.0, SENTINEL]);
        assert_eq!(fusion.diagnostics.missing_fields, vec![FeatureField::Confidence]);
    }

    #[test]
    fn empty_window_yields_all_sentinel_vector() {
        let readings = vec![reading("ir-01", "people_count", 5.0, 120)];
        let schema = FieldSchema::default();

        let fusion = fuse(&readings, &window_0_60(), &schema);

        assert!(fusion.diagnostics.empty_window);
        assert!(fusion.features.is_all_sentinel());
        assert_eq!(fusion.features.values().len(), schema.len());
        assert_eq!(fusion.diagnostics.readings_outside_window, 1);
    }

    #[test]
    fn window_is_closed_on_both_ends() {
        let readings = vec![
            reading("a", "density", 1.0, 0),
            reading("b", "people_count", 2.0, 60),
        ];
        let schema = schema(&[FeatureField::Density, FeatureField::PeopleCount]);

        let fusion = fuse(&readings, &window_0_60(), &schema);

        assert_eq!(fusion.features.values(), &[1.0, 2.0]);
    }

    #[test]
    fn equal_timestamps_prefer_later_ingestion() {
        let readings = vec![
            reading("a", "density", 1.0, 30).with_sequence(7),
            reading("b", "density", 2.0, 30).with_sequence(3),
        ];

        let fusion = fuse(&readings, &window_0_60(), &schema(&[FeatureField::Density]));

        assert_eq!(fusion.features.get(FeatureField::Density), Some(1.0));
    }

    #[test]
    fn unknown_fields_and_fields_outside_schema_are_ignored() {
        let readings = vec![
            reading("weather", "humidity", 80.0, 10),
            reading("cam", "confidence", 0.9, 10),
        ];

        let fusion = fuse(&readings, &window_0_60(), &schema(&[FeatureField::Density]));

        assert_eq!(fusion.features.fields(), &[FeatureField::Density]);
        assert_eq!(fusion.features.get(FeatureField::Density), Some(SENTINEL));
        assert_eq!(fusion.features.get(FeatureField::Confidence), None);
    }

    #[test]
    fn any_valid_reading_prevents_sentinel_output() {
        // Every permutation of a valid reading among explicit no-data readings.
        for valid_at in [5u64, 25, 45] {
            let mut readings: Vec<Reading> = [0u64, 20, 40, 59]
                .iter()
                .map(|secs| reading("x", "people_count", RawValue::Missing, *secs))
                .collect();
            readings.push(reading("y", "people_count", 4.0, valid_at));

            let fusion = fuse(
                &readings,
                &window_0_60(),
                &schema(&[FeatureField::PeopleCount]),
            );

            assert_eq!(fusion.features.get(FeatureField::PeopleCount), Some(4.0));
        }
    }
}
