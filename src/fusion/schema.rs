//! Fixed, versioned feature schema shared by the fusion engine and predictors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SCHEMA_VERSION: u32 = 1;
pub const CROWD_LEVEL_MAX: u8 = 4;

/// How a field's raw values are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Boolean,
    /// Integer scale `0..=max`, optionally sent as a prefixed label (`"2_medium"`).
    Ordinal { max: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureField {
    #[serde(rename = "density")]
    Density,
    #[serde(rename = "sensors_CENTER_distance")]
    CenterDistance,
    #[serde(rename = "sensors_CENTER_occupied")]
    CenterOccupied,
    #[serde(rename = "sensors_LEFT_distance")]
    LeftDistance,
    #[serde(rename = "sensors_LEFT_occupied")]
    LeftOccupied,
    #[serde(rename = "sensors_RIGHT_distance")]
    RightDistance,
    #[serde(rename = "sensors_RIGHT_occupied")]
    RightOccupied,
    #[serde(rename = "people_count")]
    PeopleCount,
    #[serde(rename = "voice")]
    Voice,
    #[serde(rename = "crowd_level")]
    CrowdLevel,
    #[serde(rename = "confidence")]
    Confidence,
}

impl FeatureField {
    pub const ALL: [FeatureField; 11] = [
        FeatureField::Density,
        FeatureField::CenterDistance,
        FeatureField::CenterOccupied,
        FeatureField::LeftDistance,
        FeatureField::LeftOccupied,
        FeatureField::RightDistance,
        FeatureField::RightOccupied,
        FeatureField::PeopleCount,
        FeatureField::Voice,
        FeatureField::CrowdLevel,
        FeatureField::Confidence,
    ];

    /// Wire name used by devices and the model file.
    pub fn name(self) -> &'static str {
        match self {
            FeatureField::Density => "density",
            FeatureField::CenterDistance => "sensors_CENTER_distance",
            FeatureField::CenterOccupied => "sensors_CENTER_occupied",
            FeatureField::LeftDistance => "sensors_LEFT_distance",
            FeatureField::LeftOccupied => "sensors_LEFT_occupied",
            FeatureField::RightDistance => "sensors_RIGHT_distance",
            FeatureField::RightOccupied => "sensors_RIGHT_occupied",
            FeatureField::PeopleCount => "people_count",
            FeatureField::Voice => "voice",
            FeatureField::CrowdLevel => "crowd_level",
            FeatureField::Confidence => "confidence",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            FeatureField::CenterOccupied
            | FeatureField::LeftOccupied
            | FeatureField::RightOccupied
            | FeatureField::Voice => FieldKind::Boolean,
            FeatureField::CrowdLevel => FieldKind::Ordinal {
                max: CROWD_LEVEL_MAX,
            },
            FeatureField::Density
            | FeatureField::CenterDistance
            | FeatureField::LeftDistance
            | FeatureField::RightDistance
            | FeatureField::PeopleCount
            | FeatureField::Confidence => FieldKind::Numeric,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }
}

impl fmt::Display for FeatureField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| UnknownField(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature field: {0}")]
pub struct UnknownField(pub String);

/// Ordered field set a predictor was trained on.
///
/// Fusion produces exactly these fields in exactly this order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    version: u32,
    fields: Vec<FeatureField>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema has no fields")]
    Empty,
    #[error("field listed twice: {0}")]
    Duplicate(FeatureField),
    #[error(transparent)]
    Unknown(#[from] UnknownField),
}

impl FieldSchema {
    pub fn new(version: u32, fields: Vec<FeatureField>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        for (index, field) in fields.iter().enumerate() {
            if fields[..index].contains(field) {
                return Err(SchemaError::Duplicate(*field));
            }
        }
        Ok(Self { version, fields })
    }

    pub fn from_names<S: AsRef<str>>(version: u32, names: &[S]) -> Result<Self, SchemaError> {
        let fields = names
            .iter()
            .map(|name| name.as_ref().parse::<FeatureField>())
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(version, fields)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fields(&self) -> &[FeatureField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position(&self, field: FeatureField) -> Option<usize> {
        self.fields.iter().position(|f| *f == field)
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self {
            version: DEFAULT_SCHEMA_VERSION,
            fields: FeatureField::ALL.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_name() {
        for field in FeatureField::ALL {
            assert_eq!(FeatureField::from_name(field.name()), Some(field));
        }
        assert_eq!(FeatureField::from_name("humidity"), None);
    }

    #[test]
    fn default_schema_keeps_training_column_order() {
        let schema = FieldSchema::default();
        assert_eq!(schema.version(), DEFAULT_SCHEMA_VERSION);
        assert_eq!(schema.fields()[0], FeatureField::Density);
        assert_eq!(schema.fields()[10], FeatureField::Confidence);
        assert_eq!(schema.position(FeatureField::Voice), Some(8));
    }

    #[test]
    fn schema_rejects_duplicates_and_unknown_names() {
        let duplicate = FieldSchema::from_names(2, &["voice", "voice"]);
        assert_eq!(duplicate, Err(SchemaError::Duplicate(FeatureField::Voice)));

        let unknown = FieldSchema::from_names(2, &["voice", "temperature"]);
        assert!(matches!(unknown, Err(SchemaError::Unknown(_))));

        let empty = FieldSchema::from_names::<&str>(2, &[]);
        assert_eq!(empty, Err(SchemaError::Empty));
    }

    #[test]
    fn occupancy_flags_are_boolean_and_crowd_level_is_ordinal() {
        assert_eq!(FeatureField::LeftOccupied.kind(), FieldKind::Boolean);
        assert_eq!(
            FeatureField::CrowdLevel.kind(),
            FieldKind::Ordinal { max: CROWD_LEVEL_MAX }
        );
        assert_eq!(FeatureField::PeopleCount.kind(), FieldKind::Numeric);
    }
}
