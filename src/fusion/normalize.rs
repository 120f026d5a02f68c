//! Conversion of heterogeneous raw device values into one numeric form.
//!
//! Normalization never fails: anything that cannot be understood becomes
//! [`SENTINEL`], so one malformed field never blocks fusion of the others.

use crate::bus::RawValue;
use crate::fusion::schema::{FeatureField, FieldKind};

/// "No data" marker. Valid sensor ranges are non-negative, so it cannot be
/// confused with a real zero reading.
pub const SENTINEL: f64 = -1.0;

const LEVEL_WORDS: [&str; 5] = ["empty", "low", "medium", "high", "full"];
const LABEL_SEPARATORS: [char; 3] = ['_', '-', ' '];

pub fn is_sentinel(value: f64) -> bool {
    value == SENTINEL
}

/// Normalize a raw value for a field by wire name. Unknown fields are numeric.
pub fn normalize(field_name: &str, raw: &RawValue) -> f64 {
    let kind = FeatureField::from_name(field_name)
        .map(FeatureField::kind)
        .unwrap_or(FieldKind::Numeric);
    normalize_kind(kind, raw)
}

pub fn normalize_kind(kind: FieldKind, raw: &RawValue) -> f64 {
    match kind {
        FieldKind::Numeric => normalize_numeric(raw),
        FieldKind::Boolean => normalize_boolean(raw),
        FieldKind::Ordinal { max } => normalize_ordinal(raw, max),
    }
}

fn normalize_numeric(raw: &RawValue) -> f64 {
    let value = match raw {
        RawValue::Number(value) => *value,
        RawValue::Integer(value) => *value as f64,
        RawValue::Bool(flag) => bool_value(*flag),
        RawValue::Text(text) => match text.trim().parse::<f64>() {
            Ok(value) => value,
            Err(_) => return SENTINEL,
        },
        RawValue::Missing => return SENTINEL,
    };
    if value.is_finite() { value } else { SENTINEL }
}

fn normalize_boolean(raw: &RawValue) -> f64 {
    match raw {
        RawValue::Bool(flag) => bool_value(*flag),
        RawValue::Integer(0) => 0.0,
        RawValue::Integer(1) => 1.0,
        RawValue::Number(value) if *value == 0.0 || *value == 1.0 => *value,
        RawValue::Text(text) => {
            let text = text.trim();
            if text.eq_ignore_ascii_case("true") || text == "1" {
                1.0
            } else if text.eq_ignore_ascii_case("false") || text == "0" {
                0.0
            } else {
                SENTINEL
            }
        }
        _ => SENTINEL,
    }
}

fn normalize_ordinal(raw: &RawValue, max: u8) -> f64 {
    let level = match raw {
        RawValue::Integer(value) => Some(*value),
        RawValue::Number(value) if value.is_finite() && value.fract() == 0.0 => {
            Some(*value as i64)
        }
        RawValue::Text(text) => parse_level_label(text),
        _ => None,
    };
    match level {
        Some(level) if (0..=i64::from(max)).contains(&level) => level as f64,
        _ => SENTINEL,
    }
}

/// Extract the level from `"2"`, `"2_medium"`, `"3-HIGH"` or a bare level word.
fn parse_level_label(text: &str) -> Option<i64> {
    let lowered = text.trim().to_ascii_lowercase();
    let token = lowered
        .split(LABEL_SEPARATORS)
        .next()
        .filter(|token| !token.is_empty())?;
    if let Ok(level) = token.parse::<i64>() {
        return Some(level);
    }
    LEVEL_WORDS
        .iter()
        .position(|word| *word == lowered)
        .map(|index| index as i64)
}

fn bool_value(flag: bool) -> f64 {
    if flag { 1.0 } else { 0.0 }
}
