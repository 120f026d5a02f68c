//! Flattening of device JSON payloads into individual readings.
//!
//! Devices publish one JSON object per message. Nested objects are flattened
//! with `_` separators, so `{"sensors": {"LEFT": {"distance": 80}}}` becomes
//! the field `sensors_LEFT_distance`. `deviceId`/`device_id` and `timestamp`
//! are message metadata, not fields.

use crate::bus::{MAX_CLOCK_SKEW, RawValue, Reading};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const DEVICE_ID_KEYS: [&str; 2] = ["deviceId", "device_id"];
const TIMESTAMP_KEY: &str = "timestamp";
const UNKNOWN_DEVICE: &str = "unknown";

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

/// Convert one device message into readings captured at the message timestamp,
/// or at `received_at` when the message carries none.
pub fn flatten_payload(
    payload: &Value,
    received_at: SystemTime,
) -> Result<Vec<Reading>, PayloadError> {
    let object = payload.as_object().ok_or(PayloadError::NotAnObject)?;

    let device_id = DEVICE_ID_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .unwrap_or(UNKNOWN_DEVICE)
        .to_string();

    let captured_at = match object.get(TIMESTAMP_KEY) {
        Some(value) => parse_timestamp(value)?,
        None => received_at,
    };
    if captured_at > received_at + MAX_CLOCK_SKEW {
        return Err(PayloadError::Timestamp(format!(
            "{} is ahead of the server clock",
            object.get(TIMESTAMP_KEY).map_or_else(String::new, Value::to_string)
        )));
    }

    let mut fields = Vec::new();
    collect_fields(object, None, &mut fields);

    Ok(fields
        .into_iter()
        .map(|(field, value)| Reading::new(device_id.clone(), field, value, captured_at))
        .collect())
}

fn collect_fields(object: &Map<String, Value>, prefix: Option<&str>, out: &mut Vec<(String, RawValue)>) {
    for (key, value) in object {
        if prefix.is_none() && (DEVICE_ID_KEYS.contains(&key.as_str()) || key == TIMESTAMP_KEY) {
            continue;
        }
        let name = match prefix {
            Some(prefix) => format!("{prefix}_{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(nested) => collect_fields(nested, Some(&name), out),
            Value::Array(_) => {}
            Value::Null => out.push((name, RawValue::Missing)),
            Value::Bool(flag) => out.push((name, RawValue::Bool(*flag))),
            Value::Number(number) => {
                let raw = match number.as_i64() {
                    Some(integer) => RawValue::Integer(integer),
                    None => number.as_f64().map_or(RawValue::Missing, RawValue::Number),
                };
                out.push((name, raw));
            }
            Value::String(text) => out.push((name, RawValue::Text(text.clone()))),
        }
    }
}

/// RFC 3339 text, or unix milliseconds (integer or fractional).
fn parse_timestamp(value: &Value) -> Result<SystemTime, PayloadError> {
    match value {
        Value::String(text) => OffsetDateTime::parse(text, &Rfc3339)
            .map(SystemTime::from)
            .map_err(|err| PayloadError::Timestamp(format!("{text}: {err}"))),
        Value::Number(number) => number
            .as_f64()
            .and_then(|millis| Duration::try_from_secs_f64(millis / 1000.0).ok())
            .and_then(|since_epoch| SystemTime::UNIX_EPOCH.checked_add(since_epoch))
            .ok_or_else(|| {
                PayloadError::Timestamp(format!("expected unix milliseconds, got {number}"))
            }),
        other => Err(PayloadError::Timestamp(format!("unsupported value: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::UNIX_EPOCH;

    #[test]
    fn nested_sensor_objects_are_flattened() -> Result<(), PayloadError> {
        let payload = json!({
            "deviceId": "esp32-smartstop-01",
            "sensors": {
                "CENTER": {"distance": 120.5, "occupied": true},
                "LEFT": {"distance": 80, "occupied": false}
            },
            "voice": "true"
        });

        let readings = flatten_payload(&payload, UNIX_EPOCH)?;

        let field = |name: &str| readings.iter().find(|r| r.field == name).map(|r| &r.value);
        assert_eq!(field("sensors_CENTER_distance"), Some(&RawValue::Number(120.5)));
        assert_eq!(field("sensors_CENTER_occupied"), Some(&RawValue::Bool(true)));
        assert_eq!(field("sensors_LEFT_distance"), Some(&RawValue::Integer(80)));
        assert_eq!(field("voice"), Some(&RawValue::Text("true".to_string())));
        assert!(readings.iter().all(|r| r.device_id == "esp32-smartstop-01"));
        assert!(field("deviceId").is_none());
        Ok(())
    }

    #[test]
    fn rfc3339_timestamp_sets_capture_time() -> Result<(), PayloadError> {
        let payload = json!({
            "device_id": "ir-01",
            "timestamp": "1970-01-01T00:01:40Z",
            "people_count": 4
        });

        let readings = flatten_payload(&payload, UNIX_EPOCH + Duration::from_secs(200))?;

        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].captured_at, UNIX_EPOCH + Duration::from_secs(100));
        Ok(())
    }

    #[test]
    fn missing_timestamp_uses_receive_time() -> Result<(), PayloadError> {
        let received = UNIX_EPOCH + Duration::from_secs(42);
        let readings = flatten_payload(&json!({"crowd_level": "2_medium", "confidence": null}), received)?;

        assert_eq!(readings.len(), 2);
        assert!(readings.iter().all(|r| r.captured_at == received));
        assert!(readings.iter().all(|r| r.device_id == "unknown"));
        assert!(readings.iter().any(|r| r.value == RawValue::Missing));
        Ok(())
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let result = flatten_payload(&json!([1, 2, 3]), UNIX_EPOCH);
        assert!(matches!(result, Err(PayloadError::NotAnObject)));
    }

    #[test]
    fn malformed_timestamp_is_rejected() {
        let result = flatten_payload(&json!({"timestamp": "yesterday", "voice": "1"}), UNIX_EPOCH);
        assert!(matches!(result, Err(PayloadError::Timestamp(_))));
    }

    #[test]
    fn fractional_millis_timestamp_is_accepted() -> Result<(), PayloadError> {
        let received = UNIX_EPOCH + Duration::from_secs(10);
        let readings = flatten_payload(&json!({"timestamp": 2500.0, "voice": "1"}), received)?;

        assert_eq!(readings[0].captured_at, UNIX_EPOCH + Duration::from_millis(2500));
        Ok(())
    }

    #[test]
    fn negative_numeric_timestamp_names_expected_unit() {
        let result = flatten_payload(&json!({"timestamp": -5, "voice": "1"}), UNIX_EPOCH);
        match result {
            Err(PayloadError::Timestamp(message)) => assert!(message.contains("unix milliseconds")),
            other => panic!("expected timestamp error, got {other:?}"),
        }
    }

    #[test]
    fn timestamp_ahead_of_server_clock_is_rejected() {
        let received = UNIX_EPOCH + Duration::from_secs(100);
        let payload = json!({"timestamp": 99_999_999_999_999u64, "people_count": 3});

        let result = flatten_payload(&payload, received);

        assert!(matches!(result, Err(PayloadError::Timestamp(_))));
    }
}
