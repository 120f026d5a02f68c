use crate::api::ApiState;
use crate::api::responses::{
    CapacityErrorCode, CapacityErrorResponse, CapacitySuccessResponse, HealthErrorCode,
    HealthErrorResponse, HealthStatus, HealthSuccessResponse, ReadingsErrorCode,
    ReadingsErrorResponse, ReadingsSuccessResponse,
};
use crate::bus::Reading;
use crate::bus::payload::{PayloadError, flatten_payload};
use crate::cache::{CachedPrediction, NO_DATA_MESSAGE};
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, SystemTime};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

pub enum CapacityResponse {
    Success(CapacitySuccessResponse),
    Error {
        status: StatusCode,
        body: CapacityErrorResponse,
    },
}

impl IntoResponse for CapacityResponse {
    fn into_response(self) -> Response {
        match self {
            CapacityResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            CapacityResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_capacity(State(state): State<ApiState>) -> impl IntoResponse {
    build_capacity_response(state.cache.read(), SystemTime::now(), state.stale_after)
}

pub enum HealthResponse {
    Success {
        status: StatusCode,
        body: HealthSuccessResponse,
    },
    Error {
        status: StatusCode,
        body: HealthErrorResponse,
    },
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        match self {
            HealthResponse::Success { status, body } => (status, Json(body)).into_response(),
            HealthResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    build_health_response(&state, SystemTime::now())
}

pub enum ReadingsResponse {
    Success(ReadingsSuccessResponse),
    Error {
        status: StatusCode,
        body: ReadingsErrorResponse,
    },
}

impl IntoResponse for ReadingsResponse {
    fn into_response(self) -> Response {
        match self {
            ReadingsResponse::Success(body) => (StatusCode::ACCEPTED, Json(body)).into_response(),
            ReadingsResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn post_readings(
    State(state): State<ApiState>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    build_readings_response(&state, &payload, SystemTime::now())
}

fn build_capacity_response(
    cached: CachedPrediction,
    now: SystemTime,
    stale_after: Duration,
) -> CapacityResponse {
    let stale = cached.is_stale(now, stale_after);
    let message = cached.message().to_string();
    let (Some(capacity), Some(computed_at)) = (cached.capacity, cached.computed_at) else {
        return no_data_response(now, cached.error_reason);
    };
    if !capacity.is_finite() || capacity < 0.0 {
        return internal_error("cached capacity is invalid");
    }
    let Some(occupancy) = cached.occupancy else {
        return internal_error("cached capacity has no occupancy");
    };

    match (format_timestamp(computed_at), format_timestamp(now)) {
        (Ok(computed_at), Ok(timestamp)) => CapacityResponse::Success(CapacitySuccessResponse {
            capacity,
            occupancy_percent: occupancy.percent,
            occupancy_level: occupancy.band,
            success: cached.success,
            message,
            error_reason: cached.error_reason,
            stale,
            computed_at,
            timestamp,
        }),
        _ => internal_error("timestamp formatting failure"),
    }
}

fn no_data_response(timestamp: SystemTime, error_reason: Option<String>) -> CapacityResponse {
    match format_timestamp(timestamp) {
        Ok(formatted) => CapacityResponse::Error {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: CapacityErrorResponse {
                error_code: CapacityErrorCode::NoData,
                error_message: NO_DATA_MESSAGE.to_string(),
                error_reason,
                timestamp: formatted,
            },
        },
        Err(_err) => internal_error("timestamp formatting failure"),
    }
}

fn internal_error(message: &str) -> CapacityResponse {
    error!(message = message, "Internal error while handling /api/capacity");
    CapacityResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: CapacityErrorResponse {
            error_code: CapacityErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            error_reason: None,
            timestamp: fallback_timestamp(),
        },
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

fn fallback_timestamp() -> String {
    format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format error timestamp");
        "1970-01-01T00:00:00Z".to_string()
    })
}

fn build_health_response(state: &ApiState, now: SystemTime) -> HealthResponse {
    let buffered_readings = match state.buffer.len() {
        Ok(len) => len,
        Err(err) => {
            return health_internal_error(&err.to_string());
        }
    };
    let cached = state.cache.read();
    let status = derive_health_status(&cached, now, state.stale_after);

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => {
            return health_internal_error("timestamp formatting failure");
        }
    };
    let last_attempt_at = cached
        .last_attempt_at
        .and_then(|at| format_timestamp(at).ok());

    let status_code = match status {
        HealthStatus::Ko => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
    };

    HealthResponse::Success {
        status: status_code,
        body: HealthSuccessResponse {
            status,
            cache_phase: cached.phase,
            buffered_readings,
            last_attempt_at,
            timestamp,
        },
    }
}

fn derive_health_status(cached: &CachedPrediction, now: SystemTime, stale_after: Duration) -> HealthStatus {
    if !cached.has_value() {
        HealthStatus::Ko
    } else if !cached.success || cached.is_stale(now, stale_after) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    }
}

fn health_internal_error(message: &str) -> HealthResponse {
    error!(message = message, "Internal error while handling /api/health");
    HealthResponse::Error {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: HealthErrorResponse {
            error_code: HealthErrorCode::InternalError,
            error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            timestamp: fallback_timestamp(),
        },
    }
}

fn build_readings_response(state: &ApiState, payload: &Value, now: SystemTime) -> ReadingsResponse {
    let readings = match payload_readings(payload, now) {
        Ok(readings) => readings,
        Err(err) => {
            warn!(error = %err, "Rejected device payload");
            return readings_error(StatusCode::BAD_REQUEST, ReadingsErrorCode::InvalidPayload, err.to_string());
        }
    };

    let accepted = match state.buffer.ingest_batch(readings) {
        Ok(count) => count,
        Err(err) => {
            error!(error = %err, "Internal error while handling /api/readings");
            return readings_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                ReadingsErrorCode::InternalError,
                INTERNAL_ERROR_MESSAGE.to_string(),
            );
        }
    };
    debug!(accepted, "Ingested device readings");

    ReadingsResponse::Success(ReadingsSuccessResponse {
        accepted,
        timestamp: format_timestamp(now).unwrap_or_else(|_| fallback_timestamp()),
    })
}

/// One message object, or an array of them.
fn payload_readings(payload: &Value, now: SystemTime) -> Result<Vec<Reading>, PayloadError> {
    match payload {
        Value::Array(messages) => {
            let mut readings = Vec::new();
            for message in messages {
                readings.extend(flatten_payload(message, now)?);
            }
            Ok(readings)
        }
        message => flatten_payload(message, now),
    }
}

fn readings_error(status: StatusCode, error_code: ReadingsErrorCode, error_message: String) -> ReadingsResponse {
    ReadingsResponse::Error {
        status,
        body: ReadingsErrorResponse {
            error_code,
            error_message,
            timestamp: fallback_timestamp(),
        },
    }
}
