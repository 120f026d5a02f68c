use crate::estimation::model::{PredictError, Predictor, check_schema};
use crate::fusion::FeatureVector;
use crate::fusion::schema::FieldSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

const API_VERSION: &str = "1.0";

/// Model served over HTTP. Posts the fused features as JSON and expects
/// `{"capacity": <number>}` back.
pub struct RemotePredictor {
    endpoint: String,
    timeout: Duration,
    model_id: String,
    params: serde_json::Value,
    schema: FieldSchema,
    fallback: Option<Box<dyn Predictor>>,
}

impl RemotePredictor {
    pub fn new(
        endpoint: String,
        timeout: Duration,
        model_id: String,
        params: serde_json::Value,
        schema: FieldSchema,
        fallback: Option<Box<dyn Predictor>>,
    ) -> Self {
        Self {
            endpoint,
            timeout,
            model_id,
            params,
            schema,
            fallback,
        }
    }

    fn call_remote(&self, features: &FeatureVector) -> Result<f64, RemoteError> {
        let request = PredictRequest::new(&self.model_id, &self.params, features, SystemTime::now())?;
        let payload = serde_json::to_string(&request)?;
        let body = send_http_json(&self.endpoint, &payload, self.timeout)?;
        let response: PredictResponse = serde_json::from_str(&body)?;
        Ok(response.capacity)
    }
}

impl fmt::Debug for RemotePredictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotePredictor")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("model_id", &self.model_id)
            .field("schema_version", &self.schema.version())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Predictor for RemotePredictor {
    fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, PredictError> {
        check_schema(&self.schema, features)?;
        match self.call_remote(features) {
            Ok(capacity) => Ok(capacity),
            Err(err) => {
                warn!(error = %err, endpoint = %self.endpoint, "Remote predictor call failed");
                match self.fallback.as_ref() {
                    Some(fallback) => {
                        warn!("Falling back to local model");
                        fallback.predict(features)
                    }
                    None => Err(PredictError::Remote(err.to_string())),
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    api_version: &'static str,
    model_id: &'a str,
    params: &'a serde_json::Value,
    schema_version: u32,
    timestamp: String,
    features: Vec<RemoteFeature>,
}

impl<'a> PredictRequest<'a> {
    fn new(
        model_id: &'a str,
        params: &'a serde_json::Value,
        features: &FeatureVector,
        timestamp: SystemTime,
    ) -> Result<Self, RemoteError> {
        let timestamp = OffsetDateTime::from(timestamp).format(&Rfc3339)?;
        Ok(Self {
            api_version: API_VERSION,
            model_id,
            params,
            schema_version: features.schema_version(),
            timestamp,
            features: features
                .iter()
                .map(|(field, value)| RemoteFeature {
                    name: field.name(),
                    value,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Serialize)]
struct RemoteFeature {
    name: &'static str,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    capacity: f64,
}

#[derive(Debug, Error)]
enum RemoteError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("dns error: {0}")]
    Dns(String),
    #[error("connect error: {0}")]
    Connect(#[source] std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http status {0} ({1})")]
    Http(u16, String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timestamp error: {0}")]
    Timestamp(#[from] time::error::Format),
}

struct ParsedUrl {
    host: String,
    port: u16,
    path: String,
}

fn parse_http_url(endpoint: &str) -> Result<ParsedUrl, RemoteError> {
    let trimmed = endpoint
        .strip_prefix("http://")
        .ok_or_else(|| RemoteError::InvalidUrl("only http:// supported".to_string()))?;

    let (host_port, path) = match trimmed.split_once('/') {
        Some((host_port, path)) => (host_port, format!("/{path}")),
        None => (trimmed, "/".to_string()),
    };
    if host_port.is_empty() {
        return Err(RemoteError::InvalidUrl("missing host".to_string()));
    }

    let (host, port) = match host_port.split_once(':') {
        Some((host, port)) if !port.is_empty() => (
            host,
            port.parse::<u16>()
                .map_err(|_| RemoteError::InvalidUrl("invalid port".to_string()))?,
        ),
        Some((host, _)) => (host, 80),
        None => (host_port, 80),
    };
    if host.is_empty() {
        return Err(RemoteError::InvalidUrl("missing host".to_string()));
    }

    Ok(ParsedUrl {
        host: host.to_string(),
        port,
        path,
    })
}

fn send_http_json(endpoint: &str, body: &str, timeout: Duration) -> Result<String, RemoteError> {
    let parsed = parse_http_url(endpoint)?;
    let addr = (parsed.host.as_str(), parsed.port)
        .to_socket_addrs()
        .map_err(|err| RemoteError::Dns(err.to_string()))?
        .next()
        .ok_or_else(|| RemoteError::Dns("no addresses resolved".to_string()))?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(RemoteError::Connect)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let request = format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        parsed.path,
        parsed.host,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes())?;

    let mut response = String::new();
    stream.read_to_string(&mut response)?;

    let (headers, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| RemoteError::Http(0, "invalid http response".to_string()))?;
    let status_code = headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| RemoteError::Http(0, "missing status code".to_string()))?;

    if status_code >= 400 {
        return Err(RemoteError::Http(status_code, body.trim().to_string()));
    }
    Ok(body.to_string())
}
