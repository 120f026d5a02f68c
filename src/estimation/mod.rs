use crate::fusion::schema::{DEFAULT_SCHEMA_VERSION, FieldSchema, SchemaError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub mod linear;
pub mod model;
pub mod occupancy;
pub mod refresh;
pub mod remote;

use linear::{LinearParams, LinearPredictor};
use model::Predictor;
use remote::RemotePredictor;

pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 2000;

/// Contents of the model file.
#[derive(Debug, Deserialize)]
pub struct ModelFile {
    pub model: String,
    pub schema_version: Option<u32>,
    /// Training column order. Defaults to the full field set.
    pub fields: Option<Vec<String>>,
    pub params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RemoteParams {
    endpoint: String,
    timeout_ms: Option<u64>,
    model_id: String,
    #[serde(default)]
    params: serde_json::Value,
    fallback: Option<LinearParams>,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("failed to read model file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid model: {0}")]
    Invalid(String),
}

impl From<SchemaError> for CalibrationError {
    fn from(err: SchemaError) -> Self {
        CalibrationError::Invalid(err.to_string())
    }
}

// Model Factory
pub fn create_predictor(config: &ModelFile) -> Result<Box<dyn Predictor>, CalibrationError> {
    let version = config.schema_version.unwrap_or(DEFAULT_SCHEMA_VERSION);
    let schema = match &config.fields {
        Some(fields) => FieldSchema::from_names(version, fields.as_slice())?,
        None => FieldSchema::new(version, FieldSchema::default().fields().to_vec())?,
    };

    match config.model.as_str() {
        "linear" => {
            let params: LinearParams = serde_json::from_value(config.params.clone())?;
            let model = LinearPredictor::new(params, schema).map_err(CalibrationError::Invalid)?;
            Ok(Box::new(model))
        }
        "remote" => {
            let params: RemoteParams = serde_json::from_value(config.params.clone())?;
            let fallback = match params.fallback {
                Some(fallback) => {
                    let model = LinearPredictor::new(fallback, schema.clone())
                        .map_err(CalibrationError::Invalid)?;
                    Some(Box::new(model) as Box<dyn Predictor>)
                }
                None => None,
            };
            let timeout =
                Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_REMOTE_TIMEOUT_MS));
            Ok(Box::new(RemotePredictor::new(
                params.endpoint,
                timeout,
                params.model_id,
                params.params,
                schema,
                fallback,
            )))
        }
        other => Err(CalibrationError::Invalid(format!("unknown model: {other}"))),
    }
}

pub fn load_predictor_from_path(
    path: impl AsRef<Path>,
) -> Result<Box<dyn Predictor>, CalibrationError> {
    let contents = std::fs::read_to_string(path)?;
    let config: ModelFile = serde_json::from_str(&contents)?;
    create_predictor(&config)
}

/// Load the configured model, or the built-in linear model when there is no
/// usable file.
pub fn load_predictor_or_default(path: Option<&Path>) -> Box<dyn Predictor> {
    let Some(path) = path else {
        warn!("No model file configured, using default linear model");
        return Box::new(LinearPredictor::with_defaults());
    };
    match load_predictor_from_path(path) {
        Ok(predictor) => {
            info!(path = %path.display(), ?predictor, "Loaded predictor");
            predictor
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to load model file, using default linear model");
            Box::new(LinearPredictor::with_defaults())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn model_file(json: &str) -> Result<ModelFile, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[test]
    fn linear_model_uses_declared_schema() -> Result<(), Box<dyn std::error::Error>> {
        let config = model_file(
            r#"{
                "model": "linear",
                "schema_version": 3,
                "fields": ["people_count", "crowd_level"],
                "params": {"intercept": 1.0, "weights": {"people_count": 1.0}}
            }"#,
        )?;

        let predictor = create_predictor(&config)?;

        assert_eq!(predictor.schema().version(), 3);
        assert_eq!(predictor.schema().len(), 2);
        Ok(())
    }

    #[test]
    fn remote_model_builds_with_fallback() -> Result<(), Box<dyn std::error::Error>> {
        let config = model_file(
            r#"{
                "model": "remote",
                "params": {
                    "endpoint": "http://127.0.0.1:9/predict",
                    "model_id": "crowd-v3",
                    "fallback": {"intercept": 0.0, "weights": {"people_count": 1.0}}
                }
            }"#,
        )?;

        let predictor = create_predictor(&config)?;

        assert_eq!(predictor.schema(), &FieldSchema::default());
        Ok(())
    }

    #[test]
    fn unknown_model_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let config = model_file(r#"{"model": "random_forest", "params": {}}"#)?;
        assert!(matches!(
            create_predictor(&config),
            Err(CalibrationError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn unknown_field_in_schema_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let config = model_file(
            r#"{"model": "linear", "fields": ["humidity"], "params": {"intercept": 0.0}}"#,
        )?;
        assert!(matches!(
            create_predictor(&config),
            Err(CalibrationError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn missing_file_returns_read_error() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("smartstop-model-missing-{unique}.json"));

        assert!(matches!(
            load_predictor_from_path(&path),
            Err(CalibrationError::Read(_))
        ));
        // The service still gets a usable model.
        assert_eq!(
            load_predictor_or_default(Some(path.as_path())).schema(),
            &FieldSchema::default()
        );
    }

    #[test]
    fn bundled_model_file_loads() -> Result<(), Box<dyn std::error::Error>> {
        let predictor = load_predictor_from_path("config/model.json")?;
        assert!(!predictor.schema().is_empty());
        Ok(())
    }

    #[test]
    fn broken_file_returns_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let path = std::env::temp_dir().join(format!("smartstop-model-broken-{unique}.json"));
        fs::write(&path, "{ not json")?;

        let result = load_predictor_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(CalibrationError::Parse(_))));
        Ok(())
    }
}
