//! Predictor contract for capacity estimation.
//!
//! Predictors are selected via the `model` field of the model file and loaded
//! at startup. Each one declares the schema it was trained on; fusion builds
//! feature vectors for exactly that schema.

use crate::fusion::FeatureVector;
use crate::fusion::schema::FieldSchema;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("feature schema v{got} does not match predictor schema v{expected}")]
    SchemaMismatch { expected: u32, got: u32 },
    #[error("remote predictor failed: {0}")]
    Remote(String),
    #[error("predictor rejected input: {0}")]
    Rejected(String),
}

/// Maps a fused feature vector to a capacity estimate.
///
/// Sentinel values reach the predictor unchanged; how a model treats missing
/// fields is part of the model.
pub trait Predictor: Send + Sync + std::fmt::Debug {
    fn schema(&self) -> &FieldSchema;

    fn predict(&self, features: &FeatureVector) -> Result<f64, PredictError>;
}

pub(crate) fn check_schema(schema: &FieldSchema, features: &FeatureVector) -> Result<(), PredictError> {
    if features.schema_version() != schema.version() || features.fields() != schema.fields() {
        return Err(PredictError::SchemaMismatch {
            expected: schema.version(),
            got: features.schema_version(),
        });
    }
    Ok(())
}
