//! Linear capacity model.
//!
//! Formula: capacity = intercept + Σ weight[field] * value[field]
//!
//! Fields whose value is the sentinel contribute nothing, so a missing
//! `voice` reading does not subtract its weight.

use crate::estimation::model::{PredictError, Predictor, check_schema};
use crate::fusion::FeatureVector;
use crate::fusion::normalize::is_sentinel;
use crate::fusion::schema::{FeatureField, FieldSchema};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
pub struct LinearParams {
    pub intercept: f64,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    pub min_capacity: Option<f64>,
    pub max_capacity: Option<f64>,
}

impl Default for LinearParams {
    fn default() -> Self {
        let weights = [
            (FeatureField::PeopleCount, 1.0),
            (FeatureField::Density, 0.1),
            (FeatureField::CrowdLevel, 2.0),
        ]
        .into_iter()
        .map(|(field, weight)| (field.name().to_string(), weight))
        .collect();
        Self {
            intercept: 0.0,
            weights,
            min_capacity: Some(0.0),
            max_capacity: None,
        }
    }
}

#[derive(Debug)]
pub struct LinearPredictor {
    schema: FieldSchema,
    intercept: f64,
    weights: Vec<f64>,
    min_capacity: Option<f64>,
    max_capacity: Option<f64>,
}

impl LinearPredictor {
    /// Build a model over `schema`. Every weight must name a schema field.
    pub fn new(params: LinearParams, schema: FieldSchema) -> Result<Self, String> {
        let weights = weight_vector(&params.weights, &schema)?;
        if let (Some(min), Some(max)) = (params.min_capacity, params.max_capacity)
            && min > max
        {
            return Err(format!("min_capacity {min} exceeds max_capacity {max}"));
        }
        Ok(Self {
            schema,
            intercept: params.intercept,
            weights,
            min_capacity: params.min_capacity,
            max_capacity: params.max_capacity,
        })
    }

    pub fn with_defaults() -> Self {
        let params = LinearParams::default();
        let schema = FieldSchema::default();
        let weights =
            weight_vector(&params.weights, &schema).unwrap_or_else(|_| vec![0.0; schema.len()]);
        Self {
            schema,
            intercept: params.intercept,
            weights,
            min_capacity: params.min_capacity,
            max_capacity: params.max_capacity,
        }
    }
}

fn weight_vector(weights: &BTreeMap<String, f64>, schema: &FieldSchema) -> Result<Vec<f64>, String> {
    let mut out = vec![0.0; schema.len()];
    for (name, weight) in weights {
        let index = FeatureField::from_name(name)
            .and_then(|field| schema.position(field))
            .ok_or_else(|| format!("weight for field outside schema: {name}"))?;
        if !weight.is_finite() {
            return Err(format!("weight for {name} is not finite"));
        }
        out[index] = *weight;
    }
    Ok(out)
}

impl Predictor for LinearPredictor {
    fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, PredictError> {
        check_schema(&self.schema, features)?;

        let mut capacity = self.intercept;
        for (value, weight) in features.values().iter().zip(&self.weights) {
            if !is_sentinel(*value) {
                capacity += weight * value;
            }
        }

        // Apply bounds
        if let Some(min) = self.min_capacity {
            capacity = capacity.max(min);
        }
        if let Some(max) = self.max_capacity {
            capacity = capacity.min(max);
        }
        Ok(capacity)
    }
}
