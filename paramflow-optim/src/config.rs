use paramflow_core::ParamFlowError;
use serde::{Deserialize, Serialize};

use crate::grad_clipping::ClipConfig;
use crate::hyperparameter::{HyperparameterMap, SerializedHyperparameter};

/// Persisted configuration of an optimizer.
///
/// Holds hyperparameters only, never slot values. Engine hyperparameters
/// are flattened next to the base keys:
///
/// ```json
/// {"name": "SGD", "clipnorm": null, "global_clipnorm": 1.0, "clipvalue": null,
///  "learning_rate": 0.01, "momentum": 0.9, "nesterov": false}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub name: String,
    #[serde(default)]
    pub clipnorm: Option<f64>,
    #[serde(default)]
    pub global_clipnorm: Option<f64>,
    #[serde(default)]
    pub clipvalue: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<SerializedHyperparameter>,
    #[serde(flatten)]
    pub hyperparameters: HyperparameterMap,
}

impl OptimizerConfig {
    pub fn clip_config(&self) -> ClipConfig {
        ClipConfig {
            clipnorm: self.clipnorm,
            global_clipnorm: self.global_clipnorm,
            clipvalue: self.clipvalue,
        }
    }

    pub fn to_json(&self) -> Result<String, ParamFlowError> {
        serde_json::to_string(self).map_err(|e| ParamFlowError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ParamFlowError> {
        serde_json::from_str(json).map_err(|e| ParamFlowError::SerializationError(e.to_string()))
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
