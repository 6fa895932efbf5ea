//! Learning rate schedules.
//!
//! A schedule maps the optimizer's step count to a learning rate. Schedules
//! are persisted as a `{class_name, config}` descriptor and rebuilt through a
//! registry keyed by class name. The built-in schedules are always
//! registered; others can be added with [`register_schedule`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use log::warn;
use paramflow_core::ParamFlowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A learning rate as a function of the step count.
pub trait LearningRateSchedule: Send + Sync + fmt::Debug {
    /// Learning rate at `step` (the number of steps already applied).
    fn value_at(&self, step: u64) -> f64;

    /// Name under which the schedule is registered.
    fn class_name(&self) -> &str;

    /// Serializable configuration, accepted back by the registered deserializer.
    fn config(&self) -> Result<Value, ParamFlowError>;
}

/// Persisted form of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDescriptor {
    pub class_name: String,
    pub config: Value,
}

/// Rebuilds a schedule from its configuration.
pub type ScheduleDeserializer = fn(&Value) -> Result<Arc<dyn LearningRateSchedule>, ParamFlowError>;

fn registry() -> &'static RwLock<HashMap<String, ScheduleDeserializer>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, ScheduleDeserializer>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut builtin: HashMap<String, ScheduleDeserializer> = HashMap::new();
        builtin.insert("ExponentialDecay".to_string(), exponential_decay);
        builtin.insert("PiecewiseConstantDecay".to_string(), piecewise_constant_decay);
        RwLock::new(builtin)
    })
}

fn exponential_decay(config: &Value) -> Result<Arc<dyn LearningRateSchedule>, ParamFlowError> {
    Ok(Arc::new(ExponentialDecay::from_config(config)?))
}

fn piecewise_constant_decay(config: &Value) -> Result<Arc<dyn LearningRateSchedule>, ParamFlowError> {
    Ok(Arc::new(PiecewiseConstantDecay::from_config(config)?))
}

/// Registers (or replaces) the deserializer used for `class_name`.
pub fn register_schedule(class_name: &str, deserializer: ScheduleDeserializer) {
    let mut map = registry().write().unwrap_or_else(|poisoned| {
        warn!("schedule registry lock was poisoned, recovering");
        poisoned.into_inner()
    });
    map.insert(class_name.to_string(), deserializer);
}

/// Descriptor of `schedule`.
pub fn serialize(schedule: &dyn LearningRateSchedule) -> Result<ScheduleDescriptor, ParamFlowError> {
    Ok(ScheduleDescriptor {
        class_name: schedule.class_name().to_string(),
        config: schedule.config()?,
    })
}

/// Rebuilds a schedule from its descriptor.
///
/// # Errors
/// `ConfigurationError` for an unregistered class name or an invalid config.
pub fn deserialize(
    descriptor: &ScheduleDescriptor,
) -> Result<Arc<dyn LearningRateSchedule>, ParamFlowError> {
    let deserializer = {
        let map = registry().read().unwrap_or_else(|poisoned| {
            warn!("schedule registry lock was poisoned, recovering");
            poisoned.into_inner()
        });
        map.get(&descriptor.class_name).copied()
    };
    match deserializer {
        Some(f) => f(&descriptor.config),
        None => Err(ParamFlowError::ConfigurationError(format!(
            "unknown learning rate schedule '{}'",
            descriptor.class_name
        ))),
    }
}

fn parse_config<T: for<'de> Deserialize<'de>>(class_name: &str, config: &Value) -> Result<T, ParamFlowError> {
    serde_json::from_value(config.clone()).map_err(|e| {
        ParamFlowError::ConfigurationError(format!("invalid {} config: {}", class_name, e))
    })
}

fn to_config<T: Serialize>(schedule: &T) -> Result<Value, ParamFlowError> {
    serde_json::to_value(schedule).map_err(|e| ParamFlowError::SerializationError(e.to_string()))
}

/// `initial_learning_rate * decay_rate ^ (step / decay_steps)`.
///
/// With `staircase` the exponent is floored, so the rate drops every
/// `decay_steps` steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ExponentialDecayConfig")]
pub struct ExponentialDecay {
    initial_learning_rate: f64,
    decay_steps: u64,
    decay_rate: f64,
    staircase: bool,
}

#[derive(Deserialize)]
struct ExponentialDecayConfig {
    initial_learning_rate: f64,
    decay_steps: u64,
    decay_rate: f64,
    #[serde(default)]
    staircase: bool,
}

impl TryFrom<ExponentialDecayConfig> for ExponentialDecay {
    type Error = ParamFlowError;

    fn try_from(c: ExponentialDecayConfig) -> Result<Self, Self::Error> {
        ExponentialDecay::new(c.initial_learning_rate, c.decay_steps, c.decay_rate, c.staircase)
    }
}

impl ExponentialDecay {
    /// # Errors
    /// `ConfigurationError` if `decay_steps` is 0.
    pub fn new(
        initial_learning_rate: f64,
        decay_steps: u64,
        decay_rate: f64,
        staircase: bool,
    ) -> Result<Self, ParamFlowError> {
        let schedule = ExponentialDecay {
            initial_learning_rate,
            decay_steps,
            decay_rate,
            staircase,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    fn validate(&self) -> Result<(), ParamFlowError> {
        if self.decay_steps == 0 {
            return Err(ParamFlowError::ConfigurationError(
                "ExponentialDecay: decay_steps must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_config(config: &Value) -> Result<Self, ParamFlowError> {
        parse_config("ExponentialDecay", config)
    }
}

impl LearningRateSchedule for ExponentialDecay {
    fn value_at(&self, step: u64) -> f64 {
        let mut exponent = step as f64 / self.decay_steps as f64;
        if self.staircase {
            exponent = exponent.floor();
        }
        self.initial_learning_rate * self.decay_rate.powf(exponent)
    }

    fn class_name(&self) -> &str {
        "ExponentialDecay"
    }

    fn config(&self) -> Result<Value, ParamFlowError> {
        to_config(self)
    }
}

/// Piecewise constant rate: `values[0]` up to and including `boundaries[0]`,
/// `values[i]` on `(boundaries[i - 1], boundaries[i]]`, and the last value
/// after the last boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PiecewiseConstantDecayConfig")]
pub struct PiecewiseConstantDecay {
    boundaries: Vec<u64>,
    values: Vec<f64>,
}

#[derive(Deserialize)]
struct PiecewiseConstantDecayConfig {
    boundaries: Vec<u64>,
    values: Vec<f64>,
}

impl TryFrom<PiecewiseConstantDecayConfig> for PiecewiseConstantDecay {
    type Error = ParamFlowError;

    fn try_from(c: PiecewiseConstantDecayConfig) -> Result<Self, Self::Error> {
        PiecewiseConstantDecay::new(c.boundaries, c.values)
    }
}

impl PiecewiseConstantDecay {
    /// # Errors
    /// `ConfigurationError` unless there is exactly one more value than
    /// boundaries and the boundaries are strictly increasing.
    pub fn new(boundaries: Vec<u64>, values: Vec<f64>) -> Result<Self, ParamFlowError> {
        let schedule = PiecewiseConstantDecay { boundaries, values };
        schedule.validate()?;
        Ok(schedule)
    }

    fn validate(&self) -> Result<(), ParamFlowError> {
        if self.values.len() != self.boundaries.len() + 1 {
            return Err(ParamFlowError::ConfigurationError(format!(
                "PiecewiseConstantDecay: expected {} values for {} boundaries, got {}",
                self.boundaries.len() + 1,
                self.boundaries.len(),
                self.values.len()
            )));
        }
        if self.boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ParamFlowError::ConfigurationError(
                "PiecewiseConstantDecay: boundaries must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_config(config: &Value) -> Result<Self, ParamFlowError> {
        parse_config("PiecewiseConstantDecay", config)
    }
}

impl LearningRateSchedule for PiecewiseConstantDecay {
    fn value_at(&self, step: u64) -> f64 {
        let segment = self.boundaries.iter().filter(|&&b| step > b).count();
        match self.values.get(segment).or_else(|| self.values.last()) {
            Some(value) => *value,
            None => 0.0,
        }
    }

    fn class_name(&self) -> &str {
        "PiecewiseConstantDecay"
    }

    fn config(&self) -> Result<Value, ParamFlowError> {
        to_config(self)
    }
}

#[cfg(test)]
#[path = "schedule_test.rs"]
mod tests;
