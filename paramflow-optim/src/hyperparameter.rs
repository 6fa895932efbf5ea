use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use paramflow_core::{ParamFlowError, Tensor, Variable};
use serde::{Deserialize, Serialize};

use crate::schedule::{self, LearningRateSchedule, ScheduleDescriptor};

/// Zero-argument function producing a hyperparameter value.
pub type HyperparameterFn = dyn Fn() -> f64 + Send + Sync;

/// Source of a scalar hyperparameter value.
#[derive(Clone)]
pub enum Hyperparameter {
    Constant(f64),
    /// Mutable scalar state cell.
    Cell(Variable),
    /// Evaluated at the optimizer's step count.
    Schedule(Arc<dyn LearningRateSchedule>),
    Callable(Arc<HyperparameterFn>),
}

impl Hyperparameter {
    pub fn callable(f: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Hyperparameter::Callable(Arc::new(f))
    }

    pub fn schedule(schedule: impl LearningRateSchedule + 'static) -> Self {
        Hyperparameter::Schedule(Arc::new(schedule))
    }
}

impl From<f64> for Hyperparameter {
    fn from(value: f64) -> Self {
        Hyperparameter::Constant(value)
    }
}

impl From<Arc<dyn LearningRateSchedule>> for Hyperparameter {
    fn from(schedule: Arc<dyn LearningRateSchedule>) -> Self {
        Hyperparameter::Schedule(schedule)
    }
}

impl fmt::Debug for Hyperparameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hyperparameter::Constant(v) => write!(f, "Constant({})", v),
            Hyperparameter::Cell(var) => write!(f, "Cell({})", var.name()),
            Hyperparameter::Schedule(s) => write!(f, "Schedule({:?})", s),
            Hyperparameter::Callable(_) => write!(f, "Callable(<fn>)"),
        }
    }
}

/// Persisted form of a hyperparameter.
///
/// Numbers and flags are stored as JSON scalars, schedules as their
/// `{class_name, config}` descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerializedHyperparameter {
    Value(f64),
    Flag(bool),
    Schedule(ScheduleDescriptor),
}

impl SerializedHyperparameter {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SerializedHyperparameter::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SerializedHyperparameter::Flag(b) => Some(*b),
            _ => None,
        }
    }

    /// Rebuilds a hyperparameter; schedules go through the schedule registry.
    ///
    /// # Errors
    /// `ConfigurationError` for a flag or an unknown schedule.
    pub fn to_hyperparameter(&self) -> Result<Hyperparameter, ParamFlowError> {
        match self {
            SerializedHyperparameter::Value(v) => Ok(Hyperparameter::Constant(*v)),
            SerializedHyperparameter::Schedule(descriptor) => {
                Ok(Hyperparameter::Schedule(schedule::deserialize(descriptor)?))
            }
            SerializedHyperparameter::Flag(b) => Err(ParamFlowError::ConfigurationError(format!(
                "boolean {} is not a scalar hyperparameter",
                b
            ))),
        }
    }
}

impl From<f64> for SerializedHyperparameter {
    fn from(value: f64) -> Self {
        SerializedHyperparameter::Value(value)
    }
}

impl From<bool> for SerializedHyperparameter {
    fn from(value: bool) -> Self {
        SerializedHyperparameter::Flag(value)
    }
}

/// Engine hyperparameters by name.
pub type HyperparameterMap = BTreeMap<String, SerializedHyperparameter>;

/// A named, possibly unset, scalar hyperparameter with uniform access.
#[derive(Debug, Clone)]
pub struct HyperparameterCell {
    name: String,
    value: Option<Hyperparameter>,
}

impl HyperparameterCell {
    pub fn new(name: impl Into<String>, value: Option<Hyperparameter>) -> Self {
        HyperparameterCell {
            name: name.into(),
            value,
        }
    }

    pub fn unset(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// A cell whose constants are promoted to a mutable state cell, so the
    /// value can later be changed in place. Schedules and callables are kept.
    pub fn settable(name: impl Into<String>, value: Hyperparameter) -> Self {
        let name = name.into();
        let value = match value {
            Hyperparameter::Constant(v) => Hyperparameter::Cell(state_cell(&name, v)),
            other => other,
        };
        Self::new(name, Some(value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hyperparameter(&self) -> Option<&Hyperparameter> {
        self.value.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_schedule(&self) -> bool {
        matches!(self.value, Some(Hyperparameter::Schedule(_)))
    }

    /// Current value; schedules are evaluated at `step`.
    ///
    /// # Errors
    /// `ConfigurationError` if no value was ever configured.
    pub fn get(&self, step: u64) -> Result<f64, ParamFlowError> {
        match &self.value {
            None => Err(ParamFlowError::ConfigurationError(format!(
                "missing {}; configure it when creating the optimizer",
                self.name
            ))),
            Some(Hyperparameter::Constant(v)) => Ok(*v),
            Some(Hyperparameter::Cell(var)) => var.value()?.item(),
            Some(Hyperparameter::Schedule(s)) => Ok(s.value_at(step)),
            Some(Hyperparameter::Callable(f)) => Ok(f()),
        }
    }

    /// Sets a new value.
    ///
    /// A state cell is assigned in place; a constant, a callable or an unset
    /// cell is replaced by a fresh state cell holding `value`.
    ///
    /// # Errors
    /// `ConfigurationError` if the value comes from a schedule.
    pub fn set(&mut self, value: f64) -> Result<(), ParamFlowError> {
        match &self.value {
            Some(Hyperparameter::Schedule(_)) => Err(ParamFlowError::ConfigurationError(format!(
                "{} was created from a learning rate schedule and is not settable; \
                 create it from a number to change it later",
                self.name
            ))),
            Some(Hyperparameter::Cell(var)) => {
                var.assign(Tensor::from_values(vec![value], Vec::new(), var.dtype())?)
            }
            _ => {
                self.value = Some(Hyperparameter::Cell(state_cell(&self.name, value)));
                Ok(())
            }
        }
    }

    /// Persisted form: schedules as descriptors, every other source as its
    /// current value. `None` when unset.
    pub fn serialize(&self) -> Result<Option<SerializedHyperparameter>, ParamFlowError> {
        match &self.value {
            None => Ok(None),
            Some(Hyperparameter::Schedule(s)) => Ok(Some(SerializedHyperparameter::Schedule(
                schedule::serialize(s.as_ref())?,
            ))),
            Some(_) => Ok(Some(SerializedHyperparameter::Value(self.get(0)?))),
        }
    }
}

fn state_cell(name: &str, value: f64) -> Variable {
    Variable::new(name, Tensor::scalar_f64(value), false)
}

#[cfg(test)]
#[path = "hyperparameter_test.rs"]
mod tests;
