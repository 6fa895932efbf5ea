use std::collections::HashMap;

use log::trace;
use paramflow_core::{ParamFlowError, Tensor, Variable};

use crate::hyperparameter::{HyperparameterMap, SerializedHyperparameter};
use crate::state_store::StateStore;
use crate::update_engine::{StepContext, UpdateEngine};
use crate::var_key::{key_of, VariableKey};

/// Stochastic gradient descent with optional (Nesterov) momentum.
///
/// Without momentum: `w = w - lr * g`.
/// With momentum `m`, the velocity slot `v` starts at zero and
/// `v = m * v - lr * g`, then `w = w + v`, or `w = w + m * v - lr * g`
/// with Nesterov momentum.
#[derive(Debug)]
pub struct Sgd {
    momentum: f64,
    nesterov: bool,
    momentums: HashMap<VariableKey, Variable>,
}

impl Sgd {
    /// # Errors
    /// `ConfigurationError` if `momentum` is outside `[0, 1]`.
    pub fn new(momentum: f64, nesterov: bool) -> Result<Self, ParamFlowError> {
        if !(0.0..=1.0).contains(&momentum) {
            return Err(ParamFlowError::ConfigurationError(format!(
                "SGD momentum must be in [0, 1], got {}",
                momentum
            )));
        }
        Ok(Sgd {
            momentum,
            nesterov,
            momentums: HashMap::new(),
        })
    }

    /// Plain SGD, no momentum.
    pub fn plain() -> Self {
        Sgd {
            momentum: 0.0,
            nesterov: false,
            momentums: HashMap::new(),
        }
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    pub fn nesterov(&self) -> bool {
        self.nesterov
    }

    /// Velocity slot of `variable` (the container for a mirrored variable).
    pub fn momentum_slot(&self, variable: &Variable) -> Option<&Variable> {
        self.momentums.get(&key_of(variable))
    }

    pub fn num_slots(&self) -> usize {
        self.momentums.len()
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Self::plain()
    }
}

impl UpdateEngine for Sgd {
    fn name(&self) -> &str {
        "SGD"
    }

    fn build(&mut self, var_list: &[Variable], store: &mut StateStore) -> Result<(), ParamFlowError> {
        for variable in var_list {
            let key = key_of(variable);
            if self.momentums.contains_key(&key) {
                continue;
            }
            let slot = store.add_variable_from_reference(variable, "m", None)?;
            self.momentums.insert(key, slot);
        }
        Ok(())
    }

    fn update_step(
        &self,
        gradient: Option<&Tensor>,
        variable: &Variable,
        ctx: &StepContext<'_>,
    ) -> Result<(), ParamFlowError> {
        let Some(gradient) = gradient else {
            trace!("SGD: no gradient for '{}', skipped", variable.name());
            return Ok(());
        };
        let lr = ctx.learning_rate();
        let step = gradient.mul_scalar(-lr);

        if self.momentum == 0.0 {
            return variable.assign_add(&step);
        }

        let slot = self.momentum_slot(variable).ok_or_else(|| {
            ParamFlowError::ConfigurationError(format!(
                "variable '{}' was not in the variable list the optimizer was built with",
                variable.name()
            ))
        })?;
        let velocity = slot.colocated_component(variable);
        let momentum = self.momentum;
        velocity.update_value(|v| v.mul_scalar(momentum).add(&step))?;
        let v = velocity.value()?;
        if self.nesterov {
            variable.assign_add(&v.mul_scalar(momentum).add(&step)?)
        } else {
            variable.assign_add(&v)
        }
    }

    fn get_config(&self) -> Result<HyperparameterMap, ParamFlowError> {
        let mut config = HyperparameterMap::new();
        config.insert("momentum".to_string(), self.momentum.into());
        config.insert("nesterov".to_string(), self.nesterov.into());
        Ok(config)
    }

    fn from_config(config: &HyperparameterMap) -> Result<Self, ParamFlowError> {
        let momentum = match config.get("momentum") {
            None => 0.0,
            Some(value) => value.as_f64().ok_or_else(|| {
                ParamFlowError::ConfigurationError("SGD momentum must be a number".to_string())
            })?,
        };
        let nesterov = match config.get("nesterov") {
            None => false,
            Some(SerializedHyperparameter::Flag(b)) => *b,
            Some(_) => {
                return Err(ParamFlowError::ConfigurationError(
                    "SGD nesterov must be a boolean".to_string(),
                ))
            }
        };
        Sgd::new(momentum, nesterov)
    }
}

#[cfg(test)]
#[path = "sgd_test.rs"]
mod tests;
