use paramflow_core::{ParamFlowError, Tensor, Variable};

use crate::hyperparameter::HyperparameterMap;
use crate::state_store::StateStore;
use crate::update_engine::{StepContext, UpdateEngine};

/// Stand-in engine for an optimizer restored from persisted state whose
/// update rule is not available in this process.
///
/// Its hyperparameters are kept for inspection, but it cannot build, step or
/// be saved again.
#[derive(Debug, Clone, Default)]
pub struct RestoredEngine {
    config: HyperparameterMap,
}

impl RestoredEngine {
    pub fn config(&self) -> &HyperparameterMap {
        &self.config
    }
}

impl UpdateEngine for RestoredEngine {
    fn name(&self) -> &str {
        "RestoredOptimizer"
    }

    fn build(&mut self, _var_list: &[Variable], _store: &mut StateStore) -> Result<(), ParamFlowError> {
        Err(ParamFlowError::NotImplemented(
            "build is not available on a restored optimizer".to_string(),
        ))
    }

    fn update_step(
        &self,
        _gradient: Option<&Tensor>,
        _variable: &Variable,
        _ctx: &StepContext<'_>,
    ) -> Result<(), ParamFlowError> {
        Err(ParamFlowError::NotImplemented(
            "update_step is not available on a restored optimizer".to_string(),
        ))
    }

    fn get_config(&self) -> Result<HyperparameterMap, ParamFlowError> {
        Err(ParamFlowError::UnsupportedOperation(
            "restoring an optimizer from its config is only supported for optimizers built \
             from a known update rule"
                .to_string(),
        ))
    }

    fn from_config(config: &HyperparameterMap) -> Result<Self, ParamFlowError> {
        Ok(RestoredEngine {
            config: config.clone(),
        })
    }
}

#[cfg(test)]
#[path = "restored_test.rs"]
mod tests;
