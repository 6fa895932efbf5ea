use crate::device::StorageDevice;
use crate::distribute::{DistributionStrategy, MergeFn, UpdateFn};
use crate::error::ParamFlowError;
use crate::tensor::Tensor;
use crate::variable::Variable;

/// Single-replica strategy used when nothing else is installed.
///
/// Collectives are identities and variables are plain local variables on
/// the strategy's device.
#[derive(Debug, Clone, Default)]
pub struct DefaultStrategy {
    device: StorageDevice,
}

impl DefaultStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_device(device: StorageDevice) -> Self {
        DefaultStrategy { device }
    }
}

impl DistributionStrategy for DefaultStrategy {
    fn num_replicas_in_sync(&self) -> usize {
        1
    }

    fn devices(&self) -> Vec<StorageDevice> {
        vec![self.device]
    }

    fn current_replica(&self) -> Option<usize> {
        Some(0)
    }

    fn supports_no_merge_call(&self) -> bool {
        true
    }

    fn all_reduce_sum(
        &self,
        values: Vec<Option<Tensor>>,
    ) -> Result<Vec<Option<Tensor>>, ParamFlowError> {
        Ok(values)
    }

    fn update(&self, variable: &Variable, f: &mut UpdateFn<'_>) -> Result<(), ParamFlowError> {
        f(variable)
    }

    fn merge_call(&self, f: &mut MergeFn<'_>) -> Result<(), ParamFlowError> {
        f()
    }

    fn create_variable(
        &self,
        name: &str,
        initial_value: Tensor,
        trainable: bool,
    ) -> Result<Variable, ParamFlowError> {
        Ok(Variable::on_device(name, initial_value, trainable, self.device))
    }
}
