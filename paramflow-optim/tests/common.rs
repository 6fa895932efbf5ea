use std::sync::Arc;

use paramflow_core::distribute::DistributionStrategy;
use paramflow_core::{ParamFlowError, Tensor};
use paramflow_optim::{Optimizer, OptimizerOptions, Sgd};

// Shared helpers for the integration tests of this crate.
// Not every test binary uses every helper.

#[allow(dead_code)]
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[allow(dead_code)]
pub(crate) fn scalar(v: f64) -> Tensor {
    Tensor::scalar_f64(v)
}

#[allow(dead_code)]
pub(crate) fn sgd_under(
    strategy: Arc<dyn DistributionStrategy>,
    momentum: f64,
    learning_rate: f64,
) -> Result<Optimizer<Sgd>, ParamFlowError> {
    let options = OptimizerOptions {
        learning_rate: Some(learning_rate.into()),
        ..Default::default()
    };
    Optimizer::with_strategy(Sgd::new(momentum, false)?, options, strategy)
}
