use std::sync::Arc;

use approx::assert_relative_eq;
use paramflow_core::{
    autograd::{GradientTape, Loss, NumericalTape},
    distribute::{get_strategy, DistributionStrategy, MirroredStrategy, StrategyScope},
    error::ParamFlowError,
    Variable,
};

mod common;
use common::{create_test_tensor_f64, init_logger};

// Each replica fits w to its own target with loss (w - t)^2, so the summed
// gradient is 2 * sum(w - t_r). A hand-written SGD step through the strategy
// must keep every component of the mirrored variable identical.
#[test]
fn test_data_parallel_step_keeps_components_in_sync() -> Result<(), ParamFlowError> {
    init_logger();
    let strategy = MirroredStrategy::with_replicas(2)?;
    let _scope = StrategyScope::enter(Arc::new(strategy.clone()));
    let w = get_strategy().create_variable("w", create_test_tensor_f64(vec![0.0], vec![1]), true)?;
    let targets = [1.0, 3.0];

    strategy.run(|replica_id| {
        let local = w.component_for_replica(replica_id).expect("component per replica");
        let target = targets[replica_id];
        let mut tape = NumericalTape::new();
        tape.watch(&[w.clone()]);
        let read = local.clone();
        let mut loss = Loss::producer(move || {
            let diff = read.value()?.add_scalar(-target);
            Ok(paramflow_core::Tensor::scalar_f64(diff.norm_squared()))
        });
        let grads = tape.gradient(&mut loss, &[w.clone()])?;

        let current = get_strategy();
        let reduced = current.all_reduce_sum(grads)?;
        let grad = reduced[0].clone().expect("gradient for w");
        current.update(&w, &mut |component| component.assign_sub(&grad.mul_scalar(0.25)))
    })?;

    // grad = 2(0-1) + 2(0-3) = -8; w = 0 - 0.25 * -8 = 2
    for component in w.components() {
        assert_relative_eq!(component.value()?.item()?, 2.0, epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn test_merge_only_strategy_updates_all_components_once() -> Result<(), ParamFlowError> {
    init_logger();
    let strategy = MirroredStrategy::merge_only(MirroredStrategy::with_replicas(3)?.devices())?;
    let counter = Variable::new("steps", paramflow_core::Tensor::scalar_f64(0.0), false);
    let w = strategy.create_variable("w", create_test_tensor_f64(vec![1.0, 1.0], vec![2]), true)?;

    strategy.run(|_| {
        let current = get_strategy();
        current.merge_call(&mut || {
            counter.assign_add(&paramflow_core::Tensor::scalar_f64(1.0))?;
            current.update(&w, &mut |component| {
                component.assign_add(&create_test_tensor_f64(vec![1.0, 2.0], vec![2]))
            })
        })
    })?;

    assert_relative_eq!(counter.value()?.item()?, 1.0);
    for component in w.components() {
        assert_eq!(component.value()?.get_f64_data()?, vec![2.0, 3.0]);
    }
    Ok(())
}
