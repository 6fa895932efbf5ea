use std::sync::Arc;

use approx::assert_relative_eq;
use paramflow_core::{
    autograd::Loss,
    distribute::{DistributionStrategy, MirroredStrategy, StrategyScope},
    error::ParamFlowError,
    StorageDevice, Variable,
};
use paramflow_optim::{key_of, Optimizer, OptimizerOptions, Sgd};

mod common;
use common::{init_logger, scalar, sgd_under};

fn assert_components(variable: &Variable, expected: f64) -> Result<(), ParamFlowError> {
    for component in variable.components() {
        assert_relative_eq!(component.value()?.item()?, expected, epsilon = 1e-9);
    }
    Ok(())
}

// Replica r contributes gradient r + 1, so two replicas sum to 3.
// Momentum 0.9, lr 0.1: v1 = -0.3, w1 = 0.7; v2 = -0.57, w2 = 0.13.
fn momentum_steps(strategy: MirroredStrategy) -> Result<(), ParamFlowError> {
    let w = strategy.create_variable("w", scalar(1.0), true)?;
    let optimizer = sgd_under(Arc::new(strategy.clone()), 0.9, 0.1)?;

    for _ in 0..2 {
        strategy.run(|replica_id| {
            optimizer.apply_gradients(vec![(Some(scalar(replica_id as f64 + 1.0)), w.clone())], false)
        })?;
    }

    assert_eq!(optimizer.iterations(), 2);
    assert_components(&w, 0.13)?;

    let slots = optimizer.variables()?;
    assert_eq!(slots.len(), 1);
    let slot = &slots[0];
    assert!(slot.is_mirrored());
    assert_eq!(key_of(slot), key_of(&slot.components()[1]));
    let devices: Vec<StorageDevice> = slot.components().iter().map(|c| c.device()).collect();
    let expected: Vec<StorageDevice> = w.components().iter().map(|c| c.device()).collect();
    assert_eq!(devices, expected);
    assert_components(slot, -0.57)
}

#[test]
fn test_replicas_update_their_own_components() -> Result<(), ParamFlowError> {
    init_logger();
    momentum_steps(MirroredStrategy::with_replicas(2)?)
}

#[test]
fn test_merge_call_strategy_updates_every_component_once() -> Result<(), ParamFlowError> {
    init_logger();
    momentum_steps(MirroredStrategy::merge_only(vec![
        StorageDevice::GPU(0),
        StorageDevice::GPU(1),
    ])?)
}

#[test]
fn test_step_counter_counts_calls_not_replicas() -> Result<(), ParamFlowError> {
    init_logger();
    let strategy = MirroredStrategy::with_replicas(4)?;
    let a = strategy.create_variable("a", scalar(0.0), true)?;
    let b = strategy.create_variable("b", scalar(0.0), true)?;
    let optimizer = sgd_under(Arc::new(strategy.clone()), 0.0, 1.0)?;

    strategy.run(|_| {
        optimizer.apply_gradients(
            vec![(Some(scalar(1.0)), a.clone()), (Some(scalar(1.0)), b.clone())],
            false,
        )
    })?;

    assert_eq!(optimizer.iterations(), 1);
    assert_components(&a, -4.0)?;
    assert_components(&b, -4.0)
}

#[test]
fn test_skipped_aggregation_applies_local_gradients() -> Result<(), ParamFlowError> {
    init_logger();
    let strategy = MirroredStrategy::with_replicas(2)?;
    let w = strategy.create_variable("w", scalar(1.0), true)?;
    let optimizer = sgd_under(Arc::new(strategy.clone()), 0.0, 0.1)?;

    strategy.run(|replica_id| {
        optimizer.apply_gradients(vec![(Some(scalar(replica_id as f64 + 1.0)), w.clone())], true)
    })?;

    assert_eq!(optimizer.iterations(), 1);
    let values: Vec<f64> = w
        .components()
        .iter()
        .map(|c| c.value().and_then(|t| t.item()))
        .collect::<Result<_, _>>()?;
    assert_relative_eq!(values[0], 0.9, epsilon = 1e-9);
    assert_relative_eq!(values[1], 0.8, epsilon = 1e-9);
    Ok(())
}

// Each replica fits w to its own target with loss (w - t)^2:
// grad = 2(0 - 1) + 2(0 - 3) = -8, w = 0 - 0.25 * -8 = 2.
#[test]
fn test_minimize_under_ambient_strategy() -> Result<(), ParamFlowError> {
    init_logger();
    let strategy = MirroredStrategy::with_replicas(2)?;
    let _scope = StrategyScope::enter(Arc::new(strategy.clone()));
    let w = strategy.create_variable("w", scalar(0.0), true)?;
    let optimizer = Optimizer::new(
        Sgd::plain(),
        OptimizerOptions {
            learning_rate: Some(0.25.into()),
            ..Default::default()
        },
    )?;
    assert_eq!(optimizer.strategy().num_replicas_in_sync(), 2);
    let targets = [1.0, 3.0];

    strategy.run(|replica_id| {
        let local = w.component_for_replica(replica_id).ok_or_else(|| {
            ParamFlowError::InternalError("missing replica component".to_string())
        })?;
        let target = targets[replica_id];
        let loss = Loss::producer(move || {
            let diff = local.value()?.add_scalar(-target);
            Ok(scalar(diff.norm_squared()))
        });
        optimizer.minimize(loss, &[w.clone()], None)
    })?;

    assert_eq!(optimizer.iterations(), 1);
    assert_components(&w, 2.0)
}

#[test]
fn test_replica_failure_before_apply_does_not_block_peers() {
    init_logger();
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let outcome = (|| -> Result<(), ParamFlowError> {
            let strategy = MirroredStrategy::with_replicas(2)?;
            let w = strategy.create_variable("w", scalar(1.0), true)?;
            let optimizer = sgd_under(Arc::new(strategy.clone()), 0.0, 0.1)?;
            let result = strategy.run(|replica_id| {
                if replica_id == 1 {
                    panic!("replica lost before applying gradients");
                }
                optimizer.apply_gradients(vec![(Some(scalar(1.0)), w.clone())], false)
            });
            assert_eq!(optimizer.iterations(), 0);
            result.map(|_| ())
        })();
        let _ = tx.send(outcome);
    });
    let outcome = rx
        .recv_timeout(std::time::Duration::from_secs(10))
        .expect("run returned after a replica panic");
    assert!(matches!(outcome, Err(ParamFlowError::ReplicaError(_))));
}
