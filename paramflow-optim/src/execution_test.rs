#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use paramflow_core::distribute::{DefaultStrategy, DistributionStrategy, MirroredStrategy};
    use paramflow_core::{GradsAndVars, ParamFlowError, StorageDevice, Tensor, Variable};

    use crate::execution::{context_for, ExecutionContext};

    fn scalar(v: f64) -> Tensor {
        Tensor::scalar_f64(v)
    }

    #[test]
    fn test_local_context_applies_in_order_then_finishes_once() -> Result<(), ParamFlowError> {
        let context = context_for(Arc::new(DefaultStrategy::new()));
        assert!(!context.is_replicated());

        let a = Variable::new("a", scalar(0.0), true);
        let b = Variable::new("b", scalar(0.0), true);
        let batch: GradsAndVars = vec![(Some(scalar(1.0)), a.clone()), (None, b.clone())];

        let mut seen = Vec::new();
        let mut finished = 0;
        context.dispatch_updates(
            &batch,
            &mut |g, v| {
                seen.push((v.name().to_string(), g.is_some()));
                Ok(())
            },
            &mut || {
                finished += 1;
                Ok(())
            },
        )?;
        assert_eq!(seen, vec![("a".to_string(), true), ("b".to_string(), false)]);
        assert_eq!(finished, 1);
        Ok(())
    }

    #[test]
    fn test_local_context_stops_at_first_error() {
        let context = context_for(Arc::new(DefaultStrategy::new()));
        let batch: GradsAndVars = vec![
            (None, Variable::new("a", scalar(0.0), true)),
            (None, Variable::new("b", scalar(0.0), true)),
        ];
        let mut calls = 0;
        let mut finished = false;
        let result = context.dispatch_updates(
            &batch,
            &mut |_, _| {
                calls += 1;
                Err(ParamFlowError::InternalError("update failed".to_string()))
            },
            &mut || {
                finished = true;
                Ok(())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(!finished);
    }

    fn replicated_dispatch(strategy: MirroredStrategy) -> Result<(Vec<f64>, usize, usize), ParamFlowError> {
        let strategy_arc: Arc<dyn DistributionStrategy> = Arc::new(strategy.clone());
        let context = context_for(strategy_arc);
        assert!(context.is_replicated());

        let w = strategy.create_variable("w", scalar(0.0), true)?;
        let applied = AtomicUsize::new(0);
        let finished = AtomicUsize::new(0);
        strategy.run(|_| {
            let batch: GradsAndVars = vec![(Some(scalar(1.0)), w.clone())];
            context.dispatch_updates(
                &batch,
                &mut |g, handle| {
                    applied.fetch_add(1, Ordering::SeqCst);
                    match g {
                        Some(g) => handle.assign_add(g),
                        None => Ok(()),
                    }
                },
                &mut || {
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
        })?;
        let values = w
            .components()
            .iter()
            .map(|c| c.value().and_then(|t| t.item()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((values, applied.load(Ordering::SeqCst), finished.load(Ordering::SeqCst)))
    }

    #[test]
    fn test_replicated_no_merge_call_updates_own_components() -> Result<(), ParamFlowError> {
        let (values, applied, finished) = replicated_dispatch(MirroredStrategy::with_replicas(3)?)?;
        // One apply per replica, each on its own component
        assert_eq!(values, vec![1.0, 1.0, 1.0]);
        assert_eq!(applied, 3);
        assert_eq!(finished, 1);
        Ok(())
    }

    #[test]
    fn test_replicated_merge_call_updates_every_component_once() -> Result<(), ParamFlowError> {
        let devices = vec![StorageDevice::GPU(0), StorageDevice::GPU(1), StorageDevice::GPU(2)];
        let (values, applied, finished) = replicated_dispatch(MirroredStrategy::merge_only(devices)?)?;
        // A single merged dispatch reaching the three components
        assert_eq!(values, vec![1.0, 1.0, 1.0]);
        assert_eq!(applied, 3);
        assert_eq!(finished, 1);
        Ok(())
    }

    #[test]
    fn test_colocated_variable_follows_reference() -> Result<(), ParamFlowError> {
        let strategy = MirroredStrategy::with_replicas(2)?;
        let context = context_for(Arc::new(strategy.clone()));
        let model = strategy.create_variable("w", scalar(0.0), true)?;
        let slot = context.colocated_variable(&model, "m/w", scalar(0.0), false)?;
        assert!(slot.is_mirrored());
        assert_eq!(slot.components().len(), 2);
        assert!(!slot.trainable());

        let standalone = context.create_variable("iterations", scalar(0.0), false)?;
        assert!(standalone.is_mirrored());

        let local = context_for(Arc::new(DefaultStrategy::new()));
        let plain = local.colocated_variable(&Variable::new("b", scalar(0.0), true), "m/b", scalar(0.0), false)?;
        assert!(!plain.is_mirrored());
        Ok(())
    }
}
