#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use paramflow_core::distribute::{DefaultStrategy, DistributionStrategy, MirroredStrategy};
    use paramflow_core::{GradsAndVars, ParamFlowError, Tensor, Variable};

    use crate::aggregation::GradientAggregator;
    use crate::execution::context_for;

    fn scalar(v: f64) -> Tensor {
        Tensor::scalar_f64(v)
    }

    #[test]
    fn test_local_aggregation_is_identity() -> Result<(), ParamFlowError> {
        let context = context_for(Arc::new(DefaultStrategy::new()));
        let v = Variable::new("v", scalar(0.0), true);
        let batch: GradsAndVars = vec![(Some(scalar(2.0)), v.clone()), (None, v.clone())];
        let out = GradientAggregator::new().aggregate(context.as_ref(), batch)?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].0, Some(scalar(2.0)));
        assert!(out[0].1.ptr_eq(&v));
        assert!(out[1].0.is_none());
        Ok(())
    }

    #[test]
    fn test_replicated_aggregation_sums_and_keeps_pairing() -> Result<(), ParamFlowError> {
        let strategy = MirroredStrategy::with_replicas(2)?;
        let context = context_for(Arc::new(strategy.clone()));
        let a = strategy.create_variable("a", scalar(0.0), true)?;
        let b = strategy.create_variable("b", scalar(0.0), true)?;
        let c = strategy.create_variable("c", scalar(0.0), true)?;

        let outputs = strategy.run(|replica_id| {
            let r = replica_id as f64;
            let batch: GradsAndVars = vec![
                (Some(scalar(r + 1.0)), a.clone()),
                ((replica_id == 0).then(|| scalar(10.0)), b.clone()),
                (None, c.clone()),
            ];
            GradientAggregator::new().aggregate(context.as_ref(), batch)
        })?;

        for out in outputs {
            assert_eq!(out[0].0, Some(scalar(3.0)));
            assert!(out[0].1.ptr_eq(&a));
            assert_eq!(out[1].0, Some(scalar(10.0)));
            assert!(out[1].1.ptr_eq(&b));
            assert!(out[2].0.is_none());
            assert!(out[2].1.ptr_eq(&c));
        }
        Ok(())
    }
}
