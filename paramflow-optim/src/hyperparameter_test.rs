#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use paramflow_core::ParamFlowError;

    use crate::hyperparameter::{Hyperparameter, HyperparameterCell, SerializedHyperparameter};
    use crate::schedule::{ExponentialDecay, PiecewiseConstantDecay};

    #[test]
    fn test_unset_cell_errors() {
        let cell = HyperparameterCell::unset("learning_rate");
        assert!(!cell.is_set());
        assert!(matches!(cell.get(0), Err(ParamFlowError::ConfigurationError(_))));
        assert_eq!(cell.serialize(), Ok(None));
    }

    #[test]
    fn test_get_for_each_source() -> Result<(), ParamFlowError> {
        let constant = HyperparameterCell::new("c", Some(Hyperparameter::Constant(0.5)));
        assert_relative_eq!(constant.get(100)?, 0.5);

        let settable = HyperparameterCell::settable("lr", Hyperparameter::Constant(0.25));
        assert!(matches!(settable.hyperparameter(), Some(Hyperparameter::Cell(_))));
        assert_relative_eq!(settable.get(0)?, 0.25);

        let schedule = HyperparameterCell::settable(
            "lr",
            Hyperparameter::schedule(PiecewiseConstantDecay::new(vec![2], vec![1.0, 0.1])?),
        );
        assert!(schedule.is_schedule());
        assert_relative_eq!(schedule.get(2)?, 1.0);
        assert_relative_eq!(schedule.get(3)?, 0.1);

        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let callable = HyperparameterCell::new(
            "decay",
            Some(Hyperparameter::callable(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                0.75
            })),
        );
        assert_relative_eq!(callable.get(0)?, 0.75);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_set_assigns_cell_in_place() -> Result<(), ParamFlowError> {
        let mut cell = HyperparameterCell::settable("lr", Hyperparameter::Constant(0.1));
        let variable = match cell.hyperparameter() {
            Some(Hyperparameter::Cell(v)) => v.clone(),
            other => panic!("expected a state cell, got {:?}", other),
        };
        cell.set(0.01)?;
        assert_relative_eq!(cell.get(0)?, 0.01);
        // Same variable, new value
        assert_relative_eq!(variable.value()?.item()?, 0.01);
        Ok(())
    }

    #[test]
    fn test_set_replaces_constant_callable_and_unset() -> Result<(), ParamFlowError> {
        for initial in [
            Some(Hyperparameter::Constant(1.0)),
            Some(Hyperparameter::callable(|| 1.0)),
            None,
        ] {
            let mut cell = HyperparameterCell::new("h", initial);
            cell.set(2.0)?;
            assert!(matches!(cell.hyperparameter(), Some(Hyperparameter::Cell(_))));
            assert_relative_eq!(cell.get(0)?, 2.0);
        }
        Ok(())
    }

    #[test]
    fn test_schedule_is_not_settable() -> Result<(), ParamFlowError> {
        let mut cell = HyperparameterCell::settable(
            "lr",
            Hyperparameter::schedule(ExponentialDecay::new(0.1, 10, 0.5, false)?),
        );
        assert!(matches!(cell.set(0.3), Err(ParamFlowError::ConfigurationError(_))));
        assert!(cell.is_schedule());
        Ok(())
    }

    #[test]
    fn test_serialize_each_source() -> Result<(), ParamFlowError> {
        let cell = HyperparameterCell::settable("lr", Hyperparameter::Constant(0.5));
        assert_eq!(cell.serialize()?, Some(SerializedHyperparameter::Value(0.5)));

        let callable = HyperparameterCell::new("c", Some(Hyperparameter::callable(|| 3.0)));
        assert_eq!(callable.serialize()?, Some(SerializedHyperparameter::Value(3.0)));

        let schedule = HyperparameterCell::settable(
            "lr",
            Hyperparameter::schedule(ExponentialDecay::new(0.1, 10, 0.5, true)?),
        );
        match schedule.serialize()? {
            Some(SerializedHyperparameter::Schedule(descriptor)) => {
                assert_eq!(descriptor.class_name, "ExponentialDecay");
                let rebuilt = SerializedHyperparameter::Schedule(descriptor).to_hyperparameter()?;
                let rebuilt = HyperparameterCell::new("lr", Some(rebuilt));
                assert_relative_eq!(rebuilt.get(10)?, 0.05);
            }
            other => panic!("expected a schedule descriptor, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_serialized_hyperparameter_json_shapes() -> Result<(), serde_json::Error> {
        let value: SerializedHyperparameter = serde_json::from_str("0.9")?;
        assert_eq!(value.as_f64(), Some(0.9));
        let flag: SerializedHyperparameter = serde_json::from_str("true")?;
        assert_eq!(flag.as_bool(), Some(true));
        let schedule: SerializedHyperparameter =
            serde_json::from_str(r#"{"class_name":"ExponentialDecay","config":{}}"#)?;
        assert!(matches!(schedule, SerializedHyperparameter::Schedule(_)));
        assert!(flag.to_hyperparameter().is_err());
        Ok(())
    }
}
