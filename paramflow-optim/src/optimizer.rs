use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, trace};
use paramflow_core::autograd::{GradientTape, Loss, NumericalTape};
use paramflow_core::distribute::{self, DistributionStrategy};
use paramflow_core::{GradsAndVars, ParamFlowError, Tensor, Variable};

use crate::aggregation::GradientAggregator;
use crate::config::OptimizerConfig;
use crate::execution::{self, ExecutionContext};
use crate::grad_clipping::ClipConfig;
use crate::hyperparameter::{Hyperparameter, HyperparameterCell};
use crate::state_store::{StateStore, VariableOptions};
use crate::update_engine::{StepContext, UpdateEngine};

/// Construction options shared by every optimizer.
#[derive(Debug, Clone, Default)]
pub struct OptimizerOptions {
    /// Name used to scope optimizer variables. Defaults to the engine's name.
    pub name: Option<String>,
    /// Clip each gradient to this L2 norm.
    pub clipnorm: Option<f64>,
    /// Clip all gradients jointly to this global L2 norm.
    pub global_clipnorm: Option<f64>,
    /// Clamp gradient elements to `[-clipvalue, clipvalue]`.
    pub clipvalue: Option<f64>,
    pub learning_rate: Option<Hyperparameter>,
}

/// Number of applied steps, shared by every replica of the optimizer.
#[derive(Debug, Default)]
pub struct StepCounter(AtomicU64);

impl StepCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increments and returns the new count.
    fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Applies gradients to model variables with an [`UpdateEngine`].
///
/// Each call to [`Optimizer::apply_gradients`] validates the batch, sums
/// gradients across replicas, builds the optimizer state on first use,
/// clips, dispatches one update per variable and finally advances the step
/// counter by exactly one.
///
/// All methods take `&self`, so one optimizer can be shared by the replica
/// threads of a distribution strategy.
pub struct Optimizer<E: UpdateEngine> {
    name: String,
    clip: ClipConfig,
    engine: RwLock<E>,
    store: Mutex<StateStore>,
    learning_rate: RwLock<HyperparameterCell>,
    iterations: StepCounter,
    context: Arc<dyn ExecutionContext>,
    aggregator: GradientAggregator,
}

impl<E: UpdateEngine> Optimizer<E> {
    /// Creates an optimizer under the ambient distribution strategy.
    ///
    /// # Errors
    /// `ConfigurationError` if both `clipnorm` and `global_clipnorm` are set.
    pub fn new(engine: E, options: OptimizerOptions) -> Result<Self, ParamFlowError> {
        Self::with_strategy(engine, options, distribute::get_strategy())
    }

    /// Creates an optimizer bound to `strategy`.
    pub fn with_strategy(
        engine: E,
        options: OptimizerOptions,
        strategy: Arc<dyn DistributionStrategy>,
    ) -> Result<Self, ParamFlowError> {
        let clip = ClipConfig::new(options.clipnorm, options.global_clipnorm, options.clipvalue)?;
        let name = options.name.unwrap_or_else(|| engine.name().to_string());
        let learning_rate = match options.learning_rate {
            Some(value) => HyperparameterCell::settable("learning_rate", value),
            None => HyperparameterCell::unset("learning_rate"),
        };
        let context = execution::context_for(strategy);
        debug!(
            "Optimizer '{}' created ({:?}, clip policy {:?})",
            name,
            context,
            clip.policy()
        );
        Ok(Optimizer {
            store: Mutex::new(StateStore::new(name.clone(), context.clone())),
            name,
            clip,
            engine: RwLock::new(engine),
            learning_rate: RwLock::new(learning_rate),
            iterations: StepCounter::default(),
            context,
            aggregator: GradientAggregator::new(),
        })
    }

    /// Rebuilds an optimizer from its persisted configuration.
    pub fn from_config(config: OptimizerConfig) -> Result<Self, ParamFlowError> {
        let engine = E::from_config(&config.hyperparameters)?;
        let learning_rate = config
            .learning_rate
            .as_ref()
            .map(|lr| lr.to_hyperparameter())
            .transpose()?;
        let options = OptimizerOptions {
            name: Some(config.name),
            clipnorm: config.clipnorm,
            global_clipnorm: config.global_clipnorm,
            clipvalue: config.clipvalue,
            learning_rate,
        };
        Self::new(engine, options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clip_config(&self) -> &ClipConfig {
        &self.clip
    }

    pub fn strategy(&self) -> &Arc<dyn DistributionStrategy> {
        self.context.strategy()
    }

    /// Number of `apply_gradients` calls completed.
    pub fn iterations(&self) -> u64 {
        self.iterations.get()
    }

    /// Current learning rate; a schedule is evaluated at [`Self::iterations`].
    ///
    /// # Errors
    /// `ConfigurationError` if no learning rate was configured.
    pub fn learning_rate(&self) -> Result<f64, ParamFlowError> {
        self.read_learning_rate()?.get(self.iterations())
    }

    /// # Errors
    /// `ConfigurationError` if the learning rate comes from a schedule.
    pub fn set_learning_rate(&self, value: f64) -> Result<(), ParamFlowError> {
        let mut cell = self.learning_rate.write().map_err(|e| ParamFlowError::LockError {
            lock_type: "write".to_string(),
            reason: format!("learning rate lock poisoned: {}", e),
        })?;
        cell.set(value)
    }

    /// Creates the optimizer state for `var_list` unless it already exists.
    ///
    /// Only the first call (explicit or from `apply_gradients`) has an
    /// effect; the engine allocates its slots exactly once.
    pub fn build(&self, var_list: &[Variable]) -> Result<(), ParamFlowError> {
        let mut store = self.lock_store()?;
        if !store.build(var_list) {
            return Ok(());
        }
        let mut engine = self.write_engine()?;
        engine.build(var_list, &mut store)?;
        debug!(
            "Optimizer '{}' built for {} variables ({} optimizer variables)",
            self.name,
            var_list.len(),
            store.variables().len()
        );
        Ok(())
    }

    /// Standalone optimizer variable named `"{optimizer}/{name}"`.
    pub fn add_variable(
        &self,
        name: &str,
        options: VariableOptions,
    ) -> Result<Variable, ParamFlowError> {
        self.lock_store()?.add_variable(name, options)
    }

    /// Optimizer variable shaped and placed like `model_variable`.
    pub fn add_variable_from_reference(
        &self,
        model_variable: &Variable,
        name_prefix: &str,
        initial_value: Option<Tensor>,
    ) -> Result<Variable, ParamFlowError> {
        self.lock_store()?
            .add_variable_from_reference(model_variable, name_prefix, initial_value)
    }

    /// Every optimizer variable, in creation order.
    pub fn variables(&self) -> Result<Vec<Variable>, ParamFlowError> {
        Ok(self.lock_store()?.variables().to_vec())
    }

    /// Read access to the engine.
    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> Result<R, ParamFlowError> {
        Ok(f(&*self.read_engine()?))
    }

    /// Computes the gradients of `loss` with respect to `var_list` and
    /// applies them.
    ///
    /// Without a tape a [`NumericalTape`] is used, which needs a
    /// [`Loss::Producer`]. A precomputed [`Loss::Value`] requires the tape
    /// that recorded its computation.
    pub fn minimize(
        &self,
        mut loss: Loss<'_>,
        var_list: &[Variable],
        tape: Option<&mut dyn GradientTape>,
    ) -> Result<(), ParamFlowError> {
        let mut numerical;
        let tape: &mut dyn GradientTape = match tape {
            Some(tape) => tape,
            None => {
                if !loss.is_producer() {
                    return Err(ParamFlowError::ConfigurationError(
                        "`tape` is required when a loss tensor is passed to minimize".to_string(),
                    ));
                }
                numerical = NumericalTape::new();
                &mut numerical
            }
        };
        tape.watch(var_list);
        let gradients = tape.gradient(&mut loss, var_list)?;
        self.apply_gradients_unzipped(gradients, var_list.to_vec())
    }

    /// [`Self::apply_gradients`] on parallel gradient and variable lists.
    ///
    /// # Errors
    /// `TypeError` if the lists differ in length.
    pub fn apply_gradients_unzipped(
        &self,
        gradients: Vec<Option<Tensor>>,
        variables: Vec<Variable>,
    ) -> Result<(), ParamFlowError> {
        if gradients.len() != variables.len() {
            return Err(ParamFlowError::TypeError(format!(
                "got {} gradients for {} variables",
                gradients.len(),
                variables.len()
            )));
        }
        self.apply_gradients(gradients.into_iter().zip(variables).collect(), false)
    }

    /// Applies one optimization step.
    ///
    /// Gradients are summed across replicas unless
    /// `skip_gradient_aggregation` is set (the caller already reduced them).
    /// Updates already applied are not rolled back if a later one fails.
    ///
    /// # Errors
    /// `TypeError` for an empty batch or a gradient whose shape or dtype does
    /// not match its variable, before any state is touched.
    pub fn apply_gradients(
        &self,
        grads_and_vars: GradsAndVars,
        skip_gradient_aggregation: bool,
    ) -> Result<(), ParamFlowError> {
        validate(&grads_and_vars)?;
        let grads_and_vars = if skip_gradient_aggregation {
            grads_and_vars
        } else {
            self.aggregator.aggregate(self.context.as_ref(), grads_and_vars)?
        };

        let (gradients, variables): (Vec<Option<Tensor>>, Vec<Variable>) =
            grads_and_vars.into_iter().unzip();
        self.build(&variables)?;
        let grads_and_vars: GradsAndVars =
            self.clip.clip(gradients).into_iter().zip(variables).collect();

        let index = self.lock_store()?.index_dict().ok_or_else(|| {
            ParamFlowError::InternalError(format!("optimizer '{}' is not built", self.name))
        })?;
        let iterations = self.iterations();
        let learning_rate = self.read_learning_rate()?.get(iterations)?;
        let step = StepContext::new(learning_rate, iterations, &index);

        let engine = self.read_engine()?;
        self.context.dispatch_updates(
            &grads_and_vars,
            &mut |gradient, variable| engine.update_step(gradient, variable, &step),
            &mut || {
                let now = self.iterations.increment();
                trace!("Optimizer '{}' applied step {} (lr {})", self.name, now, learning_rate);
                Ok(())
            },
        )
    }

    /// Persistable configuration: name, clipping options, learning rate and
    /// engine hyperparameters.
    pub fn get_config(&self) -> Result<OptimizerConfig, ParamFlowError> {
        let learning_rate = self.read_learning_rate()?.serialize()?;
        let hyperparameters = self.read_engine()?.get_config()?;
        Ok(OptimizerConfig {
            name: self.name.clone(),
            clipnorm: self.clip.clipnorm,
            global_clipnorm: self.clip.global_clipnorm,
            clipvalue: self.clip.clipvalue,
            learning_rate,
            hyperparameters,
        })
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, StateStore>, ParamFlowError> {
        self.store.lock().map_err(|e| ParamFlowError::LockError {
            lock_type: "mutex".to_string(),
            reason: format!("state store lock poisoned: {}", e),
        })
    }

    fn read_engine(&self) -> Result<RwLockReadGuard<'_, E>, ParamFlowError> {
        self.engine.read().map_err(|e| ParamFlowError::LockError {
            lock_type: "read".to_string(),
            reason: format!("engine lock poisoned: {}", e),
        })
    }

    fn read_learning_rate(&self) -> Result<RwLockReadGuard<'_, HyperparameterCell>, ParamFlowError> {
        self.learning_rate.read().map_err(|e| ParamFlowError::LockError {
            lock_type: "read".to_string(),
            reason: format!("learning rate lock poisoned: {}", e),
        })
    }

    fn write_engine(&self) -> Result<RwLockWriteGuard<'_, E>, ParamFlowError> {
        self.engine.write().map_err(|e| ParamFlowError::LockError {
            lock_type: "write".to_string(),
            reason: format!("engine lock poisoned: {}", e),
        })
    }
}

fn validate(grads_and_vars: &GradsAndVars) -> Result<(), ParamFlowError> {
    if grads_and_vars.is_empty() {
        return Err(ParamFlowError::TypeError(
            "apply_gradients needs at least one (gradient, variable) pair".to_string(),
        ));
    }
    for (position, (gradient, variable)) in grads_and_vars.iter().enumerate() {
        let Some(gradient) = gradient else {
            continue;
        };
        if gradient.shape() != variable.shape() {
            return Err(ParamFlowError::TypeError(format!(
                "gradient {} has shape {:?} but variable '{}' has shape {:?}",
                position,
                gradient.shape(),
                variable.name(),
                variable.shape()
            )));
        }
        if gradient.dtype() != variable.dtype() {
            return Err(ParamFlowError::TypeError(format!(
                "gradient {} has dtype {} but variable '{}' has dtype {}",
                position,
                gradient.dtype(),
                variable.name(),
                variable.dtype()
            )));
        }
    }
    Ok(())
}

impl<E: UpdateEngine> fmt::Debug for Optimizer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer")
            .field("name", &self.name)
            .field("clip", &self.clip)
            .field("iterations", &self.iterations())
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
#[path = "optimizer_test.rs"]
mod tests;
