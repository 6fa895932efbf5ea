//! Local versus replicated execution of an optimizer step.
//!
//! The coordinator never branches on the kind of strategy it runs under.
//! It hands the per-variable update and the once-per-step finalizer to an
//! [`ExecutionContext`], which decides who runs them and on which handles.

use std::fmt;
use std::sync::Arc;

use paramflow_core::distribute::DistributionStrategy;
use paramflow_core::{GradsAndVars, ParamFlowError, Tensor, Variable};

/// Per-variable update callback: `(gradient, variable handle to update)`.
pub type ApplyFn<'a> = dyn FnMut(Option<&Tensor>, &Variable) -> Result<(), ParamFlowError> + 'a;

/// Callback run once after every variable of the step has been updated.
pub type FinishFn<'a> = dyn FnMut() -> Result<(), ParamFlowError> + 'a;

pub trait ExecutionContext: Send + Sync + fmt::Debug {
    /// The strategy this context executes under.
    fn strategy(&self) -> &Arc<dyn DistributionStrategy>;

    /// True when gradients must be reduced and updates go through the
    /// strategy's collectives.
    fn is_replicated(&self) -> bool;

    /// Runs `apply` for every pair of `grads_and_vars`, then `finish` exactly
    /// once for the whole step.
    fn dispatch_updates(
        &self,
        grads_and_vars: &GradsAndVars,
        apply: &mut ApplyFn<'_>,
        finish: &mut FinishFn<'_>,
    ) -> Result<(), ParamFlowError>;

    /// Standalone variable placed the way the strategy places variables.
    fn create_variable(
        &self,
        name: &str,
        initial_value: Tensor,
        trainable: bool,
    ) -> Result<Variable, ParamFlowError> {
        self.strategy().create_variable(name, initial_value, trainable)
    }

    /// Variable colocated with `reference`: a mirrored reference gets a
    /// mirrored variable with a component next to each of its components.
    fn colocated_variable(
        &self,
        reference: &Variable,
        name: &str,
        initial_value: Tensor,
        trainable: bool,
    ) -> Result<Variable, ParamFlowError> {
        self.strategy()
            .colocate_with(reference)
            .create_variable(name, initial_value, trainable)
    }
}

/// Single device: updates run inline, in order.
pub struct LocalContext {
    strategy: Arc<dyn DistributionStrategy>,
}

impl LocalContext {
    pub fn new(strategy: Arc<dyn DistributionStrategy>) -> Self {
        LocalContext { strategy }
    }
}

impl ExecutionContext for LocalContext {
    fn strategy(&self) -> &Arc<dyn DistributionStrategy> {
        &self.strategy
    }

    fn is_replicated(&self) -> bool {
        false
    }

    fn dispatch_updates(
        &self,
        grads_and_vars: &GradsAndVars,
        apply: &mut ApplyFn<'_>,
        finish: &mut FinishFn<'_>,
    ) -> Result<(), ParamFlowError> {
        for (gradient, variable) in grads_and_vars {
            apply(gradient.as_ref(), variable)?;
        }
        finish()
    }
}

impl fmt::Debug for LocalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalContext")
            .field("devices", &self.strategy.devices())
            .finish()
    }
}

/// Several replicas: variable writes go through `strategy.update` and the
/// finalizer through `merge_call`.
///
/// If the strategy supports it, each replica updates its own components and
/// only the finalizer is merged. Otherwise the whole dispatch is merged: it
/// runs once, in cross-replica context, and updates every component.
pub struct ReplicatedContext {
    strategy: Arc<dyn DistributionStrategy>,
}

impl ReplicatedContext {
    pub fn new(strategy: Arc<dyn DistributionStrategy>) -> Self {
        ReplicatedContext { strategy }
    }

    fn update_all(
        &self,
        grads_and_vars: &GradsAndVars,
        apply: &mut ApplyFn<'_>,
    ) -> Result<(), ParamFlowError> {
        for (gradient, variable) in grads_and_vars {
            let gradient = gradient.as_ref();
            self.strategy
                .update(variable, &mut |handle| apply(gradient, handle))?;
        }
        Ok(())
    }
}

impl ExecutionContext for ReplicatedContext {
    fn strategy(&self) -> &Arc<dyn DistributionStrategy> {
        &self.strategy
    }

    fn is_replicated(&self) -> bool {
        true
    }

    fn dispatch_updates(
        &self,
        grads_and_vars: &GradsAndVars,
        apply: &mut ApplyFn<'_>,
        finish: &mut FinishFn<'_>,
    ) -> Result<(), ParamFlowError> {
        if self.strategy.supports_no_merge_call() {
            self.update_all(grads_and_vars, apply)?;
            self.strategy.merge_call(finish)
        } else {
            self.strategy.merge_call(&mut || {
                self.update_all(grads_and_vars, apply)?;
                finish()
            })
        }
    }
}

impl fmt::Debug for ReplicatedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedContext")
            .field("replicas", &self.strategy.num_replicas_in_sync())
            .field("no_merge_call", &self.strategy.supports_no_merge_call())
            .finish()
    }
}

/// The context matching `strategy`.
pub fn context_for(strategy: Arc<dyn DistributionStrategy>) -> Arc<dyn ExecutionContext> {
    if strategy.is_distributed() {
        Arc::new(ReplicatedContext::new(strategy))
    } else {
        Arc::new(LocalContext::new(strategy))
    }
}

#[cfg(test)]
#[path = "execution_test.rs"]
mod tests;
