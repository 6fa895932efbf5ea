use log::trace;
use paramflow_core::{GradsAndVars, ParamFlowError, Tensor, Variable};

use crate::execution::ExecutionContext;

/// Sums gradients across replicas before they are applied.
///
/// On a local context this is the identity. On a replicated context every
/// replica contributes its batch and receives the element-wise sum, pairing
/// preserved. `None` gradients do not contribute; a position that has no
/// gradient on any replica stays `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientAggregator;

impl GradientAggregator {
    pub fn new() -> Self {
        GradientAggregator
    }

    pub fn aggregate(
        &self,
        context: &dyn ExecutionContext,
        grads_and_vars: GradsAndVars,
    ) -> Result<GradsAndVars, ParamFlowError> {
        if !context.is_replicated() {
            return Ok(grads_and_vars);
        }
        let (gradients, variables): (Vec<Option<Tensor>>, Vec<Variable>) =
            grads_and_vars.into_iter().unzip();
        let reduced = context.strategy().all_reduce_sum(gradients)?;
        if reduced.len() != variables.len() {
            return Err(ParamFlowError::ReplicaError(format!(
                "all-reduce returned {} gradients for {} variables",
                reduced.len(),
                variables.len()
            )));
        }
        trace!(
            "aggregated {} gradients across {} replicas",
            variables.len(),
            context.strategy().num_replicas_in_sync()
        );
        Ok(reduced.into_iter().zip(variables).collect())
    }
}

#[cfg(test)]
#[path = "aggregation_test.rs"]
mod tests;
