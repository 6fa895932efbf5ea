use paramflow_core::{ParamFlowError, Tensor, Variable};

use crate::hyperparameter::HyperparameterMap;
use crate::state_store::StateStore;
use crate::var_key::IndexDict;

/// Per-step values handed to [`UpdateEngine::update_step`].
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    learning_rate: f64,
    iterations: u64,
    index: &'a IndexDict,
}

impl<'a> StepContext<'a> {
    pub fn new(learning_rate: f64, iterations: u64, index: &'a IndexDict) -> Self {
        StepContext {
            learning_rate,
            iterations,
            index,
        }
    }

    /// Learning rate resolved for this step.
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Number of steps applied before this one.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Position of `variable` in the list the optimizer was built with.
    pub fn index_of(&self, variable: &Variable) -> Option<usize> {
        self.index.index_of(variable)
    }
}

/// The algorithm-specific part of an optimizer.
///
/// The optimizer owns the step protocol (validation, aggregation, clipping,
/// build-once, step counting); an engine only allocates its slot variables
/// and updates one variable at a time.
pub trait UpdateEngine: Send + Sync {
    /// Default optimizer name, used to name slot variables.
    fn name(&self) -> &str;

    /// Allocates slot variables through `store`. Called exactly once per
    /// optimizer, with the variable list of the first build.
    fn build(&mut self, var_list: &[Variable], store: &mut StateStore) -> Result<(), ParamFlowError>;

    /// Updates `variable` from `gradient`.
    ///
    /// Under replicated execution `variable` may be one replica's component
    /// of a mirrored variable; slots should be resolved with
    /// [`Variable::colocated_component`]. A `None` gradient means the
    /// variable received no gradient this step.
    fn update_step(
        &self,
        gradient: Option<&Tensor>,
        variable: &Variable,
        ctx: &StepContext<'_>,
    ) -> Result<(), ParamFlowError>;

    /// Engine hyperparameters to persist.
    fn get_config(&self) -> Result<HyperparameterMap, ParamFlowError>;

    /// Rebuilds the engine from persisted hyperparameters.
    fn from_config(config: &HyperparameterMap) -> Result<Self, ParamFlowError>
    where
        Self: Sized;
}
