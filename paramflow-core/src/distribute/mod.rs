//! Distribution strategies.
//!
//! A strategy decides how many replicas execute a training step, where
//! variables live and how replicas communicate. Code picks up the ambient
//! strategy with [`get_strategy`]; [`StrategyScope`] installs another one for
//! the current thread.

pub mod default;
pub mod mirrored;

pub use default::DefaultStrategy;
pub use mirrored::MirroredStrategy;

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::device::StorageDevice;
use crate::error::ParamFlowError;
use crate::tensor::Tensor;
use crate::variable::Variable;

/// Callback applied to one variable (or one component of it).
pub type UpdateFn<'a> = dyn FnMut(&Variable) -> Result<(), ParamFlowError> + 'a;

/// Callback run once for all replicas.
pub type MergeFn<'a> = dyn FnMut() -> Result<(), ParamFlowError> + 'a;

/// Execution strategy shared by the replicas of a training step.
///
/// Collective operations (`all_reduce_sum`, `merge_call`) must be issued by
/// every replica in the same order.
pub trait DistributionStrategy: Send + Sync {
    /// Number of replicas taking part in each step.
    fn num_replicas_in_sync(&self) -> usize;

    /// Device of each replica, indexed by replica id.
    fn devices(&self) -> Vec<StorageDevice>;

    /// Replica id of the calling thread while it runs inside a replica of
    /// this strategy, `None` in cross-replica context.
    fn current_replica(&self) -> Option<usize>;

    /// True when variables are replicated and updates go through collectives.
    fn is_distributed(&self) -> bool {
        self.num_replicas_in_sync() > 1
    }

    /// True if replicas may update their own components directly, without
    /// funnelling the update through `merge_call`.
    fn supports_no_merge_call(&self) -> bool;

    /// Element-wise sum of `values` across replicas, positionally aligned.
    ///
    /// `None` entries do not contribute; a position that is `None` on every
    /// replica stays `None`. Outside a replica the values are returned as is.
    fn all_reduce_sum(
        &self,
        values: Vec<Option<Tensor>>,
    ) -> Result<Vec<Option<Tensor>>, ParamFlowError>;

    /// Applies `f` to the parts of `variable` this context owns: the
    /// replica-local component inside a replica, every component in
    /// cross-replica context.
    fn update(&self, variable: &Variable, f: &mut UpdateFn<'_>) -> Result<(), ParamFlowError>;

    /// Runs `f` exactly once for all replicas, in cross-replica context, and
    /// hands its result to every replica.
    fn merge_call(&self, f: &mut MergeFn<'_>) -> Result<(), ParamFlowError>;

    /// Creates a variable placed the way this strategy places model variables.
    fn create_variable(
        &self,
        name: &str,
        initial_value: Tensor,
        trainable: bool,
    ) -> Result<Variable, ParamFlowError>;

    /// Scope whose variables are placed next to `variable`.
    fn colocate_with(&self, variable: &Variable) -> ColocationScope {
        ColocationScope::new(variable)
    }
}

/// Creates variables colocated with a reference variable.
///
/// A mirrored reference (or a component of one) yields mirrored variables
/// with a component on each of the reference's replica devices; a local
/// reference yields a local variable on the same device.
#[derive(Debug, Clone)]
pub struct ColocationScope {
    reference: Variable,
}

impl ColocationScope {
    pub fn new(reference: &Variable) -> Self {
        let reference = reference
            .distributed_container()
            .unwrap_or_else(|| reference.clone());
        ColocationScope { reference }
    }

    pub fn reference(&self) -> &Variable {
        &self.reference
    }

    pub fn create_variable(
        &self,
        name: &str,
        initial_value: Tensor,
        trainable: bool,
    ) -> Result<Variable, ParamFlowError> {
        if self.reference.is_mirrored() {
            let devices: Vec<StorageDevice> = self
                .reference
                .components()
                .iter()
                .map(Variable::device)
                .collect();
            Variable::mirrored(name, initial_value, trainable, &devices)
        } else {
            Ok(Variable::on_device(
                name,
                initial_value,
                trainable,
                self.reference.device(),
            ))
        }
    }
}

// --- Ambient strategy stack ---

thread_local! {
    static STRATEGY_STACK: RefCell<Vec<Arc<dyn DistributionStrategy>>> = RefCell::new(Vec::new());
}

/// The innermost strategy installed on this thread, or a [`DefaultStrategy`].
pub fn get_strategy() -> Arc<dyn DistributionStrategy> {
    STRATEGY_STACK
        .with(|stack| stack.borrow().last().cloned())
        .unwrap_or_else(|| Arc::new(DefaultStrategy::new()))
}

/// True when a strategy other than the default is installed on this thread.
pub fn has_strategy() -> bool {
    STRATEGY_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Installs a strategy for the current thread until dropped.
///
/// Scopes nest; dropping restores the previously installed strategy.
#[must_use = "the strategy is uninstalled as soon as the scope is dropped"]
pub struct StrategyScope {
    // Not Send: the scope belongs to the thread whose stack it pushed onto.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl StrategyScope {
    pub fn enter(strategy: Arc<dyn DistributionStrategy>) -> Self {
        STRATEGY_STACK.with(|stack| stack.borrow_mut().push(strategy));
        StrategyScope {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for StrategyScope {
    fn drop(&mut self) {
        STRATEGY_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

// --- Replica context ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplicaContext {
    pub(crate) strategy_id: u64,
    pub(crate) replica_id: usize,
}

thread_local! {
    static REPLICA_CONTEXT: Cell<Option<ReplicaContext>> = const { Cell::new(None) };
    static CROSS_REPLICA: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn replica_context() -> Option<ReplicaContext> {
    REPLICA_CONTEXT.with(Cell::get)
}

pub(crate) fn set_replica_context(context: Option<ReplicaContext>) {
    REPLICA_CONTEXT.with(|c| c.set(context));
}

pub(crate) fn in_cross_replica_section() -> bool {
    CROSS_REPLICA.with(Cell::get)
}

/// Runs `f` with the cross-replica flag raised on this thread.
pub(crate) fn cross_replica_section<T>(f: impl FnOnce() -> T) -> T {
    let previous = CROSS_REPLICA.with(|c| c.replace(true));
    let out = f();
    CROSS_REPLICA.with(|c| c.set(previous));
    out
}

/// Replica id of the calling thread if it is running inside a replica (and
/// not inside a merge call), whatever the strategy.
pub fn current_replica_id() -> Option<usize> {
    if in_cross_replica_section() {
        return None;
    }
    replica_context().map(|c| c.replica_id)
}

#[cfg(test)]
#[path = "distribute_test.rs"]
mod tests;
