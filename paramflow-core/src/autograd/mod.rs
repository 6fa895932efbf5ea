//! Differentiation scopes.
//!
//! The optimizer never differentiates anything itself; it asks a
//! [`GradientTape`] for the gradients of a loss with respect to a list of
//! variables. [`NumericalTape`] is the reference tape shipped with the crate.

pub mod numerical;

pub use numerical::NumericalTape;

use crate::error::ParamFlowError;
use crate::tensor::Tensor;
use crate::variable::Variable;

/// The loss handed to a tape.
pub enum Loss<'a> {
    /// An already computed scalar loss. Only a tape that recorded the
    /// computation producing it can differentiate it.
    Value(Tensor),
    /// A zero-argument closure evaluated under the tape.
    Producer(Box<dyn FnMut() -> Result<Tensor, ParamFlowError> + 'a>),
}

impl<'a> Loss<'a> {
    pub fn producer(f: impl FnMut() -> Result<Tensor, ParamFlowError> + 'a) -> Self {
        Loss::Producer(Box::new(f))
    }

    /// Evaluates the loss: a value is returned as is, a producer is called.
    pub fn evaluate(&mut self) -> Result<Tensor, ParamFlowError> {
        match self {
            Loss::Value(t) => Ok(t.clone()),
            Loss::Producer(f) => f(),
        }
    }

    pub fn is_producer(&self) -> bool {
        matches!(self, Loss::Producer(_))
    }
}

impl std::fmt::Debug for Loss<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Loss::Value(t) => f.debug_tuple("Value").field(t).finish(),
            Loss::Producer(_) => write!(f, "Producer(<fn>)"),
        }
    }
}

/// A scope that can compute gradients of a scalar loss.
pub trait GradientTape {
    /// Marks variables whose gradients will be requested.
    fn watch(&mut self, variables: &[Variable]);

    /// Gradients of `loss` with respect to each of `sources`, positionally
    /// aligned. A source the loss does not depend on (or that was never
    /// watched) yields `None`.
    fn gradient(
        &mut self,
        loss: &mut Loss<'_>,
        sources: &[Variable],
    ) -> Result<Vec<Option<Tensor>>, ParamFlowError>;
}
