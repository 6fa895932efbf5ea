//! Runtime collaborators for the paramflow optimizer: a small dense tensor,
//! model variables that may be mirrored across replicas, initializers,
//! differentiation tapes and distribution strategies.

pub mod autograd;
pub mod buffer;
pub mod device;
pub mod distribute;
pub mod error;
pub mod init;
pub mod tensor;
pub mod types;
pub mod variable;

// Re-export the main types so they are reachable as `paramflow_core::Tensor` etc.
pub use device::StorageDevice;
pub use error::ParamFlowError;
pub use tensor::Tensor;
pub use types::DType;
pub use variable::Variable;

/// A batch of `(gradient, variable)` pairs. A `None` gradient means the
/// variable received no gradient for this step.
pub type GradsAndVars = Vec<(Option<Tensor>, Variable)>;
