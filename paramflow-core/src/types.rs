use std::fmt;

/// Defines the possible data types for Tensor elements.
///
/// Only floating-point types are needed by optimizer state: gradients,
/// slots and hyperparameter cells are all real valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    /// 32-bit floating-point type. This is the default.
    #[default]
    F32,
    /// 64-bit floating-point type.
    F64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "float32"),
            DType::F64 => write!(f, "float64"),
        }
    }
}
