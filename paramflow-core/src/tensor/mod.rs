// src/tensor/mod.rs

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::ParamFlowError;
use crate::types::DType;

pub mod create;
mod math;

// Re-export creation functions to make them public
pub use create::{full, full_like, ones, ones_like, zeros, zeros_like};

/// A dense, immutable, host-resident multi-dimensional array.
///
/// `Tensor` shares its buffer through an `Arc`, so clones are cheap and never
/// copy data. Every operation returns a new tensor; in-place mutation is the
/// business of `Variable`, which swaps the tensor it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub(crate) buffer: Arc<Buffer>,
    pub(crate) shape: Vec<usize>,
}

impl Tensor {
    /// Creates a new F32 tensor with the given data and shape.
    ///
    /// # Errors
    /// Returns `ParamFlowError::TensorCreationError` if the length of `data_vec`
    /// does not match the number of elements implied by `shape`.
    pub fn new(data_vec: Vec<f32>, shape: Vec<usize>) -> Result<Self, ParamFlowError> {
        Self::from_buffer(Buffer::F32(data_vec), shape)
    }

    /// Creates a new F64 tensor with the given data and shape.
    pub fn new_f64(data_vec: Vec<f64>, shape: Vec<usize>) -> Result<Self, ParamFlowError> {
        Self::from_buffer(Buffer::F64(data_vec), shape)
    }

    /// Creates a tensor of `dtype` from f64 values, converting if needed.
    pub fn from_values(
        values: Vec<f64>,
        shape: Vec<usize>,
        dtype: DType,
    ) -> Result<Self, ParamFlowError> {
        Self::from_buffer(Buffer::from_f64_values(values, dtype), shape)
    }

    /// Creates a rank-0 F32 tensor.
    pub fn scalar(value: f32) -> Self {
        Tensor {
            buffer: Arc::new(Buffer::F32(vec![value])),
            shape: Vec::new(),
        }
    }

    /// Creates a rank-0 F64 tensor.
    pub fn scalar_f64(value: f64) -> Self {
        Tensor {
            buffer: Arc::new(Buffer::F64(vec![value])),
            shape: Vec::new(),
        }
    }

    pub(crate) fn from_buffer(buffer: Buffer, shape: Vec<usize>) -> Result<Self, ParamFlowError> {
        let numel: usize = shape.iter().product();
        let data_len = buffer.len();
        if data_len != numel {
            return Err(ParamFlowError::TensorCreationError { data_len, shape });
        }
        Ok(Tensor {
            buffer: Arc::new(buffer),
            shape,
        })
    }

    /// Returns the data type (`DType`) of the tensor elements.
    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    /// Returns the tensor's shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the number of elements in the tensor.
    pub fn numel(&self) -> usize {
        self.buffer.len()
    }

    /// Copies the data out as `Vec<f32>`.
    ///
    /// # Errors
    /// `DataTypeMismatch` if the tensor is not F32.
    pub fn get_f32_data(&self) -> Result<Vec<f32>, ParamFlowError> {
        match self.buffer.as_ref() {
            Buffer::F32(v) => Ok(v.clone()),
            other => Err(ParamFlowError::DataTypeMismatch {
                expected: DType::F32,
                actual: other.dtype(),
                operation: "get_f32_data".to_string(),
            }),
        }
    }

    /// Copies the data out as `Vec<f64>`.
    ///
    /// # Errors
    /// `DataTypeMismatch` if the tensor is not F64.
    pub fn get_f64_data(&self) -> Result<Vec<f64>, ParamFlowError> {
        match self.buffer.as_ref() {
            Buffer::F64(v) => Ok(v.clone()),
            other => Err(ParamFlowError::DataTypeMismatch {
                expected: DType::F64,
                actual: other.dtype(),
                operation: "get_f64_data".to_string(),
            }),
        }
    }

    /// Copies the data out as f64 regardless of dtype.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.buffer.to_f64_vec()
    }

    /// Returns the single value of a one-element tensor.
    ///
    /// # Errors
    /// `ShapeMismatch` if the tensor holds more or fewer than one element.
    pub fn item(&self) -> Result<f64, ParamFlowError> {
        if self.numel() != 1 {
            return Err(ParamFlowError::ShapeMismatch {
                expected: vec![],
                actual: self.shape.clone(),
                operation: "item".to_string(),
            });
        }
        Ok(self.buffer.fold(0.0, |_, x| x))
    }

    /// Returns a copy of this tensor converted to `dtype`.
    pub fn cast(&self, dtype: DType) -> Tensor {
        if self.dtype() == dtype {
            return self.clone();
        }
        Tensor {
            buffer: Arc::new(Buffer::from_f64_values(self.to_f64_vec(), dtype)),
            shape: self.shape.clone(),
        }
    }

    /// Checks that `other` has the same shape and dtype as `self`.
    pub fn check_compatible(&self, other: &Tensor, operation: &str) -> Result<(), ParamFlowError> {
        if self.shape != other.shape {
            return Err(ParamFlowError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
                operation: operation.to_string(),
            });
        }
        if self.dtype() != other.dtype() {
            return Err(ParamFlowError::DataTypeMismatch {
                expected: self.dtype(),
                actual: other.dtype(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
