use std::sync::Arc;

use super::Tensor;
use crate::error::ParamFlowError;

impl Tensor {
    /// Applies `f` to every element, keeping shape and dtype.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Tensor {
        Tensor {
            buffer: Arc::new(self.buffer.map(f)),
            shape: self.shape.clone(),
        }
    }

    /// Combines two tensors of identical shape and dtype element-wise.
    ///
    /// No broadcasting: optimizer arithmetic always pairs a variable with a
    /// tensor of its own shape.
    pub fn zip_map(
        &self,
        other: &Tensor,
        operation: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Tensor, ParamFlowError> {
        self.check_compatible(other, operation)?;
        let buffer = self.buffer.zip_map(&other.buffer, f).ok_or_else(|| {
            ParamFlowError::InternalError(format!("{operation}: buffers disagree after checks"))
        })?;
        Ok(Tensor {
            buffer: Arc::new(buffer),
            shape: self.shape.clone(),
        })
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor, ParamFlowError> {
        self.zip_map(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor, ParamFlowError> {
        self.zip_map(other, "sub", |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor, ParamFlowError> {
        self.zip_map(other, "mul", |a, b| a * b)
    }

    pub fn mul_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x * scalar)
    }

    pub fn add_scalar(&self, scalar: f64) -> Tensor {
        self.map(|x| x + scalar)
    }

    /// Clamps every element into `[min, max]`.
    pub fn clamp(&self, min: f64, max: f64) -> Tensor {
        self.map(|x| x.max(min).min(max))
    }

    /// Sum of all elements.
    pub fn sum(&self) -> f64 {
        self.buffer.fold(0.0, |acc, x| acc + x)
    }

    /// Sum of squared elements.
    pub fn norm_squared(&self) -> f64 {
        self.buffer.fold(0.0, |acc, x| acc + x * x)
    }

    /// Euclidean (L2) norm over all elements.
    pub fn l2_norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }
}
