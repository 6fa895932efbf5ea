// src/tensor/create.rs

use crate::buffer::Buffer;
use crate::error::ParamFlowError;
use crate::tensor::Tensor;
use crate::types::DType;

/// Creates a new tensor of `dtype` filled with `value`.
pub fn full(shape: &[usize], dtype: DType, value: f64) -> Result<Tensor, ParamFlowError> {
    let numel: usize = shape.iter().product();
    let buffer = match dtype {
        DType::F32 => Buffer::F32(vec![value as f32; numel]),
        DType::F64 => Buffer::F64(vec![value; numel]),
    };
    Tensor::from_buffer(buffer, shape.to_vec())
}

/// Creates a new tensor of `dtype` filled with zeros.
pub fn zeros(shape: &[usize], dtype: DType) -> Result<Tensor, ParamFlowError> {
    full(shape, dtype, 0.0)
}

/// Creates a new tensor of `dtype` filled with ones.
pub fn ones(shape: &[usize], dtype: DType) -> Result<Tensor, ParamFlowError> {
    full(shape, dtype, 1.0)
}

/// Creates a tensor with the shape and dtype of `tensor`, filled with `value`.
pub fn full_like(tensor: &Tensor, value: f64) -> Result<Tensor, ParamFlowError> {
    full(tensor.shape(), tensor.dtype(), value)
}

/// Creates a tensor of zeros with the same shape and dtype as `tensor`.
pub fn zeros_like(tensor: &Tensor) -> Result<Tensor, ParamFlowError> {
    full_like(tensor, 0.0)
}

/// Creates a tensor of ones with the same shape and dtype as `tensor`.
pub fn ones_like(tensor: &Tensor) -> Result<Tensor, ParamFlowError> {
    full_like(tensor, 1.0)
}
