// paramflow-core/src/tensor/tests.rs

use super::*;
use approx::assert_relative_eq;

#[test]
fn test_tensor_creation() -> Result<(), ParamFlowError> {
    let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2])?;
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.numel(), 4);
    assert_eq!(t.rank(), 2);
    assert_eq!(t.dtype(), DType::F32);
    assert_eq!(t.get_f32_data()?, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn test_tensor_creation_error() {
    let result = Tensor::new(vec![1.0, 2.0, 3.0], vec![2, 2]);
    match result {
        Err(ParamFlowError::TensorCreationError { data_len, shape }) => {
            assert_eq!(data_len, 3);
            assert_eq!(shape, vec![2, 2]);
        }
        other => panic!("Expected TensorCreationError, got {:?}", other),
    }
}

#[test]
fn test_scalar_item() -> Result<(), ParamFlowError> {
    let t = Tensor::scalar_f64(2.5);
    assert_eq!(t.rank(), 0);
    assert_eq!(t.numel(), 1);
    assert_relative_eq!(t.item()?, 2.5);

    let not_scalar = Tensor::new(vec![1.0, 2.0], vec![2])?;
    assert!(matches!(
        not_scalar.item(),
        Err(ParamFlowError::ShapeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_typed_accessors_reject_wrong_dtype() -> Result<(), ParamFlowError> {
    let t = Tensor::new_f64(vec![1.0], vec![1])?;
    assert!(matches!(
        t.get_f32_data(),
        Err(ParamFlowError::DataTypeMismatch { expected: DType::F32, actual: DType::F64, .. })
    ));
    assert_eq!(t.get_f64_data()?, vec![1.0]);
    Ok(())
}

#[test]
fn test_cast_between_dtypes() -> Result<(), ParamFlowError> {
    let t = Tensor::new(vec![0.5, -1.5], vec![2])?;
    let t64 = t.cast(DType::F64);
    assert_eq!(t64.dtype(), DType::F64);
    assert_eq!(t64.get_f64_data()?, vec![0.5, -1.5]);
    assert_eq!(t64.cast(DType::F32), t);
    Ok(())
}

#[test]
fn test_elementwise_arithmetic() -> Result<(), ParamFlowError> {
    let a = Tensor::new_f64(vec![1.0, 2.0, 3.0], vec![3])?;
    let b = Tensor::new_f64(vec![0.5, 0.5, 2.0], vec![3])?;
    assert_eq!(a.add(&b)?.get_f64_data()?, vec![1.5, 2.5, 5.0]);
    assert_eq!(a.sub(&b)?.get_f64_data()?, vec![0.5, 1.5, 1.0]);
    assert_eq!(a.mul(&b)?.get_f64_data()?, vec![0.5, 1.0, 6.0]);
    assert_eq!(a.mul_scalar(-2.0).get_f64_data()?, vec![-2.0, -4.0, -6.0]);
    assert_eq!(a.add_scalar(1.0).get_f64_data()?, vec![2.0, 3.0, 4.0]);
    Ok(())
}

#[test]
fn test_elementwise_shape_and_dtype_checks() -> Result<(), ParamFlowError> {
    let a = Tensor::new_f64(vec![1.0, 2.0], vec![2])?;
    let b = Tensor::new_f64(vec![1.0, 2.0], vec![1, 2])?;
    assert!(matches!(a.add(&b), Err(ParamFlowError::ShapeMismatch { .. })));

    let c = Tensor::new(vec![1.0, 2.0], vec![2])?;
    assert!(matches!(a.add(&c), Err(ParamFlowError::DataTypeMismatch { .. })));
    Ok(())
}

#[test]
fn test_norms_and_clamp() -> Result<(), ParamFlowError> {
    let t = Tensor::new(vec![3.0, -4.0], vec![2])?;
    assert_relative_eq!(t.norm_squared(), 25.0);
    assert_relative_eq!(t.l2_norm(), 5.0);
    assert_relative_eq!(t.sum(), -1.0);
    assert_eq!(t.clamp(-1.0, 1.0).get_f32_data()?, vec![1.0, -1.0]);
    Ok(())
}

#[test]
fn test_creation_helpers() -> Result<(), ParamFlowError> {
    let z = zeros(&[2, 3], DType::F64)?;
    assert_eq!(z.shape(), &[2, 3]);
    assert!(z.get_f64_data()?.iter().all(|&x| x == 0.0));

    let o = ones_like(&z)?;
    assert_eq!(o.dtype(), DType::F64);
    assert!(o.get_f64_data()?.iter().all(|&x| x == 1.0));

    let f = full(&[], DType::F32, 7.0)?;
    assert_relative_eq!(f.item()?, 7.0);
    Ok(())
}
