use paramflow_core::tensor::Tensor;

// Shared helpers for the integration tests of this crate.
// Not every test binary uses every helper.

#[allow(dead_code)]
pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[allow(dead_code)]
pub(crate) fn create_test_tensor_f64(data: Vec<f64>, shape: Vec<usize>) -> Tensor {
    Tensor::new_f64(data, shape).expect("Test tensor creation failed")
}

#[allow(dead_code)]
pub(crate) fn scalar_values(tensors: &[Tensor]) -> Vec<f64> {
    tensors
        .iter()
        .map(|t| t.item().expect("scalar tensor"))
        .collect()
}
