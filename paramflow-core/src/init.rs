use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::error::ParamFlowError;
use crate::tensor::{self, Tensor};
use crate::types::DType;

/// Signature of a user supplied initializer.
pub type InitializerFn = dyn Fn(&[usize], DType) -> Result<Tensor, ParamFlowError> + Send + Sync;

/// Produces the initial value of a newly created variable.
#[derive(Clone, Default)]
pub enum Initializer {
    /// All elements 0. This is the default.
    #[default]
    Zeros,
    /// All elements 1.
    Ones,
    /// All elements equal to the given value.
    Constant(f64),
    /// Uniform samples in `[minval, maxval)`.
    RandomUniform {
        minval: f64,
        maxval: f64,
        seed: Option<u64>,
    },
    /// Normal samples with the given mean and standard deviation.
    RandomNormal {
        mean: f64,
        stddev: f64,
        seed: Option<u64>,
    },
    /// Arbitrary function of shape and dtype.
    Custom(Arc<InitializerFn>),
}

impl Initializer {
    /// Looks an initializer up by its identifier.
    ///
    /// Recognized identifiers: `zeros`, `ones`, `random_uniform` (±0.05) and
    /// `random_normal` (mean 0, stddev 0.05).
    ///
    /// # Errors
    /// `ConfigurationError` for an unknown identifier.
    pub fn get(identifier: &str) -> Result<Self, ParamFlowError> {
        match identifier {
            "zeros" => Ok(Initializer::Zeros),
            "ones" => Ok(Initializer::Ones),
            "random_uniform" => Ok(Initializer::RandomUniform {
                minval: -0.05,
                maxval: 0.05,
                seed: None,
            }),
            "random_normal" => Ok(Initializer::RandomNormal {
                mean: 0.0,
                stddev: 0.05,
                seed: None,
            }),
            other => Err(ParamFlowError::ConfigurationError(format!(
                "unknown initializer identifier '{}'",
                other
            ))),
        }
    }

    /// Builds a tensor of `shape` and `dtype`.
    ///
    /// # Errors
    /// `ConfigurationError` for invalid distribution parameters, or whatever a
    /// custom initializer returns. A custom initializer whose output does not
    /// have the requested shape and dtype is rejected.
    pub fn initialize(&self, shape: &[usize], dtype: DType) -> Result<Tensor, ParamFlowError> {
        match self {
            Initializer::Zeros => tensor::zeros(shape, dtype),
            Initializer::Ones => tensor::ones(shape, dtype),
            Initializer::Constant(value) => tensor::full(shape, dtype, *value),
            Initializer::RandomUniform { minval, maxval, seed } => {
                if !(minval < maxval) {
                    return Err(ParamFlowError::ConfigurationError(format!(
                        "random_uniform requires minval < maxval, got [{}, {})",
                        minval, maxval
                    )));
                }
                if !(minval.is_finite() && maxval.is_finite() && (maxval - minval).is_finite()) {
                    return Err(ParamFlowError::ConfigurationError(format!(
                        "random_uniform requires a finite range, got [{}, {})",
                        minval, maxval
                    )));
                }
                let distribution = Uniform::new(*minval, *maxval);
                sample(shape, dtype, *seed, |rng| distribution.sample(rng))
            }
            Initializer::RandomNormal { mean, stddev, seed } => {
                if !(*stddev >= 0.0) {
                    return Err(ParamFlowError::ConfigurationError(format!(
                        "random_normal requires stddev >= 0, got {}",
                        stddev
                    )));
                }
                let distribution = Normal::new(*mean, *stddev).map_err(|e| {
                    ParamFlowError::ConfigurationError(format!("random_normal: {}", e))
                })?;
                sample(shape, dtype, *seed, |rng| distribution.sample(rng))
            }
            Initializer::Custom(f) => {
                let value = f(shape, dtype)?;
                if value.shape() != shape {
                    return Err(ParamFlowError::ShapeMismatch {
                        expected: shape.to_vec(),
                        actual: value.shape().to_vec(),
                        operation: "custom initializer".to_string(),
                    });
                }
                if value.dtype() != dtype {
                    return Err(ParamFlowError::DataTypeMismatch {
                        expected: dtype,
                        actual: value.dtype(),
                        operation: "custom initializer".to_string(),
                    });
                }
                Ok(value)
            }
        }
    }
}

fn sample(
    shape: &[usize],
    dtype: DType,
    seed: Option<u64>,
    mut draw: impl FnMut(&mut StdRng) -> f64,
) -> Result<Tensor, ParamFlowError> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(rand::thread_rng()).map_err(|e| {
            ParamFlowError::InternalError(format!("failed to seed initializer rng: {}", e))
        })?,
    };
    let numel: usize = shape.iter().product();
    let values: Vec<f64> = (0..numel).map(|_| draw(&mut rng)).collect();
    Tensor::from_values(values, shape.to_vec(), dtype)
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initializer::Zeros => write!(f, "Zeros"),
            Initializer::Ones => write!(f, "Ones"),
            Initializer::Constant(v) => write!(f, "Constant({})", v),
            Initializer::RandomUniform { minval, maxval, seed } => f
                .debug_struct("RandomUniform")
                .field("minval", minval)
                .field("maxval", maxval)
                .field("seed", seed)
                .finish(),
            Initializer::RandomNormal { mean, stddev, seed } => f
                .debug_struct("RandomNormal")
                .field("mean", mean)
                .field("stddev", stddev)
                .field("seed", seed)
                .finish(),
            Initializer::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

// --- Tests ---
#[cfg(test)]
#[path = "init_test.rs"]
mod tests; // Link to the test file
