use crate::autograd::{GradientTape, Loss};
use crate::distribute;
use crate::error::ParamFlowError;
use crate::tensor::Tensor;
use crate::types::DType;
use crate::variable::Variable;

/// Gradient tape that differentiates by central finite differences.
///
/// Every element of every watched source is perturbed by `±epsilon`, the
/// loss producer is re-evaluated and `(f(x+h) - f(x-h)) / 2h` is taken as
/// the partial derivative. The source value is restored afterwards, also
/// when the producer fails. Only [`Loss::Producer`] losses are supported.
///
/// Inside a replica of a distribution strategy the replica-local component
/// of a mirrored source is perturbed, so the producer should read that
/// component.
#[derive(Debug, Default, Clone)]
pub struct NumericalTape {
    watched: Vec<Variable>,
    epsilon: Option<f64>,
}

impl NumericalTape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed step size. By default `1e-3` for F32 sources and `1e-6` for F64.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = Some(epsilon);
        self
    }

    pub fn watched(&self) -> &[Variable] {
        &self.watched
    }

    fn is_watched(&self, variable: &Variable) -> bool {
        let id = canonical(variable).unique_id();
        self.watched.iter().any(|w| canonical(w).unique_id() == id)
    }

    fn step_for(&self, dtype: DType) -> f64 {
        self.epsilon.unwrap_or(match dtype {
            DType::F32 => 1e-3,
            DType::F64 => 1e-6,
        })
    }

    fn central_difference(
        &self,
        producer: &mut (dyn FnMut() -> Result<Tensor, ParamFlowError> + '_),
        target: &Variable,
    ) -> Result<Tensor, ParamFlowError> {
        let original = target.value()?;
        let h = self.step_for(original.dtype());
        let probed = probe_elements(producer, target, &original, h);
        // Restore before surfacing any probing error
        target.assign(original.clone())?;
        let partials = probed?;
        Tensor::from_values(partials, original.shape().to_vec(), original.dtype())
    }
}

fn canonical(variable: &Variable) -> Variable {
    variable
        .distributed_container()
        .unwrap_or_else(|| variable.clone())
}

fn local_handle(variable: &Variable) -> Variable {
    match distribute::current_replica_id() {
        Some(replica_id) if variable.is_mirrored() => variable
            .component_for_replica(replica_id)
            .unwrap_or_else(|| variable.clone()),
        _ => variable.clone(),
    }
}

fn probe_elements(
    producer: &mut (dyn FnMut() -> Result<Tensor, ParamFlowError> + '_),
    target: &Variable,
    original: &Tensor,
    h: f64,
) -> Result<Vec<f64>, ParamFlowError> {
    let base = original.to_f64_vec();
    let shape = original.shape().to_vec();
    let dtype = original.dtype();
    let mut partials = Vec::with_capacity(base.len());
    let mut probe = base.clone();
    for i in 0..base.len() {
        probe[i] = base[i] + h;
        target.assign(Tensor::from_values(probe.clone(), shape.clone(), dtype)?)?;
        let plus = producer()?.item()?;

        probe[i] = base[i] - h;
        target.assign(Tensor::from_values(probe.clone(), shape.clone(), dtype)?)?;
        let minus = producer()?.item()?;

        probe[i] = base[i];
        partials.push((plus - minus) / (2.0 * h));
    }
    Ok(partials)
}

impl GradientTape for NumericalTape {
    fn watch(&mut self, variables: &[Variable]) {
        for variable in variables {
            if !self.is_watched(variable) {
                self.watched.push(variable.clone());
            }
        }
    }

    fn gradient(
        &mut self,
        loss: &mut Loss<'_>,
        sources: &[Variable],
    ) -> Result<Vec<Option<Tensor>>, ParamFlowError> {
        let producer = match loss {
            Loss::Producer(f) => f,
            Loss::Value(_) => {
                return Err(ParamFlowError::ConfigurationError(
                    "a numerical tape cannot differentiate a precomputed loss tensor; \
                     pass a loss producer or the tape that recorded the loss"
                        .to_string(),
                ))
            }
        };
        let mut gradients = Vec::with_capacity(sources.len());
        for source in sources {
            if !self.is_watched(source) {
                gradients.push(None);
                continue;
            }
            let target = local_handle(source);
            gradients.push(Some(self.central_difference(producer.as_mut(), &target)?));
        }
        Ok(gradients)
    }
}

#[cfg(test)]
#[path = "numerical_test.rs"]
mod tests;
