use log::warn;
use paramflow_core::{ParamFlowError, Tensor};
use serde::{Deserialize, Serialize};

/// Gradient clipping options of an optimizer.
///
/// The raw options are kept as given so they can be persisted unchanged.
/// When several are set, the first applicable one in the order `clipnorm`,
/// `global_clipnorm`, `clipvalue` is the only one applied; a non-positive
/// bound counts as not applicable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipConfig {
    pub clipnorm: Option<f64>,
    pub global_clipnorm: Option<f64>,
    pub clipvalue: Option<f64>,
}

/// The clipping actually performed for a [`ClipConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClipPolicy {
    None,
    PerTensorNorm(f64),
    GlobalNorm(f64),
    Value(f64),
}

impl ClipConfig {
    /// # Errors
    /// `ConfigurationError` if both `clipnorm` and `global_clipnorm` are given.
    pub fn new(
        clipnorm: Option<f64>,
        global_clipnorm: Option<f64>,
        clipvalue: Option<f64>,
    ) -> Result<Self, ParamFlowError> {
        let config = ClipConfig {
            clipnorm,
            global_clipnorm,
            clipvalue,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ParamFlowError> {
        if self.clipnorm.is_some() && self.global_clipnorm.is_some() {
            return Err(ParamFlowError::ConfigurationError(format!(
                "at most one of `clipnorm` and `global_clipnorm` can be set, \
                 received clipnorm={:?} and global_clipnorm={:?}",
                self.clipnorm, self.global_clipnorm
            )));
        }
        Ok(())
    }

    pub fn policy(&self) -> ClipPolicy {
        let positive = |bound: Option<f64>| bound.filter(|c| *c > 0.0);
        if let Some(c) = positive(self.clipnorm) {
            ClipPolicy::PerTensorNorm(c)
        } else if let Some(c) = positive(self.global_clipnorm) {
            ClipPolicy::GlobalNorm(c)
        } else if let Some(c) = positive(self.clipvalue) {
            ClipPolicy::Value(c)
        } else {
            ClipPolicy::None
        }
    }

    /// Clips a gradient batch, keeping positions and passing `None` through.
    pub fn clip(&self, gradients: Vec<Option<Tensor>>) -> Vec<Option<Tensor>> {
        match self.policy() {
            ClipPolicy::None => gradients,
            ClipPolicy::PerTensorNorm(c) => gradients
                .into_iter()
                .map(|g| g.map(|g| clip_by_norm(&g, c)))
                .collect(),
            ClipPolicy::GlobalNorm(c) => clip_by_global_norm(gradients, c),
            ClipPolicy::Value(c) => gradients
                .into_iter()
                .map(|g| g.map(|g| g.clamp(-c, c)))
                .collect(),
        }
    }
}

/// Rescales `gradient` so its L2 norm is at most `clip_norm`. A gradient
/// whose norm is not finite is returned unchanged.
pub fn clip_by_norm(gradient: &Tensor, clip_norm: f64) -> Tensor {
    let norm = gradient.l2_norm();
    if !norm.is_finite() {
        warn!("gradient norm is {}, skipping norm clipping for this tensor", norm);
        return gradient.clone();
    }
    gradient.mul_scalar(clip_norm / norm.max(clip_norm))
}

/// `sqrt` of the sum of squared L2 norms of the present gradients.
pub fn global_norm(gradients: &[Option<Tensor>]) -> f64 {
    gradients
        .iter()
        .flatten()
        .map(Tensor::norm_squared)
        .sum::<f64>()
        .sqrt()
}

/// Rescales every gradient by the same factor so that their global norm is
/// at most `clip_norm`. A batch whose global norm is not finite is returned
/// unchanged.
pub fn clip_by_global_norm(gradients: Vec<Option<Tensor>>, clip_norm: f64) -> Vec<Option<Tensor>> {
    let norm = global_norm(&gradients);
    if !norm.is_finite() {
        warn!(
            "global gradient norm is {}, skipping global norm clipping for this batch",
            norm
        );
        return gradients;
    }
    let scale = clip_norm / norm.max(clip_norm);
    gradients
        .into_iter()
        .map(|g| g.map(|g| g.mul_scalar(scale)))
        .collect()
}

#[cfg(test)]
#[path = "grad_clipping_test.rs"]
mod tests;
