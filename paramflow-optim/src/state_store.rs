use std::fmt;
use std::sync::Arc;

use paramflow_core::init::Initializer;
use paramflow_core::tensor;
use paramflow_core::{DType, ParamFlowError, Tensor, Variable};

use crate::execution::ExecutionContext;
use crate::var_key::IndexDict;

/// Shape, dtype and initializer of a standalone optimizer variable.
///
/// Defaults to an F32 scalar initialized with zeros.
#[derive(Debug, Clone, Default)]
pub struct VariableOptions {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub initializer: Initializer,
}

/// Optimizer-owned variables and the variable index.
///
/// The store is built once: the first [`StateStore::build`] records the
/// position of each model variable and every later call is a no-op.
/// Variables created here are non-trainable and named under the
/// optimizer's name.
pub struct StateStore {
    optimizer_name: String,
    context: Arc<dyn ExecutionContext>,
    index: Option<Arc<IndexDict>>,
    variables: Vec<Variable>,
}

impl StateStore {
    pub fn new(optimizer_name: impl Into<String>, context: Arc<dyn ExecutionContext>) -> Self {
        StateStore {
            optimizer_name: optimizer_name.into(),
            context,
            index: None,
            variables: Vec::new(),
        }
    }

    pub fn optimizer_name(&self) -> &str {
        &self.optimizer_name
    }

    pub fn is_built(&self) -> bool {
        self.index.is_some()
    }

    /// Builds the variable index from `var_list`.
    ///
    /// Returns `true` if this call performed the build, `false` if the store
    /// was already built.
    pub fn build(&mut self, var_list: &[Variable]) -> bool {
        if self.index.is_some() {
            return false;
        }
        self.index = Some(Arc::new(IndexDict::from_var_list(var_list)));
        true
    }

    /// Index of the built variable list, `None` before the first build.
    pub fn index_dict(&self) -> Option<Arc<IndexDict>> {
        self.index.clone()
    }

    pub fn index_of(&self, variable: &Variable) -> Option<usize> {
        self.index.as_ref().and_then(|index| index.index_of(variable))
    }

    /// Creates a standalone variable named `"{optimizer}/{name}"`.
    pub fn add_variable(
        &mut self,
        name: &str,
        options: VariableOptions,
    ) -> Result<Variable, ParamFlowError> {
        let initial = options.initializer.initialize(&options.shape, options.dtype)?;
        let full_name = format!("{}/{}", self.optimizer_name, name);
        let variable = self.context.create_variable(&full_name, initial, false)?;
        self.variables.push(variable.clone());
        Ok(variable)
    }

    /// Creates a variable shaped like `model_variable`, named
    /// `"{optimizer}/{name_prefix}/{model variable name}"` and colocated with it.
    ///
    /// The value defaults to zeros.
    ///
    /// # Errors
    /// `ShapeMismatch` or `DataTypeMismatch` if `initial_value` does not
    /// match the model variable.
    pub fn add_variable_from_reference(
        &mut self,
        model_variable: &Variable,
        name_prefix: &str,
        initial_value: Option<Tensor>,
    ) -> Result<Variable, ParamFlowError> {
        let operation = format!("initial value of '{}/{}'", name_prefix, model_variable.name());
        let initial = match initial_value {
            Some(value) => {
                if value.shape() != model_variable.shape() {
                    return Err(ParamFlowError::ShapeMismatch {
                        expected: model_variable.shape().to_vec(),
                        actual: value.shape().to_vec(),
                        operation,
                    });
                }
                if value.dtype() != model_variable.dtype() {
                    return Err(ParamFlowError::DataTypeMismatch {
                        expected: model_variable.dtype(),
                        actual: value.dtype(),
                        operation,
                    });
                }
                value
            }
            None => tensor::zeros(model_variable.shape(), model_variable.dtype())?,
        };
        let full_name = format!(
            "{}/{}/{}",
            self.optimizer_name,
            name_prefix,
            model_variable.name()
        );
        let variable = self
            .context
            .colocated_variable(model_variable, &full_name, initial, false)?;
        self.variables.push(variable.clone());
        Ok(variable)
    }

    /// Every variable created by this store, in creation order.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("optimizer_name", &self.optimizer_name)
            .field("built", &self.is_built())
            .field("variables", &self.variables.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "state_store_test.rs"]
mod tests;
