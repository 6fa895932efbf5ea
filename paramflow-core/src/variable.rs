use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::device::StorageDevice;
use crate::error::ParamFlowError;
use crate::tensor::Tensor;
use crate::types::DType;

static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(1);

fn next_unique_id() -> u64 {
    NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A mutable, named tensor owned by a model (or by an optimizer).
///
/// `Variable` is a cheap handle: clones share the same storage, and identity
/// is the process-unique id assigned at creation. Shape and dtype are fixed
/// for the lifetime of the variable; only the value changes.
///
/// A variable is either *local* (it holds a value on one device) or
/// *mirrored*: a distributed container holding one local component per
/// replica. Components keep a weak link back to their container, which is
/// how a replica-local handle is resolved to the logical variable.
#[derive(Clone)]
pub struct Variable {
    pub(crate) inner: Arc<VariableInner>,
}

pub(crate) struct VariableInner {
    unique_id: u64,
    name: String,
    trainable: bool,
    shape: Vec<usize>,
    dtype: DType,
    container: Weak<VariableInner>,
    storage: Storage,
}

enum Storage {
    Local {
        device: StorageDevice,
        replica_id: Option<usize>,
        value: RwLock<Tensor>,
    },
    Mirrored {
        components: Vec<Variable>,
    },
}

impl Variable {
    /// Creates a local variable on the CPU.
    pub fn new(name: impl Into<String>, initial_value: Tensor, trainable: bool) -> Self {
        Self::on_device(name, initial_value, trainable, StorageDevice::CPU)
    }

    /// Creates a local variable placed on `device`.
    pub fn on_device(
        name: impl Into<String>,
        initial_value: Tensor,
        trainable: bool,
        device: StorageDevice,
    ) -> Self {
        Variable {
            inner: Arc::new(VariableInner {
                unique_id: next_unique_id(),
                name: name.into(),
                trainable,
                shape: initial_value.shape().to_vec(),
                dtype: initial_value.dtype(),
                container: Weak::new(),
                storage: Storage::Local {
                    device,
                    replica_id: None,
                    value: RwLock::new(initial_value),
                },
            }),
        }
    }

    /// Creates a mirrored variable with one component per device. Component
    /// `i` lives on `devices[i]` and belongs to replica `i`.
    ///
    /// # Errors
    /// `ConfigurationError` if `devices` is empty.
    pub fn mirrored(
        name: impl Into<String>,
        initial_value: Tensor,
        trainable: bool,
        devices: &[StorageDevice],
    ) -> Result<Self, ParamFlowError> {
        if devices.is_empty() {
            return Err(ParamFlowError::ConfigurationError(
                "a mirrored variable needs at least one device".to_string(),
            ));
        }
        let name = name.into();
        let shape = initial_value.shape().to_vec();
        let dtype = initial_value.dtype();
        let inner = Arc::new_cyclic(|container: &Weak<VariableInner>| {
            let components = devices
                .iter()
                .enumerate()
                .map(|(replica_id, &device)| Variable {
                    inner: Arc::new(VariableInner {
                        unique_id: next_unique_id(),
                        name: name.clone(),
                        trainable,
                        shape: shape.clone(),
                        dtype,
                        container: container.clone(),
                        storage: Storage::Local {
                            device,
                            replica_id: Some(replica_id),
                            value: RwLock::new(initial_value.clone()),
                        },
                    }),
                })
                .collect();
            VariableInner {
                unique_id: next_unique_id(),
                name: name.clone(),
                trainable,
                shape: shape.clone(),
                dtype,
                container: Weak::new(),
                storage: Storage::Mirrored { components },
            }
        });
        Ok(Variable { inner })
    }

    /// Process-unique identity of this handle's storage.
    pub fn unique_id(&self) -> u64 {
        self.inner.unique_id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn trainable(&self) -> bool {
        self.inner.trainable
    }

    pub fn shape(&self) -> &[usize] {
        &self.inner.shape
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn numel(&self) -> usize {
        self.inner.shape.iter().product()
    }

    /// Device of a local variable; for a mirrored variable, the device of
    /// its first component.
    pub fn device(&self) -> StorageDevice {
        match &self.inner.storage {
            Storage::Local { device, .. } => *device,
            Storage::Mirrored { components } => components
                .first()
                .map(Variable::device)
                .unwrap_or_default(),
        }
    }

    /// Replica owning this component, if it is a component of a mirrored variable.
    pub fn replica_id(&self) -> Option<usize> {
        match &self.inner.storage {
            Storage::Local { replica_id, .. } => *replica_id,
            Storage::Mirrored { .. } => None,
        }
    }

    pub fn is_mirrored(&self) -> bool {
        matches!(self.inner.storage, Storage::Mirrored { .. })
    }

    /// The per-replica components of a mirrored variable, or the variable
    /// itself when it is local.
    pub fn components(&self) -> Vec<Variable> {
        match &self.inner.storage {
            Storage::Local { .. } => vec![self.clone()],
            Storage::Mirrored { components } => components.clone(),
        }
    }

    /// The mirrored container this component belongs to, if any.
    pub fn distributed_container(&self) -> Option<Variable> {
        self.inner
            .container
            .upgrade()
            .map(|inner| Variable { inner })
    }

    /// The component of the same logical variable owned by `replica_id`.
    ///
    /// Works from the container or from any of its components. Returns `None`
    /// for a plain local variable or an out-of-range replica.
    pub fn component_for_replica(&self, replica_id: usize) -> Option<Variable> {
        let container = if self.is_mirrored() {
            self.clone()
        } else {
            self.distributed_container()?
        };
        match &container.inner.storage {
            Storage::Mirrored { components } => components.get(replica_id).cloned(),
            Storage::Local { .. } => None,
        }
    }

    /// Resolves `self` to the handle that lives next to `peer`.
    ///
    /// If `self` is mirrored and `peer` is a replica-local component, the
    /// component of `self` on the same replica is returned; otherwise `self`.
    /// Update rules use this to pair a model-variable component with the
    /// matching component of its slot variable.
    pub fn colocated_component(&self, peer: &Variable) -> Variable {
        match peer.replica_id() {
            Some(replica_id) if self.is_mirrored() => self
                .component_for_replica(replica_id)
                .unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }

    /// True if both handles point to the same storage.
    pub fn ptr_eq(&self, other: &Variable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Reads the current value. A mirrored variable reads its first component.
    pub fn value(&self) -> Result<Tensor, ParamFlowError> {
        match &self.inner.storage {
            Storage::Local { value, .. } => {
                let guard = value.read().map_err(|e| ParamFlowError::LockError {
                    lock_type: "read".to_string(),
                    reason: format!("variable '{}' value lock poisoned: {}", self.name(), e),
                })?;
                Ok(guard.clone())
            }
            Storage::Mirrored { components } => match components.first() {
                Some(primary) => primary.value(),
                None => Err(ParamFlowError::InternalError(format!(
                    "mirrored variable '{}' has no components",
                    self.name()
                ))),
            },
        }
    }

    /// Replaces the value. On a mirrored variable every component is assigned.
    ///
    /// # Errors
    /// `ShapeMismatch` / `DataTypeMismatch` if `new_value` does not match the
    /// variable's shape and dtype.
    pub fn assign(&self, new_value: Tensor) -> Result<(), ParamFlowError> {
        self.update_value(|_| Ok(new_value.clone()))
    }

    /// Adds `delta` to the value in place.
    pub fn assign_add(&self, delta: &Tensor) -> Result<(), ParamFlowError> {
        self.update_value(|current| current.add(delta))
    }

    /// Subtracts `delta` from the value in place.
    pub fn assign_sub(&self, delta: &Tensor) -> Result<(), ParamFlowError> {
        self.update_value(|current| current.sub(delta))
    }

    /// Read-modify-write of the value under the variable's write lock.
    ///
    /// On a mirrored variable `f` runs once per component.
    pub fn update_value(
        &self,
        mut f: impl FnMut(&Tensor) -> Result<Tensor, ParamFlowError>,
    ) -> Result<(), ParamFlowError> {
        self.update_value_dyn(&mut f)
    }

    fn update_value_dyn(
        &self,
        f: &mut dyn FnMut(&Tensor) -> Result<Tensor, ParamFlowError>,
    ) -> Result<(), ParamFlowError> {
        match &self.inner.storage {
            Storage::Local { value, .. } => {
                let mut guard = value.write().map_err(|e| ParamFlowError::LockError {
                    lock_type: "write".to_string(),
                    reason: format!("variable '{}' value lock poisoned: {}", self.name(), e),
                })?;
                let updated = f(&*guard)?;
                self.check_value(&updated)?;
                *guard = updated;
                Ok(())
            }
            Storage::Mirrored { components } => {
                for component in components {
                    component.update_value_dyn(f)?;
                }
                Ok(())
            }
        }
    }

    fn check_value(&self, candidate: &Tensor) -> Result<(), ParamFlowError> {
        let operation = format!("assign to variable '{}'", self.name());
        if candidate.shape() != self.shape() {
            return Err(ParamFlowError::ShapeMismatch {
                expected: self.shape().to_vec(),
                actual: candidate.shape().to_vec(),
                operation,
            });
        }
        if candidate.dtype() != self.dtype() {
            return Err(ParamFlowError::DataTypeMismatch {
                expected: self.dtype(),
                actual: candidate.dtype(),
                operation,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.inner.name)
            .field("id", &self.inner.unique_id)
            .field("shape", &self.inner.shape)
            .field("dtype", &self.inner.dtype)
            .field("trainable", &self.inner.trainable)
            .field("mirrored", &self.is_mirrored())
            .finish()
    }
}

#[cfg(test)]
#[path = "variable_test.rs"]
mod tests;
