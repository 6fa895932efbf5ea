use std::collections::HashMap;
use std::fmt;

use paramflow_core::Variable;

/// Stable identity of a logical model variable.
///
/// A mirrored variable and every one of its per-replica components share
/// the same key, so optimizer state keyed by it is found whichever replica's
/// handle is passed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableKey(u64);

impl VariableKey {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var#{}", self.0)
    }
}

/// Key of `variable`, resolved through its distributed container if it has one.
pub fn key_of(variable: &Variable) -> VariableKey {
    match variable.distributed_container() {
        Some(container) => VariableKey(container.unique_id()),
        None => VariableKey(variable.unique_id()),
    }
}

/// Ordinal of each variable in the list the optimizer was built with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDict {
    indices: HashMap<VariableKey, usize>,
}

impl IndexDict {
    /// Maps every variable of `var_list` to its position. A variable listed
    /// twice keeps its last position.
    pub fn from_var_list(var_list: &[Variable]) -> Self {
        let indices = var_list
            .iter()
            .enumerate()
            .map(|(i, v)| (key_of(v), i))
            .collect();
        IndexDict { indices }
    }

    pub fn index_of(&self, variable: &Variable) -> Option<usize> {
        self.indices.get(&key_of(variable)).copied()
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.indices.contains_key(&key_of(variable))
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
#[path = "var_key_test.rs"]
mod tests;
