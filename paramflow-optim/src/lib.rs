//! Optimizer base for paramflow.
//!
//! [`Optimizer`] owns the step protocol shared by every gradient-based
//! optimizer: lazy one-time creation of slot variables, gradient clipping,
//! cross-replica aggregation, per-variable dispatch and step counting. The
//! algorithm itself plugs in through [`UpdateEngine`]; [`Sgd`] is the
//! reference engine.

pub mod aggregation;
pub mod config;
pub mod execution;
pub mod grad_clipping;
pub mod hyperparameter;
pub mod optimizer;
pub mod restored;
pub mod schedule;
pub mod sgd;
pub mod state_store;
pub mod update_engine;
pub mod var_key;

pub use config::OptimizerConfig;
pub use grad_clipping::ClipConfig;
pub use hyperparameter::{Hyperparameter, HyperparameterCell};
pub use optimizer::{Optimizer, OptimizerOptions};
pub use restored::RestoredEngine;
pub use sgd::Sgd;
pub use state_store::{StateStore, VariableOptions};
pub use update_engine::{StepContext, UpdateEngine};
pub use var_key::{key_of, IndexDict, VariableKey};
