use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use log::{debug, warn};

use crate::device::StorageDevice;
use crate::distribute::{
    cross_replica_section, in_cross_replica_section, replica_context, set_replica_context,
    DistributionStrategy, MergeFn, ReplicaContext, StrategyScope, UpdateFn,
};
use crate::error::ParamFlowError;
use crate::tensor::Tensor;
use crate::variable::Variable;

static NEXT_STRATEGY_ID: AtomicU64 = AtomicU64::new(1);

type Contribution = Vec<Option<Tensor>>;

/// In-process data-parallel strategy: one replica per device, each running
/// on its own thread, with mirrored variables.
///
/// Collectives synchronize the replica threads on a barrier. Replica 0 acts
/// as the leader: it combines all-reduce contributions and runs the body of
/// a merge call, then every replica picks up the shared result.
///
/// Every replica must issue the same sequence of collectives. When a replica
/// panics or returns an error, the barrier is broken and replicas waiting in
/// a collective (now or later in the run) get a `ReplicaError`.
#[derive(Clone)]
pub struct MirroredStrategy {
    shared: Arc<Shared>,
}

struct Shared {
    id: u64,
    devices: Vec<StorageDevice>,
    no_merge_call: bool,
    barrier: ReplicaBarrier,
    running: AtomicBool,
    contributions: Mutex<Vec<Option<Contribution>>>,
    reduced: Mutex<Option<Result<Contribution, ParamFlowError>>>,
    merged: Mutex<Option<Result<(), ParamFlowError>>>,
}

impl MirroredStrategy {
    /// Strategy over `devices` whose replicas update their own variable
    /// components directly.
    ///
    /// # Errors
    /// `ConfigurationError` if `devices` is empty.
    pub fn new(devices: Vec<StorageDevice>) -> Result<Self, ParamFlowError> {
        Self::build(devices, true)
    }

    /// Strategy over `devices` that funnels every update through a merge call.
    pub fn merge_only(devices: Vec<StorageDevice>) -> Result<Self, ParamFlowError> {
        Self::build(devices, false)
    }

    /// `num_replicas` replicas on `GPU(0)..GPU(num_replicas - 1)`.
    pub fn with_replicas(num_replicas: usize) -> Result<Self, ParamFlowError> {
        Self::new((0..num_replicas).map(StorageDevice::GPU).collect())
    }

    fn build(devices: Vec<StorageDevice>, no_merge_call: bool) -> Result<Self, ParamFlowError> {
        if devices.is_empty() {
            return Err(ParamFlowError::ConfigurationError(
                "MirroredStrategy needs at least one device".to_string(),
            ));
        }
        let n = devices.len();
        Ok(MirroredStrategy {
            shared: Arc::new(Shared {
                id: NEXT_STRATEGY_ID.fetch_add(1, Ordering::Relaxed),
                devices,
                no_merge_call,
                barrier: ReplicaBarrier::new(n),
                running: AtomicBool::new(false),
                contributions: Mutex::new(vec![None; n]),
                reduced: Mutex::new(None),
                merged: Mutex::new(None),
            }),
        })
    }

    /// Runs `f(replica_id)` on one thread per replica and collects the
    /// results in replica order.
    ///
    /// Inside `f` this strategy is the ambient strategy and the thread is in
    /// replica context.
    ///
    /// # Errors
    /// `ReplicaError` if called from inside a replica, if the strategy is
    /// already running, or if a replica panics. Otherwise the first error
    /// returned by a replica, in replica order, ignoring the errors of
    /// replicas that were only cut off by a peer's failure.
    pub fn run<T, F>(&self, f: F) -> Result<Vec<T>, ParamFlowError>
    where
        F: Fn(usize) -> Result<T, ParamFlowError> + Sync,
        T: Send,
    {
        if replica_context().is_some() {
            return Err(ParamFlowError::ReplicaError(
                "MirroredStrategy::run cannot be nested inside a replica".to_string(),
            ));
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(ParamFlowError::ReplicaError(
                "MirroredStrategy::run is already in progress".to_string(),
            ));
        }
        let n = self.num_replicas_in_sync();
        debug!("MirroredStrategy {}: running {} replicas", self.shared.id, n);
        self.reset_collectives();

        let f = &f;
        let outcomes: Vec<thread::Result<Result<T, ParamFlowError>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..n)
                .map(|replica_id| {
                    let strategy = self.clone();
                    scope.spawn(move || {
                        let strategy_id = strategy.shared.id;
                        let shared = Arc::clone(&strategy.shared);
                        let _scope = StrategyScope::enter(Arc::new(strategy));
                        set_replica_context(Some(ReplicaContext {
                            strategy_id,
                            replica_id,
                        }));
                        let out = panic::catch_unwind(AssertUnwindSafe(|| f(replica_id)));
                        set_replica_context(None);
                        if !matches!(out, Ok(Ok(_))) {
                            warn!(
                                "MirroredStrategy {}: replica {} failed, breaking the barrier",
                                strategy_id, replica_id
                            );
                            shared.barrier.break_barrier();
                        }
                        out
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().and_then(|out| out))
                .collect()
        });
        self.shared.running.store(false, Ordering::SeqCst);

        let mut results = Vec::with_capacity(n);
        let mut first_error = None;
        let mut cut_off = None;
        for (replica_id, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(Ok(value)) => results.push(value),
                Ok(Err(e)) if e == broken_barrier_error() => {
                    cut_off.get_or_insert(e);
                }
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    return Err(ParamFlowError::ReplicaError(format!(
                        "replica {} panicked",
                        replica_id
                    )))
                }
            }
        }
        match first_error.or(cut_off) {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    fn reset_collectives(&self) {
        self.shared.barrier.reset();
        self.lock(&self.shared.contributions, "contributions")
            .iter_mut()
            .for_each(|slot| *slot = None);
        *self.lock(&self.shared.reduced, "reduced") = None;
        *self.lock(&self.shared.merged, "merged") = None;
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| {
            warn!(
                "MirroredStrategy {}: recovering poisoned {} lock",
                self.shared.id, what
            );
            poisoned.into_inner()
        })
    }
}

fn sum_contributions(gathered: Vec<Option<Contribution>>) -> Result<Contribution, ParamFlowError> {
    let mut replicas = Vec::with_capacity(gathered.len());
    for (replica_id, contribution) in gathered.into_iter().enumerate() {
        replicas.push(contribution.ok_or_else(|| {
            ParamFlowError::InternalError(format!(
                "replica {} reached the all-reduce barrier without a contribution",
                replica_id
            ))
        })?);
    }
    let width = replicas.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = replicas.iter().position(|r| r.len() != width) {
        return Err(ParamFlowError::ReplicaError(format!(
            "all-reduce contributions disagree in length: replica 0 sent {}, replica {} sent {}",
            width,
            bad,
            replicas[bad].len()
        )));
    }

    let mut reduced = Vec::with_capacity(width);
    for position in 0..width {
        let mut acc: Option<Tensor> = None;
        for replica in &replicas {
            if let Some(value) = &replica[position] {
                acc = Some(match acc {
                    Some(sum) => sum.add(value)?,
                    None => value.clone(),
                });
            }
        }
        reduced.push(acc);
    }
    Ok(reduced)
}

impl DistributionStrategy for MirroredStrategy {
    fn num_replicas_in_sync(&self) -> usize {
        self.shared.devices.len()
    }

    fn devices(&self) -> Vec<StorageDevice> {
        self.shared.devices.clone()
    }

    fn current_replica(&self) -> Option<usize> {
        if in_cross_replica_section() {
            return None;
        }
        replica_context()
            .filter(|c| c.strategy_id == self.shared.id)
            .map(|c| c.replica_id)
    }

    fn is_distributed(&self) -> bool {
        true
    }

    fn supports_no_merge_call(&self) -> bool {
        self.shared.no_merge_call
    }

    fn all_reduce_sum(&self, values: Contribution) -> Result<Contribution, ParamFlowError> {
        let Some(replica_id) = self.current_replica() else {
            return Ok(values);
        };
        {
            let mut slots = self.lock(&self.shared.contributions, "contributions");
            slots[replica_id] = Some(values);
        }
        self.shared.barrier.wait()?;

        if replica_id == 0 {
            let gathered: Vec<Option<Contribution>> = self
                .lock(&self.shared.contributions, "contributions")
                .iter_mut()
                .map(Option::take)
                .collect();
            let result = sum_contributions(gathered);
            *self.lock(&self.shared.reduced, "reduced") = Some(result);
        }
        self.shared.barrier.wait()?;

        self.lock(&self.shared.reduced, "reduced")
            .clone()
            .unwrap_or_else(|| {
                Err(ParamFlowError::InternalError(
                    "all-reduce finished without a result".to_string(),
                ))
            })
    }

    fn update(&self, variable: &Variable, f: &mut UpdateFn<'_>) -> Result<(), ParamFlowError> {
        let logical = variable
            .distributed_container()
            .unwrap_or_else(|| variable.clone());
        match self.current_replica() {
            Some(replica_id) if logical.is_mirrored() => {
                let component = logical.component_for_replica(replica_id).ok_or_else(|| {
                    ParamFlowError::ReplicaError(format!(
                        "variable '{}' has no component for replica {}",
                        logical.name(),
                        replica_id
                    ))
                })?;
                f(&component)
            }
            // A local variable is shared by all replicas; only the first one writes it.
            Some(0) => f(&logical),
            Some(_) => Ok(()),
            None => {
                for component in logical.components() {
                    f(&component)?;
                }
                Ok(())
            }
        }
    }

    fn merge_call(&self, f: &mut MergeFn<'_>) -> Result<(), ParamFlowError> {
        let Some(replica_id) = self.current_replica() else {
            return f();
        };
        self.shared.barrier.wait()?;
        if replica_id == 0 {
            let result = cross_replica_section(|| f());
            *self.lock(&self.shared.merged, "merged") = Some(result);
        }
        self.shared.barrier.wait()?;

        self.lock(&self.shared.merged, "merged")
            .clone()
            .unwrap_or_else(|| {
                Err(ParamFlowError::InternalError(
                    "merge call finished without a result".to_string(),
                ))
            })
    }

    fn create_variable(
        &self,
        name: &str,
        initial_value: Tensor,
        trainable: bool,
    ) -> Result<Variable, ParamFlowError> {
        Variable::mirrored(name, initial_value, trainable, &self.shared.devices)
    }
}

fn broken_barrier_error() -> ParamFlowError {
    ParamFlowError::ReplicaError(
        "collective abandoned: another replica failed before reaching it".to_string(),
    )
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// Reusable barrier that can be broken, releasing every waiter with an error.
struct ReplicaBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl ReplicaBarrier {
    fn new(parties: usize) -> Self {
        ReplicaBarrier {
            parties,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("MirroredStrategy: recovering poisoned barrier lock");
            poisoned.into_inner()
        })
    }

    /// Blocks until every party arrives.
    ///
    /// # Errors
    /// `ReplicaError` if the barrier is, or becomes, broken.
    fn wait(&self) -> Result<(), ParamFlowError> {
        let mut state = self.lock_state();
        if state.broken {
            return Err(broken_barrier_error());
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.released.notify_all();
            return Ok(());
        }
        while state.generation == generation && !state.broken {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        if state.generation == generation {
            Err(broken_barrier_error())
        } else {
            Ok(())
        }
    }

    fn break_barrier(&self) {
        self.lock_state().broken = true;
        self.released.notify_all();
    }

    fn reset(&self) {
        *self.lock_state() = BarrierState::default();
    }
}

impl std::fmt::Debug for MirroredStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirroredStrategy")
            .field("id", &self.shared.id)
            .field("devices", &self.shared.devices)
            .field("no_merge_call", &self.shared.no_merge_call)
            .finish()
    }
}
