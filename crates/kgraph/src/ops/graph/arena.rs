//! Shared arena that stores the symbolic graph of one backend instance.
//!
//! Every tensor handle holds an `Arc` to the arena that recorded it, so handles from different
//! backend instances can never be mixed silently. The arena owns:
//!
//! - the node table (placeholders, variables with their engine storage, constants, op results);
//! - the engine used to materialise variables and run programs;
//! - the base of the seed sequence handed to random ops created without an explicit seed.
//!
//! ## Evaluation
//!
//! `evaluate` walks operand edges from the requested targets, lowers the closure into a single
//! entry function (see `plan.rs`), uploads feeds, runs the program, and reads results back into
//! host arrays. Nothing is cached between evaluations; variable storage is the only state that
//! outlives a call.
//!
//! ## Disposal
//!
//! `dispose` swaps the graph for a tombstone. Node records, and with them every engine handle,
//! are dropped right away; later captures or evaluations fail with `DisposedBackend`.

use std::sync::{
    atomic::{AtomicUsize, Ordering as AtomicOrdering},
    Arc, Mutex, MutexGuard,
};
use std::time::Instant;

use crate::backend::spec::{BackendError, PortableBackend, TensorInit, ValueId};
use crate::error::{Error, Result};
use crate::runtime::FeedDict;
use crate::tensor::HostTensor;

use super::builder::GraphBuilder;
use super::plan::{prepare_plan, PlanInput};
use super::state::{ArenaState, GraphInner};

/// Central storage for the graph built on top of a single engine instance.
pub struct GraphArena<B: PortableBackend + 'static> {
    backend: Arc<B>,
    inner: Mutex<ArenaState<B>>,
    seed_base: u64,
    id: usize,
}

static ARENA_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

impl<B: PortableBackend + 'static> GraphArena<B> {
    /// Creates a new arena wrapping the provided engine.
    ///
    /// `graph_seed` fixes the seed sequence for random ops created without a seed; without it the
    /// sequence starts from a random base.
    pub fn new(backend: Arc<B>, graph_seed: Option<u64>) -> Arc<Self> {
        let id = ARENA_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
        let seed_base = graph_seed.unwrap_or_else(rand::random);
        Arc::new(GraphArena {
            backend,
            inner: Mutex::new(ArenaState::Live(GraphInner::new())),
            seed_base,
            id,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Returns the underlying engine handle.
    pub fn backend(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }

    pub(super) fn seed_base(&self) -> u64 {
        self.seed_base
    }

    fn lock(&self) -> MutexGuard<'_, ArenaState<B>> {
        self.inner.lock().expect("graph arena poisoned")
    }

    pub fn is_disposed(&self) -> bool {
        matches!(*self.lock(), ArenaState::Disposed)
    }

    /// Fails with `DisposedBackend` once the graph has been released.
    pub fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::DisposedBackend);
        }
        Ok(())
    }

    /// Number of nodes recorded so far.
    pub fn node_count(&self) -> Result<usize> {
        match &*self.lock() {
            ArenaState::Live(inner) => Ok(inner.nodes.len()),
            ArenaState::Disposed => Err(Error::DisposedBackend),
        }
    }

    /// Runs `f` with exclusive access to the graph so it can import tensors and emit nodes.
    pub fn capture<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&mut GraphBuilder<'_, B>) -> Result<T>,
    {
        let mut guard = self.lock();
        let ArenaState::Live(inner) = &mut *guard else {
            return Err(Error::DisposedBackend);
        };
        let mut builder = GraphBuilder { arena: self, inner };
        f(&mut builder)
    }

    /// Releases the graph and every engine handle it holds.
    ///
    /// A second call reports `DisposedBackend` and leaves the arena untouched.
    pub fn dispose(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.lock(), ArenaState::Disposed);
        match previous {
            ArenaState::Live(inner) => {
                log::debug!(
                    "arena {}: disposed graph with {} node(s) on {} engine",
                    self.id,
                    inner.nodes.len(),
                    self.backend.backend_name()
                );
                Ok(())
            }
            ArenaState::Disposed => Err(Error::DisposedBackend),
        }
    }

    /// Computes the values of `targets`, binding placeholders from `feeds`.
    pub fn evaluate(&self, targets: &[ValueId], feeds: &FeedDict) -> Result<Vec<HostTensor>> {
        if feeds.arena_id().is_some_and(|id| id != self.id) {
            return Err(Error::BackendMismatch);
        }

        let plan = {
            let guard = self.lock();
            let ArenaState::Live(inner) = &*guard else {
                return Err(Error::DisposedBackend);
            };
            prepare_plan::<B>(inner, targets, feeds)?
        };

        if log::log_enabled!(log::Level::Trace) {
            match plan.program.to_json_string() {
                Ok(json) => log::trace!("arena {}: program {json}", self.id),
                Err(err) => log::trace!("arena {}: program not serializable: {err}", self.id),
            }
        }

        let started = Instant::now();
        let inputs = plan
            .inputs
            .into_iter()
            .map(|input| match input {
                PlanInput::Handle(handle) => Ok(handle),
                PlanInput::Feed(literal) => self.backend.materialize(TensorInit::Literal(literal)),
            })
            .collect::<Result<Vec<_>, BackendError>>()?;
        let outputs = self.backend.run_program(&plan.program, &inputs)?;
        if outputs.len() != targets.len() {
            return Err(BackendError::execution(format!(
                "engine returned {} result(s) for {} target(s)",
                outputs.len(),
                targets.len()
            ))
            .into());
        }

        let results = outputs
            .iter()
            .zip(&plan.result_shapes)
            .map(|(handle, shape)| {
                let literal = self.backend.to_literal(handle)?;
                let host = HostTensor::from_literal(&literal)?;
                if !shape.is_compatible_with(host.dims()) {
                    return Err(BackendError::execution(format!(
                        "engine returned dims {:?} for a value of shape {shape}",
                        host.dims()
                    ))
                    .into());
                }
                Ok(host)
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "arena {}: evaluated {} target(s) with {} input(s) on {} in {:?}",
            self.id,
            targets.len(),
            inputs.len(),
            self.backend.backend_name(),
            started.elapsed()
        );
        Ok(results)
    }
}
