//! Backend facade: one graph plus one session over a single engine instance.

mod config;
mod session;

use std::sync::Arc;

use crate::backend::spec::PortableBackend;
use crate::error::{Error, Result};
use crate::ops::functional;
use crate::ops::graph::GraphArena;
use crate::tensor::{DType, HostTensor, IntoTensor, Shape, Tensor};

pub use config::BackendConfig;
pub use session::{FeedDict, Session};

/// Keras-style backend over a graph engine.
///
/// Owns exactly one graph and one session. Dropping the backend (or calling [`dispose`]) releases
/// both; every tensor it created then reports [`Error::DisposedBackend`].
///
/// [`dispose`]: GraphBackend::dispose
pub struct GraphBackend<B: PortableBackend + 'static> {
    arena: Arc<GraphArena<B>>,
    session: Session<B>,
    config: BackendConfig,
}

impl<B: PortableBackend + 'static> GraphBackend<B> {
    /// Creates a backend configured from the environment.
    pub fn new(engine: Arc<B>) -> Self {
        Self::with_config(engine, BackendConfig::from_env())
    }

    pub fn with_config(engine: Arc<B>, config: BackendConfig) -> Self {
        let arena = GraphArena::new(engine, config.seed);
        log::debug!(
            "arena {}: created on {} engine (floatx {}, seed {:?})",
            arena.id(),
            arena.backend().backend_name(),
            config.floatx,
            config.seed
        );
        GraphBackend {
            session: Session::new(Arc::clone(&arena)),
            arena,
            config,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn floatx(&self) -> DType {
        self.config.floatx
    }

    pub fn arena(&self) -> &Arc<GraphArena<B>> {
        &self.arena
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    pub fn engine(&self) -> Arc<B> {
        self.arena.backend()
    }

    pub fn is_disposed(&self) -> bool {
        self.arena.is_disposed()
    }

    /// Releases the graph and session. Calling it twice reports `DisposedBackend`.
    pub fn dispose(&self) -> Result<()> {
        self.arena.dispose()
    }

    fn check_owned(&self, x: &Tensor<B>) -> Result<()> {
        if !x.belongs_to(&self.arena) {
            return Err(Error::BackendMismatch);
        }
        self.arena.ensure_live()
    }

    /// Rank of `x`, `None` when unknown.
    pub fn ndim(&self, x: &Tensor<B>) -> Result<Option<usize>> {
        self.check_owned(x)?;
        x.ndim()
    }

    /// Per-axis extents of `x`; unknown axes are `None`.
    pub fn int_shape(&self, x: &Tensor<B>) -> Result<Option<Vec<Option<usize>>>> {
        self.check_owned(x)?;
        x.int_shape()
    }

    pub fn dtype(&self, x: &Tensor<B>) -> Result<DType> {
        self.check_owned(x)?;
        Ok(x.dtype())
    }

    pub fn placeholder(
        &self,
        shape: impl Into<Shape>,
        dtype: Option<DType>,
        name: Option<&str>,
    ) -> Result<Tensor<B>> {
        functional::placeholder(
            &self.arena,
            shape.into(),
            dtype.unwrap_or(self.config.floatx),
            name,
        )
    }

    /// Mutable engine storage initialised from `array`. The dtype is inferred from the host
    /// element type unless `dtype` overrides it.
    pub fn variable(
        &self,
        array: &HostTensor,
        dtype: Option<DType>,
        name: Option<&str>,
    ) -> Result<Tensor<B>> {
        functional::variable(&self.arena, array, dtype, name)
    }

    pub fn constant(
        &self,
        array: &HostTensor,
        dtype: Option<DType>,
        name: Option<&str>,
    ) -> Result<Tensor<B>> {
        functional::constant(&self.arena, array, dtype, name)
    }

    pub fn zeros(&self, shape: impl Into<Shape>, dtype: Option<DType>) -> Result<Tensor<B>> {
        functional::zeros(
            &self.arena,
            &shape.into(),
            dtype.unwrap_or(self.config.floatx),
            None,
        )
    }

    pub fn ones(&self, shape: impl Into<Shape>, dtype: Option<DType>) -> Result<Tensor<B>> {
        functional::ones(
            &self.arena,
            &shape.into(),
            dtype.unwrap_or(self.config.floatx),
            None,
        )
    }

    pub fn dot(&self, a: impl IntoTensor<B>, b: impl IntoTensor<B>) -> Result<Tensor<B>> {
        functional::dot(&self.arena, a, b)
    }

    pub fn mul(&self, a: impl IntoTensor<B>, b: impl IntoTensor<B>) -> Result<Tensor<B>> {
        functional::mul(&self.arena, a, b)
    }

    pub fn add(&self, a: impl IntoTensor<B>, b: impl IntoTensor<B>) -> Result<Tensor<B>> {
        functional::add(&self.arena, a, b)
    }

    pub fn subtract(&self, a: impl IntoTensor<B>, b: impl IntoTensor<B>) -> Result<Tensor<B>> {
        functional::subtract(&self.arena, a, b)
    }

    pub fn divide(&self, a: impl IntoTensor<B>, b: impl IntoTensor<B>) -> Result<Tensor<B>> {
        functional::divide(&self.arena, a, b)
    }

    pub fn exp(&self, x: impl IntoTensor<B>) -> Result<Tensor<B>> {
        functional::exp(&self.arena, x)
    }

    pub fn neg(&self, x: impl IntoTensor<B>) -> Result<Tensor<B>> {
        functional::neg(&self.arena, x)
    }

    pub fn sum(
        &self,
        x: impl IntoTensor<B>,
        axis: Option<isize>,
        keepdims: bool,
    ) -> Result<Tensor<B>> {
        functional::sum(&self.arena, x, axis, keepdims)
    }

    pub fn max(
        &self,
        x: impl IntoTensor<B>,
        axis: Option<isize>,
        keepdims: bool,
    ) -> Result<Tensor<B>> {
        functional::max(&self.arena, x, axis, keepdims)
    }

    pub fn softmax(&self, x: impl IntoTensor<B>) -> Result<Tensor<B>> {
        functional::softmax(&self.arena, x)
    }

    pub fn random_uniform(
        &self,
        shape: impl Into<Shape>,
        minval: f64,
        maxval: f64,
        dtype: Option<DType>,
        seed: Option<u64>,
        name: Option<&str>,
    ) -> Result<Tensor<B>> {
        functional::random_uniform(
            &self.arena,
            &shape.into(),
            minval,
            maxval,
            dtype.unwrap_or(self.config.floatx),
            seed,
            name,
        )
    }

    pub fn random_normal(
        &self,
        shape: impl Into<Shape>,
        mean: f64,
        stddev: f64,
        dtype: Option<DType>,
        seed: Option<u64>,
        name: Option<&str>,
    ) -> Result<Tensor<B>> {
        functional::random_normal(
            &self.arena,
            &shape.into(),
            mean,
            stddev,
            dtype.unwrap_or(self.config.floatx),
            seed,
            name,
        )
    }

    pub fn eval(&self, x: &Tensor<B>) -> Result<HostTensor> {
        self.eval_with(x, &FeedDict::new())
    }

    pub fn eval_with(&self, x: &Tensor<B>, feeds: &FeedDict) -> Result<HostTensor> {
        let mut outputs = self.session.run(&[x], feeds)?;
        outputs
            .pop()
            .ok_or_else(|| Error::invalid("evaluation returned no outputs"))
    }

    /// Evaluates several tensors in a single engine run.
    pub fn eval_many(&self, xs: &[&Tensor<B>], feeds: &FeedDict) -> Result<Vec<HostTensor>> {
        self.session.run(xs, feeds)
    }
}

impl<B: PortableBackend + 'static> Drop for GraphBackend<B> {
    fn drop(&mut self) {
        if !self.arena.is_disposed() {
            if let Err(err) = self.arena.dispose() {
                log::warn!("arena {}: dispose on drop failed: {err}", self.arena.id());
            }
        }
    }
}

/// Runs `f` against a fresh backend and disposes it afterwards, also when `f` fails.
pub fn with_backend<B, T, F>(engine: Arc<B>, config: BackendConfig, f: F) -> Result<T>
where
    B: PortableBackend + 'static,
    F: FnOnce(&GraphBackend<B>) -> Result<T>,
{
    let backend = GraphBackend::with_config(engine, config);
    let result = f(&backend);
    if !backend.is_disposed() {
        backend.dispose()?;
    }
    result
}
