//! Symbolic tensor handles pointing at nodes of a [`GraphArena`].

use std::fmt;
use std::sync::Arc;

use crate::backend::spec::{PortableBackend, TensorSpec, ValueId};
use crate::error::{Error, Result};
use crate::ops::functional::creation;
use crate::ops::graph::GraphArena;
use crate::runtime::FeedDict;

use super::{spec_utils, DType, HostTensor, Shape};

/// How a graph node obtains its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    /// Bound from a feed at evaluation time.
    Placeholder,
    /// Engine-owned storage that persists across evaluations.
    Variable,
    /// Immutable data embedded in the graph.
    Constant,
    /// Output of an operation.
    OpResult,
}

/// Handle to one node of a graph, carrying its static metadata.
///
/// Tensors are cheap to clone and are only valid with the backend that created them.
pub struct Tensor<B: PortableBackend + 'static> {
    arena: Arc<GraphArena<B>>,
    value: ValueId,
    shape: Shape,
    dtype: DType,
    role: TensorRole,
    name: Option<Arc<str>>,
}

impl<B: PortableBackend + 'static> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Tensor {
            arena: Arc::clone(&self.arena),
            value: self.value,
            shape: self.shape.clone(),
            dtype: self.dtype,
            role: self.role,
            name: self.name.clone(),
        }
    }
}

impl<B: PortableBackend + 'static> fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("arena", &self.arena.id())
            .field("value", &self.value)
            .field("shape", &self.shape)
            .field("dtype", &self.dtype)
            .field("role", &self.role)
            .field("name", &self.name)
            .finish()
    }
}

impl<B: PortableBackend + 'static> Tensor<B> {
    pub(crate) fn new(
        arena: Arc<GraphArena<B>>,
        value: ValueId,
        shape: Shape,
        dtype: DType,
        role: TensorRole,
        name: Option<Arc<str>>,
    ) -> Self {
        Tensor {
            arena,
            value,
            shape,
            dtype,
            role,
            name,
        }
    }

    pub(crate) fn arena(&self) -> &Arc<GraphArena<B>> {
        &self.arena
    }

    pub(crate) fn belongs_to(&self, arena: &Arc<GraphArena<B>>) -> bool {
        Arc::ptr_eq(&self.arena, arena)
    }

    pub fn value(&self) -> ValueId {
        self.value
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn role(&self) -> TensorRole {
        self.role
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Rank of the tensor, `None` when unknown. Fails once the owning backend is disposed.
    pub fn ndim(&self) -> Result<Option<usize>> {
        self.arena.ensure_live()?;
        Ok(self.shape.rank())
    }

    /// Per-axis extents, `None` for the whole shape when the rank is unknown.
    pub fn int_shape(&self) -> Result<Option<Vec<Option<usize>>>> {
        self.arena.ensure_live()?;
        Ok(self.shape.dims().map(<[_]>::to_vec))
    }

    /// Static spec as the engine sees it.
    pub fn engine_spec(&self) -> TensorSpec {
        spec_utils::backend_spec(&self.shape, self.dtype)
    }

    /// Label used in diagnostics: the user-supplied name or the node id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => self.value.to_string(),
        }
    }

    /// Evaluates the tensor without feeds.
    pub fn eval(&self) -> Result<HostTensor> {
        self.eval_with(&FeedDict::new())
    }

    pub fn eval_with(&self, feeds: &FeedDict) -> Result<HostTensor> {
        let mut outputs = self.arena.evaluate(&[self.value], feeds)?;
        outputs
            .pop()
            .ok_or_else(|| Error::invalid("evaluation returned no outputs"))
    }
}

/// Values that can stand in for a graph tensor of a given arena.
///
/// Host arrays are embedded as constants on the fly; tensors from another backend instance are
/// rejected.
pub trait IntoTensor<B: PortableBackend + 'static> {
    fn into_tensor(self, arena: &Arc<GraphArena<B>>) -> Result<Tensor<B>>;
}

impl<B: PortableBackend + 'static> IntoTensor<B> for Tensor<B> {
    fn into_tensor(self, arena: &Arc<GraphArena<B>>) -> Result<Tensor<B>> {
        if !self.belongs_to(arena) {
            return Err(Error::BackendMismatch);
        }
        Ok(self)
    }
}

impl<B: PortableBackend + 'static> IntoTensor<B> for &Tensor<B> {
    fn into_tensor(self, arena: &Arc<GraphArena<B>>) -> Result<Tensor<B>> {
        self.clone().into_tensor(arena)
    }
}

impl<B: PortableBackend + 'static> IntoTensor<B> for &HostTensor {
    fn into_tensor(self, arena: &Arc<GraphArena<B>>) -> Result<Tensor<B>> {
        creation::constant(arena, self, None, None)
    }
}

impl<B: PortableBackend + 'static> IntoTensor<B> for HostTensor {
    fn into_tensor(self, arena: &Arc<GraphArena<B>>) -> Result<Tensor<B>> {
        creation::constant(arena, &self, None, None)
    }
}
