//! Mutable builder used to stage nodes inside a [`GraphArena`](super::arena::GraphArena).

use std::sync::Arc;

use crate::backend::spec::{
    Operation, PortableBackend, TensorInit, TensorLiteral, TensorSpec, ValueId,
};
use crate::error::{Error, Result};
use crate::tensor::Tensor;

use super::arena::GraphArena;
use super::state::{GraphInner, NodeKind, NodeRecord};

const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Context passed to capture closures for importing tensors and emitting nodes.
pub struct GraphBuilder<'a, B: PortableBackend + 'static> {
    pub(super) arena: &'a Arc<GraphArena<B>>,
    pub(super) inner: &'a mut GraphInner<B>,
}

impl<'a, B: PortableBackend + 'static> GraphBuilder<'a, B> {
    pub fn arena(&self) -> &Arc<GraphArena<B>> {
        self.arena
    }

    /// Resolves a tensor to its node id, rejecting tensors recorded by another arena.
    pub fn import(&self, tensor: &Tensor<B>) -> Result<ValueId> {
        if !tensor.belongs_to(self.arena) {
            return Err(Error::BackendMismatch);
        }
        if !self.inner.nodes.contains_key(&tensor.value()) {
            return Err(Error::invalid(format!(
                "tensor {} is not recorded in arena {}",
                tensor.value(),
                self.arena.id()
            )));
        }
        Ok(tensor.value())
    }

    pub fn placeholder(&mut self, spec: TensorSpec, name: Option<Arc<str>>) -> ValueId {
        self.record(NodeKind::Placeholder, spec, name)
    }

    /// Allocates engine storage for a variable and records it as a graph input.
    pub fn variable(&mut self, init: TensorInit, name: Option<Arc<str>>) -> Result<ValueId> {
        let spec = match &init {
            TensorInit::Literal(literal) => literal.spec.clone(),
            TensorInit::Zeroed(spec) => spec.clone(),
        };
        let handle = self.arena.backend().materialize(init)?;
        Ok(self.record(NodeKind::Variable(handle), spec, name))
    }

    pub fn constant(&mut self, literal: TensorLiteral, name: Option<Arc<str>>) -> ValueId {
        let spec = literal.spec.clone();
        self.record(NodeKind::Constant(literal), spec, name)
    }

    /// Emits an operation node and returns its output value identifier.
    pub fn emit(&mut self, op: Operation, operands: Vec<ValueId>, spec: TensorSpec) -> ValueId {
        self.emit_named(op, operands, spec, None)
    }

    pub fn emit_named(
        &mut self,
        op: Operation,
        operands: Vec<ValueId>,
        spec: TensorSpec,
        name: Option<Arc<str>>,
    ) -> ValueId {
        debug_assert!(operands.iter().all(|id| self.inner.nodes.contains_key(id)));
        self.record(NodeKind::Op { op, operands }, spec, name)
    }

    /// Returns the next seed of this arena's sequence for ops created without one.
    pub fn next_seed(&mut self) -> u64 {
        let index = self.inner.seeds_issued;
        self.inner.seeds_issued += 1;
        self.arena
            .seed_base()
            .wrapping_add(index.wrapping_mul(SEED_STRIDE))
    }

    fn record(&mut self, kind: NodeKind<B>, spec: TensorSpec, name: Option<Arc<str>>) -> ValueId {
        let value = self.allocate_value();
        self.inner.insert(value, NodeRecord { kind, spec, name });
        value
    }

    fn allocate_value(&mut self) -> ValueId {
        let id = ValueId(self.inner.next_value);
        self.inner.next_value = self.inner.next_value.wrapping_add(1);
        id
    }
}
