//! Internal graph bookkeeping structures shared by the arena, builder, and planner.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::spec::{Operation, PortableBackend, TensorLiteral, TensorSpec, ValueId};

/// Lifecycle of an arena's graph. Disposal drops every node (and with it every engine handle).
pub(super) enum ArenaState<B: PortableBackend + 'static> {
    Live(GraphInner<B>),
    Disposed,
}

/// Mutable graph storage protected by a mutex inside [`GraphArena`](super::arena::GraphArena).
pub(super) struct GraphInner<B: PortableBackend + 'static> {
    pub(super) next_value: u32,
    pub(super) nodes: HashMap<ValueId, NodeRecord<B>>,
    /// Creation order; operands always precede their users.
    pub(super) order: Vec<ValueId>,
    pub(super) seeds_issued: u64,
}

impl<B: PortableBackend + 'static> GraphInner<B> {
    pub(super) fn new() -> Self {
        GraphInner {
            next_value: 0,
            nodes: HashMap::new(),
            order: Vec::new(),
            seeds_issued: 0,
        }
    }

    pub(super) fn insert(&mut self, value: ValueId, record: NodeRecord<B>) {
        self.nodes.insert(value, record);
        self.order.push(value);
    }
}

pub(super) struct NodeRecord<B: PortableBackend + 'static> {
    pub(super) kind: NodeKind<B>,
    /// Static engine spec; may contain unknown axes.
    pub(super) spec: TensorSpec,
    pub(super) name: Option<Arc<str>>,
}

impl<B: PortableBackend + 'static> NodeRecord<B> {
    pub(super) fn label(&self, value: ValueId) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => value.to_string(),
        }
    }
}

pub(super) enum NodeKind<B: PortableBackend + 'static> {
    Placeholder,
    /// Storage materialised on the engine when the variable was created.
    Variable(B::TensorHandle),
    Constant(TensorLiteral),
    Op {
        op: Operation,
        operands: Vec<ValueId>,
    },
}

impl<B: PortableBackend + 'static> NodeKind<B> {
    pub(super) fn operands(&self) -> &[ValueId] {
        match self {
            NodeKind::Op { operands, .. } => operands,
            _ => &[],
        }
    }
}
