//! Session and feed plumbing for evaluating graph tensors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::spec::{PortableBackend, ValueId};
use crate::error::{Error, Result};
use crate::ops::graph::GraphArena;
use crate::tensor::{HostTensor, Tensor, TensorRole};

/// Values bound to placeholders for a single evaluation.
///
/// Entries are checked against the placeholder when inserted: the dtype inferred from the host
/// array must equal the placeholder's, and the dims must realize its (possibly partial) shape.
#[derive(Debug, Clone, Default)]
pub struct FeedDict {
    arena: Option<usize>,
    entries: HashMap<ValueId, HostTensor>,
}

impl FeedDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<B: PortableBackend + 'static>(
        &mut self,
        placeholder: &Tensor<B>,
        value: HostTensor,
    ) -> Result<&mut Self> {
        if placeholder.role() != TensorRole::Placeholder {
            return Err(Error::invalid(format!(
                "cannot feed {}: it is a {:?}, not a placeholder",
                placeholder.label(),
                placeholder.role()
            )));
        }
        let arena = placeholder.arena().id();
        if self.arena.is_some_and(|existing| existing != arena) {
            return Err(Error::BackendMismatch);
        }

        let dtype = value.dtype()?;
        if dtype != placeholder.dtype() {
            return Err(Error::DTypeMismatch {
                op: "feed",
                expected: placeholder.dtype(),
                got: dtype,
            });
        }
        if !placeholder.shape().is_compatible_with(value.dims()) {
            return Err(Error::shape(
                "feed",
                format!(
                    "value of dims {:?} does not fit placeholder {} of shape {}",
                    value.dims(),
                    placeholder.label(),
                    placeholder.shape()
                ),
            ));
        }

        self.arena = Some(arena);
        self.entries.insert(placeholder.value(), value);
        Ok(self)
    }

    pub(crate) fn arena_id(&self) -> Option<usize> {
        self.arena
    }

    pub(crate) fn get(&self, value: ValueId) -> Option<&HostTensor> {
        self.entries.get(&value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Execution context bound to one graph.
pub struct Session<B: PortableBackend + 'static> {
    arena: Arc<GraphArena<B>>,
}

impl<B: PortableBackend + 'static> Session<B> {
    pub(crate) fn new(arena: Arc<GraphArena<B>>) -> Self {
        Session { arena }
    }

    /// Evaluates `targets` in one engine run and returns their values in order.
    pub fn run(&self, targets: &[&Tensor<B>], feeds: &FeedDict) -> Result<Vec<HostTensor>> {
        let mut ids = Vec::with_capacity(targets.len());
        for target in targets {
            if !target.belongs_to(&self.arena) {
                return Err(Error::BackendMismatch);
            }
            ids.push(target.value());
        }
        self.arena.evaluate(&ids, feeds)
    }
}
