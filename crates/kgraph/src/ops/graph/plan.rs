//! Lowers the dependency closure of a set of targets into an engine program.

use std::collections::HashSet;

use crate::backend::spec::{
    Function, Instruction, Operation, PortableBackend, Program, TensorLiteral, TensorSpec,
    ValueId,
};
use crate::error::{Error, Result};
use crate::runtime::FeedDict;
use crate::tensor::{spec_utils, Shape};

use super::state::{GraphInner, NodeKind};

pub(super) const ENTRY_FUNCTION: &str = "main";

/// Source of one entry parameter of a prepared program.
pub(super) enum PlanInput<B: PortableBackend + 'static> {
    /// Variable storage already resident on the engine.
    Handle(B::TensorHandle),
    /// Placeholder value that still needs to be uploaded.
    Feed(TensorLiteral),
}

pub(super) struct PreparedPlan<B: PortableBackend + 'static> {
    pub(super) program: Program,
    pub(super) inputs: Vec<PlanInput<B>>,
    /// Statically inferred shape of each target, used to check what the engine returns.
    pub(super) result_shapes: Vec<Shape>,
}

/// Builds the program computing `targets`.
///
/// Only nodes reachable from the targets through operand edges are included. Variables and
/// placeholders become entry parameters; constants and ops become instructions in creation
/// order, which is already topological.
pub(super) fn prepare_plan<B: PortableBackend + 'static>(
    inner: &GraphInner<B>,
    targets: &[ValueId],
    feeds: &FeedDict,
) -> Result<PreparedPlan<B>> {
    let mut needed = HashSet::new();
    let mut inputs = HashSet::new();
    for &target in targets {
        collect_dependencies(inner, target, &mut needed, &mut inputs)?;
    }

    let mut parameters: Vec<TensorSpec> = Vec::with_capacity(inputs.len());
    let mut parameter_ids = Vec::with_capacity(inputs.len());
    let mut plan_inputs = Vec::with_capacity(inputs.len());
    let mut body = Vec::with_capacity(needed.len());

    for value in inner.order.iter().copied() {
        if !needed.contains(&value) && !inputs.contains(&value) {
            continue;
        }
        let Some(record) = inner.nodes.get(&value) else {
            continue;
        };
        match &record.kind {
            NodeKind::Placeholder => {
                let feed = feeds.get(value).ok_or_else(|| Error::UnboundPlaceholder {
                    name: record.label(value),
                })?;
                let dtype = spec_utils::frontend_dtype(record.spec.dtype);
                parameters.push(record.spec.clone());
                parameter_ids.push(value);
                plan_inputs.push(PlanInput::Feed(feed.to_literal(dtype)));
            }
            NodeKind::Variable(handle) => {
                parameters.push(record.spec.clone());
                parameter_ids.push(value);
                plan_inputs.push(PlanInput::Handle(handle.clone()));
            }
            NodeKind::Constant(literal) => body.push(Instruction {
                id: value,
                op: Operation::Constant(literal.clone()),
                operands: Vec::new(),
                output: record.spec.clone(),
            }),
            NodeKind::Op { op, operands } => body.push(Instruction {
                id: value,
                op: op.clone(),
                operands: operands.clone(),
                output: record.spec.clone(),
            }),
        }
    }

    let result_shapes = targets
        .iter()
        .map(|target| {
            inner
                .nodes
                .get(target)
                .map(|record| spec_utils::shape_from_backend(&record.spec.shape))
                .ok_or_else(|| {
                    Error::invalid(format!("value {target} is not registered in this graph"))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let function = Function {
        name: ENTRY_FUNCTION.to_string(),
        parameters,
        parameter_ids,
        body,
        result_ids: targets.to_vec(),
    };

    Ok(PreparedPlan {
        program: Program::new(ENTRY_FUNCTION).with_functions(vec![function]),
        inputs: plan_inputs,
        result_shapes,
    })
}

/// Recursively collects the nodes `value` depends on, separating program inputs (variables and
/// placeholders) from nodes that must be executed.
fn collect_dependencies<B: PortableBackend + 'static>(
    inner: &GraphInner<B>,
    value: ValueId,
    needed: &mut HashSet<ValueId>,
    inputs: &mut HashSet<ValueId>,
) -> Result<()> {
    if needed.contains(&value) || inputs.contains(&value) {
        return Ok(());
    }

    let node = inner
        .nodes
        .get(&value)
        .ok_or_else(|| Error::invalid(format!("value {value} is not registered in this graph")))?;

    if matches!(node.kind, NodeKind::Placeholder | NodeKind::Variable(_)) {
        inputs.insert(value);
        return Ok(());
    }

    needed.insert(value);
    for &operand in node.kind.operands() {
        collect_dependencies(inner, operand, needed, inputs)?;
    }
    Ok(())
}
