//! Elementwise arithmetic and axis reductions.

use std::sync::Arc;

use crate::backend::spec::{
    ElementwiseBinaryOp, ElementwiseUnaryOp, Operation, PortableBackend, ReduceKind, ReduceSpec,
};
use crate::error::{Error, Result};
use crate::ops::functional::common::{
    ensure_float, ensure_numeric, ensure_same_dtype, normalize_axis, op_result,
};
use crate::ops::graph::GraphArena;
use crate::tensor::{spec_utils, IntoTensor, Shape, Tensor};

struct BinaryPlan {
    output_shape: Shape,
}

fn validate_binary<B: PortableBackend + 'static>(
    op: &'static str,
    lhs: &Tensor<B>,
    rhs: &Tensor<B>,
) -> Result<BinaryPlan> {
    ensure_same_dtype(op, lhs, rhs)?;
    ensure_numeric(op, lhs.dtype())?;
    Ok(BinaryPlan {
        output_shape: Shape::broadcast(op, lhs.shape(), rhs.shape())?,
    })
}

fn elementwise_binary<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    op: &'static str,
    kind: ElementwiseBinaryOp,
    lhs: impl IntoTensor<B>,
    rhs: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let lhs = lhs.into_tensor(arena)?;
    let rhs = rhs.into_tensor(arena)?;
    let plan = validate_binary(op, &lhs, &rhs)?;
    let spec = spec_utils::backend_spec(&plan.output_shape, lhs.dtype());

    let value = arena.capture(|builder| {
        let lhs_id = builder.import(&lhs)?;
        let rhs_id = builder.import(&rhs)?;
        Ok(builder.emit(
            Operation::ElementwiseBinary(kind),
            vec![lhs_id, rhs_id],
            spec,
        ))
    })?;
    Ok(op_result(arena, value, plan.output_shape, lhs.dtype(), None))
}

/// Elementwise sum with trailing-axis broadcasting.
pub fn add<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    lhs: impl IntoTensor<B>,
    rhs: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    elementwise_binary(arena, "add", ElementwiseBinaryOp::Add, lhs, rhs)
}

pub fn subtract<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    lhs: impl IntoTensor<B>,
    rhs: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    elementwise_binary(arena, "subtract", ElementwiseBinaryOp::Sub, lhs, rhs)
}

/// Elementwise product with trailing-axis broadcasting.
///
/// Either operand may be a host array, which is embedded as a constant first.
pub fn mul<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    lhs: impl IntoTensor<B>,
    rhs: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    elementwise_binary(arena, "mul", ElementwiseBinaryOp::Mul, lhs, rhs)
}

/// Elementwise quotient. Integer division truncates and fails at run time on a zero divisor.
pub fn divide<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    lhs: impl IntoTensor<B>,
    rhs: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    elementwise_binary(arena, "divide", ElementwiseBinaryOp::Div, lhs, rhs)
}

fn elementwise_unary<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    kind: ElementwiseUnaryOp,
    x: Tensor<B>,
) -> Result<Tensor<B>> {
    let spec = x.engine_spec();
    let value = arena.capture(|builder| {
        let input = builder.import(&x)?;
        Ok(builder.emit(Operation::ElementwiseUnary(kind), vec![input], spec))
    })?;
    Ok(op_result(arena, value, x.shape().clone(), x.dtype(), None))
}

pub fn exp<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    x: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let x = x.into_tensor(arena)?;
    ensure_float("exp", x.dtype())?;
    elementwise_unary(arena, ElementwiseUnaryOp::Exp, x)
}

pub fn neg<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    x: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let x = x.into_tensor(arena)?;
    ensure_numeric("neg", x.dtype())?;
    elementwise_unary(arena, ElementwiseUnaryOp::Neg, x)
}

struct ReducePlan {
    axes: Vec<usize>,
    output_shape: Shape,
}

/// `axis = None` reduces over every axis.
fn validate_reduce<B: PortableBackend + 'static>(
    op: &'static str,
    x: &Tensor<B>,
    axis: Option<isize>,
    keepdims: bool,
) -> Result<ReducePlan> {
    ensure_numeric(op, x.dtype())?;
    let rank = x
        .shape()
        .rank()
        .ok_or_else(|| Error::invalid(format!("{op} requires an input of known rank")))?;
    let axes = match axis {
        Some(axis) => vec![normalize_axis(op, axis, rank)?],
        None => (0..rank).collect(),
    };
    Ok(ReducePlan {
        output_shape: x.shape().reduce(&axes, keepdims),
        axes,
    })
}

fn reduce<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    op: &'static str,
    kind: ReduceKind,
    x: impl IntoTensor<B>,
    axis: Option<isize>,
    keepdims: bool,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let x = x.into_tensor(arena)?;
    let plan = validate_reduce(op, &x, axis, keepdims)?;
    let spec = spec_utils::backend_spec(&plan.output_shape, x.dtype());
    let value = arena.capture(|builder| {
        let input = builder.import(&x)?;
        Ok(builder.emit(
            Operation::Reduce(ReduceSpec {
                kind,
                axes: plan.axes,
                keepdims,
            }),
            vec![input],
            spec,
        ))
    })?;
    Ok(op_result(arena, value, plan.output_shape, x.dtype(), None))
}

pub fn sum<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    x: impl IntoTensor<B>,
    axis: Option<isize>,
    keepdims: bool,
) -> Result<Tensor<B>> {
    reduce(arena, "sum", ReduceKind::Sum, x, axis, keepdims)
}

pub fn max<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    x: impl IntoTensor<B>,
    axis: Option<isize>,
    keepdims: bool,
) -> Result<Tensor<B>> {
    reduce(arena, "max", ReduceKind::Max, x, axis, keepdims)
}
