//! Activation functions.

use std::sync::Arc;

use crate::backend::spec::{
    ElementwiseBinaryOp, ElementwiseUnaryOp, Operation, PortableBackend, ReduceKind, ReduceSpec,
};
use crate::error::{Error, Result};
use crate::ops::functional::common::{ensure_float, op_result};
use crate::ops::graph::GraphArena;
use crate::tensor::{spec_utils, IntoTensor, Tensor};

struct SoftmaxPlan {
    axis: usize,
}

fn validate_softmax<B: PortableBackend + 'static>(x: &Tensor<B>) -> Result<SoftmaxPlan> {
    ensure_float("softmax", x.dtype())?;
    match x.shape().rank() {
        Some(rank) if rank >= 1 => Ok(SoftmaxPlan { axis: rank - 1 }),
        Some(_) => Err(Error::invalid("softmax requires an input of rank >= 1")),
        None => Err(Error::invalid("softmax requires an input of known rank")),
    }
}

/// Numerically stable softmax over the last axis of `x`.
///
/// The captured graph is
/// - `Reduce(Max)` with keepdims to find each row's maximum;
/// - subtract the maximum so every exponent is `<= 0`;
/// - exponentiate;
/// - `Reduce(Sum)` with keepdims for the per-row denominator;
/// - divide, broadcasting the denominator back over the row.
pub fn softmax<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    x: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let x = x.into_tensor(arena)?;
    let plan = validate_softmax(&x)?;
    let spec = x.engine_spec();
    let reduced_spec = spec_utils::backend_spec(&x.shape().reduce(&[plan.axis], true), x.dtype());
    let row_reduce = |kind| {
        Operation::Reduce(ReduceSpec {
            kind,
            axes: vec![plan.axis],
            keepdims: true,
        })
    };

    let value = arena.capture(|builder| {
        let input = builder.import(&x)?;
        let max = builder.emit(row_reduce(ReduceKind::Max), vec![input], reduced_spec.clone());
        let shifted = builder.emit(
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Sub),
            vec![input, max],
            spec.clone(),
        );
        let exp = builder.emit(
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp),
            vec![shifted],
            spec.clone(),
        );
        let sum = builder.emit(row_reduce(ReduceKind::Sum), vec![exp], reduced_spec);
        Ok(builder.emit(
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Div),
            vec![exp, sum],
            spec,
        ))
    })?;
    Ok(op_result(arena, value, x.shape().clone(), x.dtype(), None))
}
