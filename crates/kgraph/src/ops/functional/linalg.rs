//! Matrix products expressed through the engine's `DotGeneral` operation.

use std::sync::Arc;

use crate::backend::spec::{DotGeneralSpec, Operation, PortableBackend};
use crate::error::Result;
use crate::ops::functional::common::{ensure_numeric, ensure_same_dtype, op_result};
use crate::ops::graph::GraphArena;
use crate::tensor::{spec_utils, IntoTensor, Shape, Tensor};

struct DotPlan {
    spec: DotGeneralSpec,
    output_shape: Shape,
}

/// Validates dtypes and derives the contraction plus the static output shape.
///
/// Conflicting known contraction extents fail here; if either side is unknown the engine checks
/// the extents when the program runs.
fn validate_dot<B: PortableBackend + 'static>(
    lhs: &Tensor<B>,
    rhs: &Tensor<B>,
) -> Result<DotPlan> {
    ensure_same_dtype("dot", lhs, rhs)?;
    ensure_numeric("dot", lhs.dtype())?;

    let output_shape = Shape::dot(lhs.shape(), rhs.shape())?;
    let lhs_rank = lhs.shape().rank().unwrap_or(1);
    Ok(DotPlan {
        spec: DotGeneralSpec {
            contract_lhs: lhs_rank - 1,
            contract_rhs: 0,
        },
        output_shape,
    })
}

/// Contracts the last axis of `lhs` with the first axis of `rhs`.
///
/// The result has rank `rank(lhs) + rank(rhs) - 2`: the free axes of `lhs` followed by those of
/// `rhs`.
pub fn dot<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    lhs: impl IntoTensor<B>,
    rhs: impl IntoTensor<B>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let lhs = lhs.into_tensor(arena)?;
    let rhs = rhs.into_tensor(arena)?;
    let plan = validate_dot(&lhs, &rhs)?;
    let spec = spec_utils::backend_spec(&plan.output_shape, lhs.dtype());

    let value = arena.capture(|builder| {
        let lhs_id = builder.import(&lhs)?;
        let rhs_id = builder.import(&rhs)?;
        Ok(builder.emit(
            Operation::DotGeneral(plan.spec),
            vec![lhs_id, rhs_id],
            spec,
        ))
    })?;
    Ok(op_result(arena, value, plan.output_shape, lhs.dtype(), None))
}
