//! Validation helpers shared by the functional builders.

use std::sync::Arc;

use crate::backend::spec::{PortableBackend, ValueId};
use crate::error::{Error, Result};
use crate::ops::graph::GraphArena;
use crate::tensor::{DType, Shape, Tensor, TensorRole};

/// Wraps a freshly emitted node as an op-result tensor.
pub(crate) fn op_result<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    value: ValueId,
    shape: Shape,
    dtype: DType,
    name: Option<Arc<str>>,
) -> Tensor<B> {
    Tensor::new(
        Arc::clone(arena),
        value,
        shape,
        dtype,
        TensorRole::OpResult,
        name,
    )
}

pub(crate) fn node_name(name: Option<&str>) -> Option<Arc<str>> {
    name.map(Arc::from)
}

pub(crate) fn ensure_same_dtype<B: PortableBackend + 'static>(
    op: &'static str,
    lhs: &Tensor<B>,
    rhs: &Tensor<B>,
) -> Result<()> {
    if lhs.dtype() != rhs.dtype() {
        return Err(Error::DTypeMismatch {
            op,
            expected: lhs.dtype(),
            got: rhs.dtype(),
        });
    }
    Ok(())
}

pub(crate) fn ensure_float(op: &'static str, dtype: DType) -> Result<()> {
    if !dtype.is_float() {
        return Err(Error::unsupported(format!(
            "{op} needs a floating dtype, got {dtype}"
        )));
    }
    Ok(())
}

pub(crate) fn ensure_numeric(op: &'static str, dtype: DType) -> Result<()> {
    if dtype == DType::Bool {
        return Err(Error::unsupported(format!("{op} is not defined for bool")));
    }
    Ok(())
}

/// Requires every axis of `shape` to be known.
pub(crate) fn require_static(op: &'static str, shape: &Shape) -> Result<Vec<usize>> {
    shape.static_dims().ok_or_else(|| {
        Error::shape(
            op,
            format!("shape {shape} must be fully known"),
        )
    })
}

/// Resolves a possibly negative axis against `rank`.
pub(crate) fn normalize_axis(op: &'static str, axis: isize, rank: usize) -> Result<usize> {
    let resolved = if axis < 0 {
        axis + rank as isize
    } else {
        axis
    };
    if resolved < 0 || resolved as usize >= rank {
        return Err(Error::invalid(format!(
            "{op}: axis {axis} is out of range for rank {rank}"
        )));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_axes_count_from_the_end() {
        assert_eq!(normalize_axis("sum", -1, 3).unwrap(), 2);
        assert_eq!(normalize_axis("sum", 0, 3).unwrap(), 0);
        assert!(normalize_axis("sum", 3, 3).is_err());
        assert!(normalize_axis("sum", -4, 3).is_err());
    }

    #[test]
    fn partial_shapes_are_not_static() {
        let err = require_static("zeros", &Shape::new([None, Some(3)])).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { op: "zeros", .. }));
        assert_eq!(require_static("zeros", &Shape::known(&[3, 4])).unwrap(), vec![3, 4]);
    }
}
