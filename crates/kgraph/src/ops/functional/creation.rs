//! Builders that introduce new values into the graph: placeholders, variables, constants, and
//! filled tensors.

use std::sync::Arc;

use crate::backend::spec::{PortableBackend, TensorInit};
use crate::error::Result;
use crate::ops::functional::common::{node_name, require_static};
use crate::ops::graph::GraphArena;
use crate::tensor::{spec_utils, DType, HostTensor, Shape, Tensor, TensorRole};

/// Declares a graph input whose value is supplied at evaluation time.
pub fn placeholder<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    shape: Shape,
    dtype: DType,
    name: Option<&str>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let name = node_name(name);
    let spec = spec_utils::backend_spec(&shape, dtype);
    let value = arena.capture(|builder| Ok(builder.placeholder(spec, name.clone())))?;
    Ok(Tensor::new(
        Arc::clone(arena),
        value,
        shape,
        dtype,
        TensorRole::Placeholder,
        name,
    ))
}

/// Resolves the dtype of a host array: an explicit override wins, otherwise it is inferred from
/// the element representation.
fn resolve_dtype(array: &HostTensor, dtype: Option<DType>) -> Result<DType> {
    match dtype {
        Some(dtype) => Ok(dtype),
        None => array.dtype(),
    }
}

/// Allocates engine storage initialised with `array`.
pub fn variable<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    array: &HostTensor,
    dtype: Option<DType>,
    name: Option<&str>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let dtype = resolve_dtype(array, dtype)?;
    let literal = array.to_literal(dtype);
    let name = node_name(name);
    let value =
        arena.capture(|builder| builder.variable(TensorInit::Literal(literal), name.clone()))?;
    Ok(Tensor::new(
        Arc::clone(arena),
        value,
        Shape::known(array.dims()),
        dtype,
        TensorRole::Variable,
        name,
    ))
}

/// Embeds `array` in the graph as an immutable value.
pub fn constant<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    array: &HostTensor,
    dtype: Option<DType>,
    name: Option<&str>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let dtype = resolve_dtype(array, dtype)?;
    let literal = array.to_literal(dtype);
    let name = node_name(name);
    let value = arena.capture(|builder| Ok(builder.constant(literal, name.clone())))?;
    Ok(Tensor::new(
        Arc::clone(arena),
        value,
        Shape::known(array.dims()),
        dtype,
        TensorRole::Constant,
        name,
    ))
}

/// Zero-filled variable. The engine allocates the storage directly.
pub fn zeros<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    shape: &Shape,
    dtype: DType,
    name: Option<&str>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    require_static("zeros", shape)?;
    let spec = spec_utils::backend_spec(shape, dtype);
    let name = node_name(name);
    let value = arena.capture(|builder| builder.variable(TensorInit::Zeroed(spec), name.clone()))?;
    Ok(Tensor::new(
        Arc::clone(arena),
        value,
        shape.clone(),
        dtype,
        TensorRole::Variable,
        name,
    ))
}

/// One-filled variable.
pub fn ones<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    shape: &Shape,
    dtype: DType,
    name: Option<&str>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let dims = require_static("ones", shape)?;
    let count = dims.iter().product();
    let ones = HostTensor::from_vec(dims, vec![1.0f64; count])?;
    variable(arena, &ones, Some(dtype), name)
}
