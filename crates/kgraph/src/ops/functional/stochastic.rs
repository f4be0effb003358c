//! Seeded random sampling nodes.
//!
//! The seed is baked into the node, so re-evaluating the same node reproduces the same samples
//! on a given engine. Ops created without a seed draw one from the arena's seed sequence.

use std::sync::Arc;

use crate::backend::spec::{Operation, PortableBackend, RngNormalSpec, RngUniformSpec};
use crate::error::{Error, Result};
use crate::ops::functional::common::{ensure_float, node_name, op_result, require_static};
use crate::ops::graph::GraphArena;
use crate::tensor::{spec_utils, DType, Shape, Tensor};

#[derive(Debug)]
struct UniformPlan {
    dims: Vec<usize>,
}

/// Bounds a uniform sampler can draw from: finite, ordered, and with a finite width.
fn sampleable(low: f64, high: f64, width: f64) -> bool {
    low.is_finite() && high.is_finite() && low < high && width.is_finite()
}

fn validate_uniform(shape: &Shape, minval: f64, maxval: f64, dtype: DType) -> Result<UniformPlan> {
    ensure_float("random_uniform", dtype)?;
    let dims = require_static("random_uniform", shape)?;
    if !sampleable(minval, maxval, maxval - minval) {
        return Err(Error::invalid(format!(
            "random_uniform needs finite bounds with minval < maxval and a finite width, \
             got [{minval}, {maxval})"
        )));
    }
    if dtype == DType::Float32 {
        let (low, high) = (minval as f32, maxval as f32);
        if !sampleable(low.into(), high.into(), (high - low).into()) {
            return Err(Error::invalid(format!(
                "random_uniform bounds [{minval}, {maxval}) do not form a finite float32 range"
            )));
        }
    }
    Ok(UniformPlan { dims })
}

/// Samples i.i.d. values from `[minval, maxval)`.
pub fn random_uniform<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    shape: &Shape,
    minval: f64,
    maxval: f64,
    dtype: DType,
    seed: Option<u64>,
    name: Option<&str>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let plan = validate_uniform(shape, minval, maxval, dtype)?;
    let spec = spec_utils::backend_spec(shape, dtype);
    let name = node_name(name);
    let value = arena.capture(|builder| {
        let seed = seed.unwrap_or_else(|| builder.next_seed());
        let op = Operation::RngUniform(RngUniformSpec {
            shape: plan.dims,
            dtype: spec.dtype,
            minval,
            maxval,
            seed,
        });
        Ok(builder.emit_named(op, Vec::new(), spec, name.clone()))
    })?;
    Ok(op_result(arena, value, shape.clone(), dtype, name))
}

#[derive(Debug)]
struct NormalPlan {
    dims: Vec<usize>,
}

fn validate_normal(shape: &Shape, mean: f64, stddev: f64, dtype: DType) -> Result<NormalPlan> {
    ensure_float("random_normal", dtype)?;
    let dims = require_static("random_normal", shape)?;
    if !mean.is_finite() || !stddev.is_finite() || stddev < 0.0 {
        return Err(Error::invalid(format!(
            "random_normal needs a finite mean and a finite stddev >= 0, got mean {mean}, stddev {stddev}"
        )));
    }
    Ok(NormalPlan { dims })
}

/// Samples i.i.d. values from `N(mean, stddev^2)`.
pub fn random_normal<B: PortableBackend + 'static>(
    arena: &Arc<GraphArena<B>>,
    shape: &Shape,
    mean: f64,
    stddev: f64,
    dtype: DType,
    seed: Option<u64>,
    name: Option<&str>,
) -> Result<Tensor<B>> {
    arena.ensure_live()?;
    let plan = validate_normal(shape, mean, stddev, dtype)?;
    let spec = spec_utils::backend_spec(shape, dtype);
    let name = node_name(name);
    let value = arena.capture(|builder| {
        let seed = seed.unwrap_or_else(|| builder.next_seed());
        let op = Operation::RngNormal(RngNormalSpec {
            shape: plan.dims,
            dtype: spec.dtype,
            mean,
            stddev,
            seed,
        });
        Ok(builder.emit_named(op, Vec::new(), spec, name.clone()))
    })?;
    Ok(op_result(arena, value, shape.clone(), dtype, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_bounds_must_be_ordered() {
        let shape = Shape::known(&[2]);
        assert!(validate_uniform(&shape, 2.0, -4.0, DType::Float64).is_err());
        assert!(validate_uniform(&shape, 1.0, 1.0, DType::Float64).is_err());
        assert!(validate_uniform(&shape, -4.0, 2.0, DType::Float64).is_ok());
    }

    #[test]
    fn uniform_range_must_fit_the_sampled_dtype() {
        let shape = Shape::known(&[4]);
        let overflowing = [
            (-1e39, 0.0, DType::Float32),
            (-3e38, 3e38, DType::Float32),
            (-1e308, 1e308, DType::Float64),
        ];
        for (minval, maxval, dtype) in overflowing {
            let err = validate_uniform(&shape, minval, maxval, dtype).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{minval} {maxval} {dtype}");
        }
        assert!(validate_uniform(&shape, -1e39, 0.0, DType::Float64).is_ok());
        assert!(validate_uniform(&shape, -1e30, 1e30, DType::Float32).is_ok());
    }

    #[test]
    fn sampling_needs_float_dtype_and_known_shape() {
        let err = validate_normal(&Shape::known(&[2]), 0.0, 1.0, DType::Int32).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDType { .. }));
        let err = validate_normal(&Shape::new([None]), 0.0, 1.0, DType::Float32).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(validate_normal(&Shape::known(&[2]), 0.0, -1.0, DType::Float32).is_err());
    }
}
