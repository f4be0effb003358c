//! Adapter between frontend tensor metadata and the engine's spec types.
//!
//! This is the only frontend code aware of the engine's negative sentinel for unknown axes;
//! everything above it speaks `Option<usize>`.

use crate::backend::spec::{
    DType as BackendDType, Shape as BackendShape, TensorSpec, UNKNOWN_DIM,
};
use crate::tensor::{DType as TensorDType, Shape as TensorShape};

/// Converts a frontend [`TensorShape`] into the engine shape representation.
pub(crate) fn backend_shape_from_shape(shape: &TensorShape) -> BackendShape {
    match shape.dims() {
        None => BackendShape::Unranked,
        Some(dims) => BackendShape::Ranked(
            dims.iter()
                .map(|dim| dim.map_or(UNKNOWN_DIM, |dim| dim as i64))
                .collect(),
        ),
    }
}

/// Converts an engine shape back into a frontend [`TensorShape`]; any negative extent is read as
/// unknown.
pub(crate) fn shape_from_backend(shape: &BackendShape) -> TensorShape {
    match shape.dims() {
        None => TensorShape::Unknown,
        Some(dims) => TensorShape::new(dims.iter().map(|&dim| usize::try_from(dim).ok())),
    }
}

pub(crate) fn backend_dtype(dtype: TensorDType) -> BackendDType {
    match dtype {
        TensorDType::Float32 => BackendDType::F32,
        TensorDType::Float64 => BackendDType::F64,
        TensorDType::Int32 => BackendDType::Si32,
        TensorDType::Int64 => BackendDType::Si64,
        TensorDType::Bool => BackendDType::I1,
    }
}

pub(crate) fn frontend_dtype(dtype: BackendDType) -> TensorDType {
    match dtype {
        BackendDType::F32 => TensorDType::Float32,
        BackendDType::F64 => TensorDType::Float64,
        BackendDType::Si32 => TensorDType::Int32,
        BackendDType::Si64 => TensorDType::Int64,
        BackendDType::I1 => TensorDType::Bool,
    }
}

/// Builds the engine spec for a frontend shape/dtype pair.
pub(crate) fn backend_spec(shape: &TensorShape, dtype: TensorDType) -> TensorSpec {
    TensorSpec::new(backend_dtype(dtype), backend_shape_from_shape(shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_axes_become_sentinel_and_back() {
        let shape = TensorShape::new([None, Some(2)]);
        let backend = backend_shape_from_shape(&shape);
        assert_eq!(backend, BackendShape::Ranked(vec![UNKNOWN_DIM, 2]));
        assert_eq!(shape_from_backend(&backend), shape);
    }

    #[test]
    fn unknown_rank_stays_unranked() {
        let backend = backend_shape_from_shape(&TensorShape::Unknown);
        assert_eq!(backend, BackendShape::Unranked);
        assert_eq!(shape_from_backend(&backend), TensorShape::Unknown);
    }

    #[test]
    fn dtypes_map_one_to_one() {
        for dtype in [
            TensorDType::Float32,
            TensorDType::Float64,
            TensorDType::Int32,
            TensorDType::Int64,
            TensorDType::Bool,
        ] {
            assert_eq!(frontend_dtype(backend_dtype(dtype)), dtype);
        }
    }
}
