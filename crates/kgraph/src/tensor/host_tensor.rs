//! Host-side dense arrays exchanged with the graph: inputs to the materializer and feeds,
//! outputs of evaluation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{dtype::DType, spec_utils};
use crate::backend::spec::{TensorLiteral, TensorSpec};
use crate::error::{Error, Result};

/// Element representation of a host array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
}

impl ElementKind {
    pub fn size_in_bytes(self) -> usize {
        match self {
            ElementKind::I8 | ElementKind::U8 | ElementKind::Bool => 1,
            ElementKind::I16 | ElementKind::U16 => 2,
            ElementKind::F32 | ElementKind::I32 | ElementKind::U32 => 4,
            ElementKind::F64 | ElementKind::I64 | ElementKind::U64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementKind::F32 => "f32",
            ElementKind::F64 => "f64",
            ElementKind::I8 => "i8",
            ElementKind::I16 => "i16",
            ElementKind::I32 => "i32",
            ElementKind::I64 => "i64",
            ElementKind::U8 => "u8",
            ElementKind::U16 => "u16",
            ElementKind::U32 => "u32",
            ElementKind::U64 => "u64",
            ElementKind::Bool => "bool",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Rust scalar types that can back a [`HostTensor`].
pub trait HostElement: Copy + Send + Sync + 'static + sealed::Sealed {
    const KIND: ElementKind;

    fn write_le(self, out: &mut Vec<u8>);
    fn read_le(bytes: &[u8]) -> Self;
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_numeric_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl HostElement for $ty {
                const KIND: ElementKind = ElementKind::$kind;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_numeric_element!(
    f32 => F32,
    f64 => F64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
);

impl sealed::Sealed for bool {}

impl HostElement for bool {
    const KIND: ElementKind = ElementKind::Bool;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }

    fn from_f64(value: f64) -> Self {
        value != 0.0
    }
}

/// Runs `$body` with `$ty` bound to the Rust scalar matching `$kind`.
macro_rules! with_element_type {
    ($kind:expr, $ty:ident => $body:expr) => {
        match $kind {
            ElementKind::F32 => {
                type $ty = f32;
                $body
            }
            ElementKind::F64 => {
                type $ty = f64;
                $body
            }
            ElementKind::I8 => {
                type $ty = i8;
                $body
            }
            ElementKind::I16 => {
                type $ty = i16;
                $body
            }
            ElementKind::I32 => {
                type $ty = i32;
                $body
            }
            ElementKind::I64 => {
                type $ty = i64;
                $body
            }
            ElementKind::U8 => {
                type $ty = u8;
                $body
            }
            ElementKind::U16 => {
                type $ty = u16;
                $body
            }
            ElementKind::U32 => {
                type $ty = u32;
                $body
            }
            ElementKind::U64 => {
                type $ty = u64;
                $body
            }
            ElementKind::Bool => {
                type $ty = bool;
                $body
            }
        }
    };
}

fn encode<T: HostElement>(values: &[T]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * T::KIND.size_in_bytes());
    for value in values {
        value.write_le(&mut bytes);
    }
    bytes
}

fn decode<T: HostElement>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(T::KIND.size_in_bytes())
        .map(T::read_le)
        .collect()
}

/// Dense row-major array living in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    dims: Vec<usize>,
    kind: ElementKind,
    bytes: Arc<[u8]>,
}

impl HostTensor {
    /// Wraps `data` as an array of the given dimensions.
    pub fn from_vec<T: HostElement>(dims: impl Into<Vec<usize>>, data: Vec<T>) -> Result<Self> {
        let dims = dims.into();
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(Error::invalid(format!(
                "host data holds {} elements but dims {:?} need {}",
                data.len(),
                dims,
                expected
            )));
        }
        Ok(HostTensor {
            dims,
            kind: T::KIND,
            bytes: Arc::from(encode(&data)),
        })
    }

    /// Builds a 2-D array from equally sized rows.
    pub fn from_rows<T, R>(rows: &[R]) -> Result<Self>
    where
        T: HostElement,
        R: AsRef<[T]>,
    {
        let cols = rows.first().map_or(0, |row| row.as_ref().len());
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (idx, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(Error::invalid(format!(
                    "ragged rows: row {idx} has {} elements, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Self::from_vec(vec![rows.len(), cols], data)
    }

    pub fn scalar<T: HostElement>(value: T) -> Self {
        HostTensor {
            dims: Vec::new(),
            kind: T::KIND,
            bytes: Arc::from(encode(&[value])),
        }
    }

    /// Zero-filled array whose elements match `dtype`.
    pub fn zeros(dims: impl Into<Vec<usize>>, dtype: DType) -> Self {
        let dims = dims.into();
        let count: usize = dims.iter().product();
        let kind = dtype.element_kind();
        HostTensor {
            dims,
            kind,
            bytes: Arc::from(vec![0u8; count * kind.size_in_bytes()]),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Graph dtype inferred from the element representation.
    pub fn dtype(&self) -> Result<DType> {
        DType::from_element(self.kind)
    }

    pub fn len(&self) -> usize {
        self.bytes.len() / self.kind.size_in_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the elements out, requiring `T` to match the stored representation exactly.
    pub fn to_vec<T: HostElement>(&self) -> Result<Vec<T>> {
        if T::KIND != self.kind {
            return Err(Error::invalid(format!(
                "host tensor stores {} elements, requested {}",
                self.kind,
                T::KIND
            )));
        }
        Ok(decode(&self.bytes))
    }

    /// Copies the elements out widened to `f64`, whatever the stored representation.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_element_type!(self.kind, T => decode::<T>(&self.bytes)
            .into_iter()
            .map(HostElement::to_f64)
            .collect())
    }

    /// Converts the elements to the representation of `dtype`.
    ///
    /// Conversion goes through `f64`, so 64-bit integers beyond 2^53 are not preserved when the
    /// representation actually changes.
    pub fn cast(&self, dtype: DType) -> HostTensor {
        let kind = dtype.element_kind();
        if kind == self.kind {
            return self.clone();
        }
        let values = self.to_f64_vec();
        let bytes = with_element_type!(kind, T => {
            let converted: Vec<T> = values.iter().map(|&value| T::from_f64(value)).collect();
            encode(&converted)
        });
        HostTensor {
            dims: self.dims.clone(),
            kind,
            bytes: Arc::from(bytes),
        }
    }

    /// Encodes the array as an engine literal of `dtype`, casting when the representation
    /// differs.
    pub fn to_literal(&self, dtype: DType) -> TensorLiteral {
        let cast = self.cast(dtype);
        let spec = TensorSpec::concrete(spec_utils::backend_dtype(dtype), &cast.dims);
        TensorLiteral::new(spec, cast.bytes)
    }

    /// Decodes an engine literal with fully concrete dimensions.
    pub fn from_literal(literal: &TensorLiteral) -> Result<HostTensor> {
        let dims = literal.spec.shape.static_dims().ok_or_else(|| {
            Error::invalid(format!(
                "cannot read back literal with non-concrete shape {}",
                literal.spec.shape
            ))
        })?;
        let dtype = spec_utils::frontend_dtype(literal.spec.dtype);
        let kind = dtype.element_kind();
        let expected = dims.iter().product::<usize>() * kind.size_in_bytes();
        if literal.bytes.len() != expected {
            return Err(Error::invalid(format!(
                "literal of {} {:?} carries {} bytes, expected {expected}",
                dtype,
                dims,
                literal.bytes.len()
            )));
        }
        Ok(HostTensor {
            dims,
            kind,
            bytes: Arc::clone(&literal.bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_infers_dims_and_kind() {
        let host = HostTensor::from_rows(&[[1.0f64, 2.0], [3.0, 4.0]]).unwrap();
        assert_eq!(host.dims(), &[2, 2]);
        assert_eq!(host.kind(), ElementKind::F64);
        assert_eq!(host.dtype().unwrap(), DType::Float64);
        assert_eq!(host.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let rows: Vec<Vec<i32>> = vec![vec![1, 2], vec![3]];
        assert!(matches!(
            HostTensor::from_rows(&rows),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn from_vec_checks_element_count() {
        assert!(HostTensor::from_vec(vec![2, 3], vec![0u8; 5]).is_err());
        let host = HostTensor::from_vec(vec![2, 3], vec![0u8; 6]).unwrap();
        assert!(matches!(host.dtype(), Err(Error::UnsupportedDType { .. })));
    }

    #[test]
    fn to_vec_requires_matching_kind() {
        let host = HostTensor::from_vec(vec![2], vec![1i32, 2]).unwrap();
        assert!(host.to_vec::<i64>().is_err());
        assert_eq!(host.to_f64_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn cast_converts_representation() {
        let host = HostTensor::from_vec(vec![3], vec![1u16, 0, 7]).unwrap();
        let cast = host.cast(DType::Float32);
        assert_eq!(cast.kind(), ElementKind::F32);
        assert_eq!(cast.to_vec::<f32>().unwrap(), vec![1.0, 0.0, 7.0]);
        let flags = host.cast(DType::Bool);
        assert_eq!(flags.to_vec::<bool>().unwrap(), vec![true, false, true]);
    }

    #[test]
    fn literal_roundtrip_keeps_values() {
        let host = HostTensor::from_vec(vec![2, 2], vec![1.5f32, -2.0, 0.25, 8.0]).unwrap();
        let literal = host.to_literal(DType::Float32);
        assert_eq!(literal.byte_len(), 16);
        let back = HostTensor::from_literal(&literal).unwrap();
        assert_eq!(back, host);
    }

    #[test]
    fn zeros_follow_dtype_width() {
        let zeros = HostTensor::zeros(vec![3, 4], DType::Int64);
        assert_eq!(zeros.len(), 12);
        assert_eq!(zeros.as_bytes().len(), 96);
        assert!(zeros.to_vec::<i64>().unwrap().iter().all(|&v| v == 0));
    }
}
