use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tensor::host_tensor::ElementKind;

/// Element data type of a graph tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Float32,
    Float64,
    Int32,
    Int64,
    Bool,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Bool => "bool",
        }
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool => 1,
            DType::Float32 | DType::Int32 => 4,
            DType::Float64 | DType::Int64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Host element representation used when reading values of this dtype back.
    pub fn element_kind(self) -> ElementKind {
        match self {
            DType::Float32 => ElementKind::F32,
            DType::Float64 => ElementKind::F64,
            DType::Int32 => ElementKind::I32,
            DType::Int64 => ElementKind::I64,
            DType::Bool => ElementKind::Bool,
        }
    }

    /// Infers the dtype of a host array from its element representation.
    ///
    /// Integer widths without a matching graph dtype (8/16-bit and unsigned) are rejected
    /// rather than silently widened.
    pub fn from_element(kind: ElementKind) -> Result<DType> {
        match kind {
            ElementKind::F32 => Ok(DType::Float32),
            ElementKind::F64 => Ok(DType::Float64),
            ElementKind::I32 => Ok(DType::Int32),
            ElementKind::I64 => Ok(DType::Int64),
            ElementKind::Bool => Ok(DType::Bool),
            other => Err(Error::unsupported(format!(
                "host elements of type {other} have no graph dtype"
            ))),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float32" | "f32" => Ok(DType::Float32),
            "float64" | "f64" => Ok(DType::Float64),
            "int32" | "i32" => Ok(DType::Int32),
            "int64" | "i64" => Ok(DType::Int64),
            "bool" => Ok(DType::Bool),
            other => Err(Error::unsupported(format!("unknown dtype name `{other}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_widths_map_to_matching_dtypes() {
        assert_eq!(DType::from_element(ElementKind::F64).unwrap(), DType::Float64);
        assert_eq!(DType::from_element(ElementKind::F32).unwrap(), DType::Float32);
        assert_eq!(DType::from_element(ElementKind::I64).unwrap(), DType::Int64);
        assert!(matches!(
            DType::from_element(ElementKind::U16),
            Err(Error::UnsupportedDType { .. })
        ));
    }

    #[test]
    fn names_parse_back() {
        for dtype in [
            DType::Float32,
            DType::Float64,
            DType::Int32,
            DType::Int64,
            DType::Bool,
        ] {
            assert_eq!(dtype.name().parse::<DType>().unwrap(), dtype);
            assert_eq!(DType::from_element(dtype.element_kind()).unwrap(), dtype);
        }
        assert!("complex64".parse::<DType>().is_err());
    }
}
