//! Tensor-facing types: partially known shapes, dtypes, host arrays, and the symbolic handles
//! returned by graph builders.

pub mod dtype;
mod host_tensor;
pub mod shape;
pub(crate) mod spec_utils;
mod symbolic;

pub use dtype::DType;
pub use host_tensor::{ElementKind, HostElement, HostTensor};
pub use shape::Shape;
pub use symbolic::{IntoTensor, Tensor, TensorRole};
