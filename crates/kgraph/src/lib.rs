//! Keras-style backend over a portable graph engine.
//!
//! Builders record symbolic [`Tensor`]s with partially known shapes into the graph owned by a
//! [`GraphBackend`]; evaluation lowers the needed subgraph into a [`backend::spec::Program`] and
//! runs it on any [`PortableBackend`] implementation.

pub mod backend;
mod env;
pub mod error;
pub mod ops;
pub mod runtime;
pub mod tensor;

pub use backend::spec::PortableBackend;
pub use error::{Error, Result};
pub use runtime::{with_backend, BackendConfig, FeedDict, GraphBackend, Session};
pub use tensor::{
    DType, ElementKind, HostElement, HostTensor, IntoTensor, Shape, Tensor, TensorRole,
};
