//! Error taxonomy surfaced by graph construction and evaluation.

use thiserror::Error;

use crate::backend::spec::BackendError;
use crate::tensor::DType;

/// Failures reported by the graph layer.
///
/// Shape and dtype conflicts are raised while the graph is being built whenever both sides are
/// statically known. Anything that can only be detected once unknown axes resolve comes back
/// from the engine as [`Error::EngineExecution`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("{op}: shape mismatch: {detail}")]
    ShapeMismatch { op: &'static str, detail: String },

    #[error("unsupported dtype: {kind}")]
    UnsupportedDType { kind: String },

    #[error("{op}: dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        op: &'static str,
        expected: DType,
        got: DType,
    },

    #[error("placeholder `{name}` has no value bound for this evaluation")]
    UnboundPlaceholder { name: String },

    #[error("backend has been disposed")]
    DisposedBackend,

    #[error("tensor belongs to a different backend instance")]
    BackendMismatch,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("engine execution failed: {0}")]
    EngineExecution(#[from] BackendError),
}

impl Error {
    pub(crate) fn shape(op: &'static str, detail: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            op,
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn unsupported(kind: impl Into<String>) -> Self {
        Error::UnsupportedDType { kind: kind.into() }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_keep_their_message() {
        let err: Error = BackendError::execution("dot contraction 3 vs 4").into();
        assert!(matches!(err, Error::EngineExecution(_)));
        assert_eq!(
            err.to_string(),
            "engine execution failed: dot contraction 3 vs 4"
        );
    }

    #[test]
    fn dtype_mismatch_names_both_sides() {
        let err = Error::DTypeMismatch {
            op: "mul",
            expected: DType::Float64,
            got: DType::Float32,
        };
        assert_eq!(
            err.to_string(),
            "mul: dtype mismatch: expected float64, got float32"
        );
    }
}
