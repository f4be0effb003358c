use crate::env;
use crate::tensor::DType;

/// Construction-time settings of a [`GraphBackend`](super::GraphBackend).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    /// Dtype used when a builder is not given one.
    pub floatx: DType,
    /// Graph-level seed for random ops created without an explicit seed.
    pub seed: Option<u64>,
}

impl BackendConfig {
    /// Reads `KGRAPH_FLOATX` and `KGRAPH_SEED`.
    pub fn from_env() -> Self {
        BackendConfig {
            floatx: env::default_floatx(),
            seed: env::default_seed(),
        }
    }

    pub fn with_floatx(mut self, floatx: DType) -> Self {
        self.floatx = floatx;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
