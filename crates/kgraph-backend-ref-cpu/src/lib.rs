//! Reference CPU engine for `kgraph` programs.
//!
//! Interprets every instruction eagerly on host memory. Intended for tests and small graphs,
//! not for speed.

pub mod cpu;

pub use cpu::{CpuPortableBackend, CpuTensor, TensorData};
