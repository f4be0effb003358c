//! Graph builders for every tensor operation the backend exposes.
//!
//! Each builder follows the same shape: convert inputs with
//! [`IntoTensor`](crate::tensor::IntoTensor), validate shapes and dtypes into a small plan struct
//! (static conflicts fail here), then record the node(s) inside
//! [`GraphArena::capture`](crate::ops::graph::GraphArena::capture).
//! [`GraphBackend`](crate::runtime::GraphBackend) forwards to these functions with its own arena.

pub mod activation;
pub(crate) mod common;
pub mod creation;
pub mod linalg;
pub mod stochastic;
pub mod tensor_ops;

pub use activation::softmax;
pub use creation::{constant, ones, placeholder, variable, zeros};
pub use linalg::dot;
pub use stochastic::{random_normal, random_uniform};
pub use tensor_ops::{add, divide, exp, max, mul, neg, subtract, sum};
