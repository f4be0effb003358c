pub mod functional;
pub mod graph;
