//! Graph infrastructure shared by every op builder.
//!
//! Builders record nodes into an arena-backed graph owned by one backend instance. Nothing runs
//! until a target is evaluated, at which point the arena lowers the dependency closure into a
//! program for the engine.
mod arena;
mod builder;
mod plan;
mod state;

pub use arena::GraphArena;
pub use builder::GraphBuilder;
