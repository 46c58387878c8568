//! Named task graph for lacquer.
//!
//! Tasks are registered by name and wired with "must complete before" edges.
//! Cycles are rejected while the graph is being defined, so a graph that
//! exists is always runnable.

pub mod executor;
pub mod graph;

pub use executor::{run, RunSummary};
pub use graph::{GraphError, Task, TaskFuture, TaskGraph, TaskResult};
