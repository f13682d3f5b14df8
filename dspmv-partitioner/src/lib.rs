//! Offline partition planner: hypergraph construction, row assignment, and
//! per-process partition file derivation.
pub mod hypergraph;
pub mod partitioner_trait;
pub mod plan;
