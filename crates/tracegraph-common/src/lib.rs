//! Shared types for the tracegraph engine: stable identities for traceables,
//! cells and vertices, and the error taxonomy reported across graph
//! boundaries.
//!
//! This crate has no knowledge of evaluation, graphs, or the cell/traceable
//! object model itself. It exists so that `tracegraph-macros` (which must
//! not depend on the evaluation engine to avoid a dependency cycle with its
//! own proc-macro crate type) and `tracegraph` can agree on identity and
//! error shapes without either depending on the other's internals.

pub mod error;
pub mod ids;

pub use error::GraphError;
pub use ids::{CellId, TraceableId, VertexKey};
