//! The error taxonomy reported by the graph engine.
//!
//! Every fallible operation on a `Graph` or a cell returns `Result<_,
//! GraphError>`; nothing here is retried implicitly.

use crate::ids::VertexKey;

/// Top-level error type for the tracegraph engine.
///
/// `Loop` is its own variant rather than nested under `Dependency`, but call
/// sites that only care whether this was a dependency-discipline violation
/// can match `GraphError::Dependency | GraphError::Loop { .. }`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum GraphError {
    /// An operation that requires an active graph was attempted with none
    /// entered on this thread.
    #[error("no graph is active on this thread")]
    Context,

    /// Construction-time misuse: an override named a cell the traceable
    /// does not declare.
    #[error("unknown cell override {cell_name:?} on {traceable_type}")]
    Definition {
        traceable_type: &'static str,
        cell_name: String,
    },

    /// An override was attempted while the evaluation stack was non-empty,
    /// i.e. one cell's expression tried to assign another cell.
    #[error("cannot override {target} while {evaluating} is evaluating")]
    Dependency {
        evaluating: String,
        target: String,
    },

    /// A vertex was re-entered while already on the evaluation stack of the
    /// same graph. The offending vertex has already been undefined by the
    /// time this error is observed.
    #[error("dependency loop of length {cycle_len} detected at vertex {vertex:?}")]
    Loop { cycle_len: usize, vertex: VertexKey },

    /// A cell expression returned an error of its own; it propagates
    /// unchanged, boxed so this crate need not be generic over it.
    #[error(transparent)]
    User(#[from] Box<dyn std::error::Error + 'static>),
}

impl GraphError {
    pub fn definition(traceable_type: &'static str, cell_name: impl Into<String>) -> Self {
        Self::Definition {
            traceable_type,
            cell_name: cell_name.into(),
        }
    }

    pub fn dependency(evaluating: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Dependency {
            evaluating: evaluating.into(),
            target: target.into(),
        }
    }

    pub fn loop_detected(cycle_len: usize, vertex: VertexKey) -> Self {
        Self::Loop { cycle_len, vertex }
    }
}

// Manual Display-adjacent helper kept off the derive: tests frequently only
// care about the discriminant, not the full message.
impl GraphError {
    pub fn is_loop(&self) -> bool {
        matches!(self, GraphError::Loop { .. })
    }

    pub fn is_dependency(&self) -> bool {
        matches!(self, GraphError::Dependency { .. } | GraphError::Loop { .. })
    }
}
