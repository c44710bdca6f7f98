//! `tracegraph`: a reactive dependency-graph evaluation engine for
//! spreadsheet-style attributes ("cells") on user-defined objects
//! ("traceables").
//!
//! A traceable type declares its attributes as [`Cell`] fields, each bound
//! to either a plain default value or a zero-argument expression over
//! `&Self`. Reading a cell's value memoizes it and automatically records,
//! during evaluation, which other cells it read; those become its
//! dependencies. Overriding a cell (or clearing an override) marks its
//! dependents stale; staleness is resolved lazily, the next time a
//! dependent is read. The engine is pull-based, not reactive-push.
//!
//! A [`Graph`] is an evaluation context: a vertex table plus the stack of
//! cells currently being evaluated, used both to attribute dependencies and
//! to detect cycles. Graphs nest: a child graph's overrides are invisible
//! to its parent and are discarded when the child is dropped, which is how
//! this crate supports what-if scenario branching without disturbing a
//! baseline computation.
//!
//! ```
//! use tracegraph::{cell_id, Cell, CellOverrides, Graph, GraphError, Traceable, TraceableBase};
//!
//! struct Formula {
//!     base: TraceableBase,
//!     input: Cell<Formula, i64>,
//!     output: Cell<Formula, i64>,
//! }
//!
//! impl Traceable for Formula {
//!     const TYPE_NAME: &'static str = "Formula";
//!     fn base(&self) -> &TraceableBase {
//!         &self.base
//!     }
//! }
//!
//! impl Formula {
//!     fn new() -> Result<Self, GraphError> {
//!         Ok(Self {
//!             base: TraceableBase::new()?,
//!             input: Cell::default_value(cell_id!(), "input", 1),
//!             output: Cell::derived(cell_id!(), "output", |s: &Formula| s.input.value(s).unwrap() + 1),
//!         })
//!     }
//! }
//!
//! let graph = Graph::new();
//! let _region = graph.enter();
//! let f = Formula::new().unwrap();
//! assert_eq!(f.output.value(&f).unwrap(), 2);
//! f.input.set(&f, -1).unwrap();
//! assert_eq!(f.output.value(&f).unwrap(), 0);
//! f.input.clear(&f).unwrap();
//! assert_eq!(f.output.value(&f).unwrap(), 2);
//! # let _ = CellOverrides::new();
//! ```

mod cell;
mod clock;
mod graph;
mod notifier;
mod traceable;
mod value;
mod vertex;
mod wrappers;

pub use cell::{CallCell, Cell, IterCell};
pub use graph::{Graph, GraphGuard};
pub use notifier::{Callback, ChangeEvent, SubscriptionId};
pub use traceable::{construct, CellOverrides, Traceable, TraceableBase};
pub use value::AnyValue;
pub use vertex::VertexHandle as Vertex;
pub use wrappers::{DeferredCall, DeferredIter};

pub use tracegraph_common::{CellId, GraphError, TraceableId, VertexKey};
pub use tracegraph_macros::Traceable;

/// Not part of the public API; referenced by the expansion of [`cell_id`]
/// so the macro doesn't require callers to depend on `once_cell` directly.
#[doc(hidden)]
pub mod __private {
    pub use once_cell::sync::OnceCell;
}
