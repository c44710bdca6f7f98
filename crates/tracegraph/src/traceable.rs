//! Traceable base type and construction-time bulk overrides.
//!
//! Rust has no way to intercept a user-defined constructor body at
//! definition time the way a dynamic language can hook `__init__`. The
//! structural substitute: the only way to obtain a [`TraceableId`]/home-
//! graph binding is through [`TraceableBase::new`], whose fields are
//! private to this crate. A user type cannot fabricate one by hand, so
//! there is no construction path that bypasses the binding-and-bulk-
//! override step described below.

use std::any::Any;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracegraph_common::{GraphError, TraceableId};

use crate::graph::Graph;
use crate::notifier::{self, Callback, Notifier, SubscriptionId};

/// Implemented by every user-defined traceable type. `#[derive(Traceable)]`
/// (from `tracegraph-macros`) generates this for structs with a
/// `TraceableBase` field and one or more `Cell<Self, T>` fields; it can
/// also be written by hand (see the crate-level docs).
pub trait Traceable: Sized {
    /// A human-readable type name, used in error messages and as part of a
    /// fresh vertex's debug identity. Not used for equality or hashing.
    const TYPE_NAME: &'static str;

    fn base(&self) -> &TraceableBase;

    /// Apply construction-time bulk overrides: a mapping of cell name to
    /// override value, where any unknown name fails construction. The
    /// default implementation rejects any override, since a hand-written
    /// `Traceable` impl with no generated dispatch has no way to recognize
    /// cell names. `#[derive(Traceable)]` overrides this with a per-field
    /// `match`.
    fn apply_overrides(&self, overrides: CellOverrides) -> Result<(), GraphError> {
        overrides.reject_all(Self::TYPE_NAME)
    }
}

/// Minimal base member every traceable struct embeds: identity and the
/// home graph the instance was constructed under.
pub struct TraceableBase {
    id: TraceableId,
    home_graph: Graph,
    notifier: Rc<Notifier>,
}

impl TraceableBase {
    /// Binds a fresh identity to the graph that is current on this thread
    /// right now. Fails with `GraphError::Context` if no graph is active:
    /// constructing a traceable must occur inside an active graph region.
    pub fn new() -> Result<Self, GraphError> {
        let home_graph = Graph::current()?;
        let id = TraceableId::fresh();
        let notifier = Rc::new(Notifier::new());
        notifier::register_traceable_notifier(id, &notifier);
        Ok(Self {
            id,
            home_graph,
            notifier,
        })
    }

    pub fn id(&self) -> TraceableId {
        self.id
    }

    /// The graph this instance was constructed under. Advisory only: cell
    /// reads always resolve against the current graph, which may be a
    /// nested scenario graph different from this one.
    pub fn home_graph(&self) -> &Graph {
        &self.home_graph
    }

    /// Subscribe to changes on any cell of this specific instance.
    pub fn subscribe(&self, cb: &Rc<Callback>) -> SubscriptionId {
        self.notifier.subscribe(cb)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.notifier.unsubscribe(id);
    }
}

/// A type-erased, by-name bundle of construction-time overrides, consumed
/// by [`Traceable::apply_overrides`]. Maps cell names to initial values;
/// unknown names fail with `GraphError::Definition`.
#[derive(Default)]
pub struct CellOverrides {
    values: FxHashMap<&'static str, Box<dyn Any>>,
}

impl CellOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an override by cell name. Last write for a given name wins.
    pub fn with<T: 'static>(mut self, name: &'static str, value: T) -> Self {
        self.values.insert(name, Box::new(value));
        self
    }

    /// Remove and downcast the override for `name`, if present and of the
    /// expected type. Used by generated `apply_overrides` impls, one call
    /// per declared cell.
    pub fn take<T: 'static>(&mut self, name: &'static str) -> Option<T> {
        let boxed = self.values.remove(name)?;
        match boxed.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(boxed) => {
                // Put it back so `reject_all`/leftover-name diagnostics still
                // see it; a type mismatch on a known name is still a
                // construction-time misuse, just one `take` alone can't name
                // precisely (the generated code treats "absent after every
                // known field has had its `take` turn" as "unknown name").
                self.values.insert(name, boxed);
                None
            }
        }
    }

    /// Fail if any overrides remain after every known cell name has had a
    /// chance to claim its entry via `take`. Used both by generated
    /// `apply_overrides` impls and by the default trait impl (which claims
    /// no names at all).
    pub fn reject_all(self, traceable_type: &'static str) -> Result<(), GraphError> {
        match self.values.keys().next() {
            Some(name) => Err(GraphError::definition(traceable_type, *name)),
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Construct a traceable instance: build it via `build` (which must itself
/// call `TraceableBase::new()` while assembling the struct) and then apply
/// `overrides`, failing the whole construction on an unknown name.
///
/// This free function exists alongside `Traceable::apply_overrides` because
/// Rust cannot express "run the constructor, then call a method on the
/// freshly built value, and hand the value back only if that call
/// succeeds" as a single derive-generated associated function without a
/// fallible-constructor convention; callers (hand-written or macro-
/// generated `Owner::new`) are expected to call this rather than returning
/// `build()`'s result directly.
pub fn construct<T: Traceable>(build: impl FnOnce() -> Result<T, GraphError>, overrides: CellOverrides) -> Result<T, GraphError> {
    let value = build()?;
    value.apply_overrides(overrides)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::cell_id;
    use crate::graph::Graph;

    struct Widget {
        base: TraceableBase,
        width: Cell<Widget, i64>,
    }

    impl Traceable for Widget {
        const TYPE_NAME: &'static str = "Widget";
        fn base(&self) -> &TraceableBase {
            &self.base
        }
        fn apply_overrides(&self, mut overrides: CellOverrides) -> Result<(), GraphError> {
            if let Some(v) = overrides.take::<i64>("width") {
                self.width.set(self, v)?;
            }
            overrides.reject_all(Self::TYPE_NAME)
        }
    }

    impl Widget {
        fn new(overrides: CellOverrides) -> Result<Self, GraphError> {
            construct(
                || {
                    Ok(Self {
                        base: TraceableBase::new()?,
                        width: Cell::default_value(cell_id!(), "width", 10),
                    })
                },
                overrides,
            )
        }
    }

    #[test]
    fn unknown_override_name_fails_construction() {
        let graph = Graph::new();
        let _g = graph.enter();
        let err = Widget::new(CellOverrides::new().with("height", 3i64)).unwrap_err();
        assert!(matches!(err, GraphError::Definition { .. }));
    }

    #[test]
    fn known_override_name_applies() {
        let graph = Graph::new();
        let _g = graph.enter();
        let w = Widget::new(CellOverrides::new().with("width", 99i64)).unwrap();
        assert_eq!(w.width.value(&w).unwrap(), 99);
    }

    #[test]
    fn construction_without_active_graph_fails_with_context_error() {
        let err = Widget::new(CellOverrides::new()).unwrap_err();
        assert!(matches!(err, GraphError::Context));
    }
}
