//! The memoized cell instance.
//!
//! One `Vertex` exists per `(traceable, cell)` pair per graph that has
//! observed or created it. `Graph` owns the vertex table and all mutation
//! goes through `Graph`'s resolve/override/evaluate operations; this module
//! holds the data and the small predicates that don't need to walk graph
//! ancestry.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashSet;
use tracegraph_common::{CellId, TraceableId, VertexKey};

use crate::clock::Timestamp;
use crate::notifier::{Callback, Notifier, SubscriptionId};
use crate::value::AnyValue;

pub(crate) struct Vertex {
    pub key: VertexKey,
    pub traceable_type: &'static str,
    pub cell_name: Option<&'static str>,
    pub dependency_keys: FxHashSet<VertexKey>,
    pub evaluated: Option<Timestamp>,
    pub overridden: Option<Timestamp>,
    pub last_known: Option<Box<dyn AnyValue>>,
    pub value: Option<Box<dyn AnyValue>>,
    pub touched: Timestamp,
    pub notifier: Notifier,
}

impl Vertex {
    pub fn new_undefined(key: VertexKey, traceable_type: &'static str, cell_name: Option<&'static str>) -> Self {
        Self {
            key,
            traceable_type,
            cell_name,
            dependency_keys: FxHashSet::default(),
            evaluated: None,
            overridden: None,
            last_known: None,
            value: None,
            touched: Timestamp::ZERO,
            notifier: Notifier::new(),
        }
    }

    pub fn is_defined(&self) -> bool {
        self.evaluated.is_some() || self.overridden.is_some()
    }

    pub fn is_overridden(&self) -> bool {
        self.overridden.is_some()
    }

    /// `defined_at = overridden ?? evaluated`.
    pub fn defined_at(&self) -> Option<Timestamp> {
        self.overridden.or(self.evaluated)
    }

    pub fn describe(&self) -> String {
        format!("{}::{}", self.traceable_type, self.cell_name.unwrap_or("<cell>"))
    }

    /// Clear all evaluation state. Bumps `touched` so dependents observe the
    /// undefine as a structural change even though neither timestamp is set
    /// afterward.
    pub fn undefine(&mut self, now: Timestamp) {
        if let Some(old) = self.value.take() {
            old.close_if_deferred();
        }
        self.last_known = None;
        self.evaluated = None;
        self.overridden = None;
        self.dependency_keys.clear();
        self.touched = now;
    }
}

/// A cheap, cloneable reference to a vertex, compared by identity
/// (`Rc::ptr_eq`) for loop detection and dependency registration.
#[derive(Clone)]
pub struct VertexHandle(pub(crate) Rc<RefCell<Vertex>>);

impl VertexHandle {
    pub(crate) fn new(vertex: Vertex) -> Self {
        Self(Rc::new(RefCell::new(vertex)))
    }

    pub(crate) fn same_as(&self, other: &VertexHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn key(&self) -> VertexKey {
        self.0.borrow().key
    }

    /// `true` once this vertex has ever been evaluated or overridden.
    pub fn is_defined(&self) -> bool {
        self.0.borrow().is_defined()
    }

    pub fn is_overridden(&self) -> bool {
        self.0.borrow().is_overridden()
    }

    /// Subscribe to changes of this specific vertex.
    pub fn subscribe(&self, cb: &Rc<Callback>) -> SubscriptionId {
        self.0.borrow().notifier.subscribe(cb)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.0.borrow().notifier.unsubscribe(id);
    }

    /// A vertex handle with a fresh, unique key and no traceable/cell of its
    /// own, for exercising `DeferredCall`/`DeferredIter` in isolation from a
    /// full `Cell`/`Traceable` setup.
    #[cfg(test)]
    pub(crate) fn detached_for_test() -> Self {
        let key = VertexKey::new(TraceableId::fresh(), CellId::declare());
        Self::new(Vertex::new_undefined(key, "test::Detached", Some("detached")))
    }
}

impl PartialEq for VertexHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}
