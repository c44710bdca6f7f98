//! Cell descriptor: the per-attribute declaration binding a name and an
//! evaluation expression to a `Traceable` type.
//!
//! A `Cell<Owner, T>` is ordinary struct-field data, not a hidden global.
//! Its [`CellId`] is shared across every instance of `Owner` because it is
//! assigned once per call site via [`cell_id`]/`OnceLock`: created at
//! declaration time, lives for the process.
//!
//! Deferred-call and deferred-iteration cells are a separate type,
//! [`CallCell`]/[`IterCell`], rather than additional variants of `Cell`.
//! Wrapping the raw closure/iterator a user expression returns needs the
//! current graph and the vertex being evaluated, neither of which exists
//! yet when the expression closure is constructed, only at each `value()`
//! call once `Graph::evaluate` has resolved both. Separating the types
//! keeps that wrapping step out of the common `Cell<Owner, T>` path used by
//! every ordinary cell.

use std::rc::Rc;

use tracegraph_common::{CellId, GraphError, VertexKey};

use crate::graph::{Graph, ResolveMode};
use crate::notifier::{Callback, SubscriptionId};
use crate::traceable::Traceable;
use crate::value::AnyValue;
use crate::vertex::VertexHandle;
use crate::wrappers::{DeferredCall, DeferredIter};

/// Assigns a stable [`CellId`] to the call site it is invoked from, the
/// first time it runs, and returns the same id on every subsequent call.
/// `Cell::default_value`/`derived`/etc. all take the id produced by this
/// helper rather than minting a fresh one per instance; see the module doc
/// comment.
#[macro_export]
macro_rules! cell_id {
    () => {{
        static ID: $crate::__private::OnceCell<$crate::CellId> = $crate::__private::OnceCell::new();
        *ID.get_or_init($crate::CellId::declare)
    }};
}

type Expr<Owner, T> = Rc<dyn Fn(&Owner) -> Result<T, GraphError>>;

enum CellExpr<Owner, T> {
    Default(T),
    Derived(Expr<Owner, T>),
}

/// A declarative attribute: either a plain default value or a zero-argument
/// expression over the owning instance.
pub struct Cell<Owner, T> {
    id: CellId,
    name: Option<&'static str>,
    expr: CellExpr<Owner, T>,
}

impl<Owner, T> Cell<Owner, T>
where
    T: AnyValue + Clone + PartialEq + 'static,
{
    /// A cell whose value is a plain default.
    pub fn default_value(id: CellId, name: &'static str, value: T) -> Self {
        Self {
            id,
            name: Some(name),
            expr: CellExpr::Default(value),
        }
    }

    /// A cell derived from an infallible expression over `&Owner`.
    pub fn derived(id: CellId, name: &'static str, f: impl Fn(&Owner) -> T + 'static) -> Self {
        Self::try_derived(id, name, move |owner| Ok(f(owner)))
    }

    /// A cell derived from an expression that may itself fail; the error
    /// propagates unchanged and leaves the vertex undefined.
    pub fn try_derived(id: CellId, name: &'static str, f: impl Fn(&Owner) -> Result<T, GraphError> + 'static) -> Self {
        Self {
            id,
            name: Some(name),
            expr: CellExpr::Derived(Rc::new(f)),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    fn key(&self, owner: &Owner) -> VertexKey
    where
        Owner: Traceable,
    {
        VertexKey::new(owner.base().id(), self.id)
    }

    /// Resolve (creating if necessary) the vertex for `(current graph,
    /// owner, self)`, registering it as a dependency of whatever vertex is
    /// currently evaluating.
    pub fn get(&self, owner: &Owner) -> Result<VertexHandle, GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        Ok(graph
            .resolve(key, ResolveMode::Get, Owner::TYPE_NAME, self.name)
            .expect("ResolveMode::Get always produces a vertex"))
    }

    /// The cell's current value, evaluating the vertex if it is dirty.
    pub fn value(&self, owner: &Owner) -> Result<T, GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        let handle = graph
            .resolve(key, ResolveMode::Get, Owner::TYPE_NAME, self.name)
            .expect("ResolveMode::Get always produces a vertex");

        match &self.expr {
            CellExpr::Default(v) => {
                let v = v.clone();
                graph.evaluate(handle, move || Ok(v))
            }
            CellExpr::Derived(f) => {
                let f = f.clone();
                graph.evaluate(handle, move || f(owner))
            }
        }
    }

    /// Override the cell's value. Fails with `GraphError::Dependency` if the
    /// evaluation stack is non-empty.
    pub fn set(&self, owner: &Owner, value: T) -> Result<(), GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        graph.override_value(key, value, Owner::TYPE_NAME, self.name)
    }

    /// Clear an override. A no-op if nothing overrides this cell anywhere
    /// in the graph ancestry.
    pub fn clear(&self, owner: &Owner) -> Result<(), GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        graph.remove_override(key, Owner::TYPE_NAME, self.name)
    }

    /// Subscribe to changes of this cell across every instance of `Owner`:
    /// the cell-level notifier, shared by all vertices with this `CellId`.
    pub fn subscribe(&self, cb: &Rc<Callback>) -> SubscriptionId {
        crate::notifier::cell_notifier(self.id).subscribe(cb)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        crate::notifier::cell_notifier(self.id).unsubscribe(id);
    }
}

/// A cell whose expression produces a closure meant to be invoked later;
/// reads performed inside that closure are attributed to the vertex that
/// produced it. See the module doc comment for why this is a distinct type
/// from [`Cell`].
pub struct CallCell<Owner, Out> {
    id: CellId,
    name: Option<&'static str>,
    make: Rc<dyn Fn(&Owner) -> Box<dyn Fn() -> Out>>,
}

impl<Owner, Out: 'static> CallCell<Owner, Out> {
    pub fn new(id: CellId, name: &'static str, f: impl Fn(&Owner) -> Box<dyn Fn() -> Out> + 'static) -> Self {
        Self {
            id,
            name: Some(name),
            make: Rc::new(f),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    fn key(&self, owner: &Owner) -> VertexKey
    where
        Owner: Traceable,
    {
        VertexKey::new(owner.base().id(), self.id)
    }

    pub fn get(&self, owner: &Owner) -> Result<VertexHandle, GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        Ok(graph
            .resolve(key, ResolveMode::Get, Owner::TYPE_NAME, self.name)
            .expect("ResolveMode::Get always produces a vertex"))
    }

    /// Evaluates the owning vertex if dirty and wraps the freshly produced
    /// closure in a [`DeferredCall`] bound to that vertex and the current
    /// graph.
    pub fn value(&self, owner: &Owner) -> Result<DeferredCall<Out>, GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        let handle = graph
            .resolve(key, ResolveMode::Get, Owner::TYPE_NAME, self.name)
            .expect("ResolveMode::Get always produces a vertex");

        let make = self.make.clone();
        let graph_for_wrap = graph.clone();
        let handle_for_wrap = handle.clone();
        graph.evaluate(handle, move || {
            let raw = make(owner);
            Ok(DeferredCall::new(graph_for_wrap.clone(), handle_for_wrap.clone(), move || raw()))
        })
    }

    pub fn set(&self, owner: &Owner, value: DeferredCall<Out>) -> Result<(), GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        graph.override_value(key, value, Owner::TYPE_NAME, self.name)
    }

    pub fn clear(&self, owner: &Owner) -> Result<(), GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        graph.remove_override(key, Owner::TYPE_NAME, self.name)
    }

    pub fn subscribe(&self, cb: &Rc<Callback>) -> SubscriptionId {
        crate::notifier::cell_notifier(self.id).subscribe(cb)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        crate::notifier::cell_notifier(self.id).unsubscribe(id);
    }
}

/// The iterator-returning counterpart of [`CallCell`].
pub struct IterCell<Owner, Item> {
    id: CellId,
    name: Option<&'static str>,
    make: Rc<dyn Fn(&Owner) -> Box<dyn Iterator<Item = Item>>>,
}

impl<Owner, Item: 'static> IterCell<Owner, Item> {
    pub fn new(id: CellId, name: &'static str, f: impl Fn(&Owner) -> Box<dyn Iterator<Item = Item>> + 'static) -> Self {
        Self {
            id,
            name: Some(name),
            make: Rc::new(f),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    fn key(&self, owner: &Owner) -> VertexKey
    where
        Owner: Traceable,
    {
        VertexKey::new(owner.base().id(), self.id)
    }

    pub fn get(&self, owner: &Owner) -> Result<VertexHandle, GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        Ok(graph
            .resolve(key, ResolveMode::Get, Owner::TYPE_NAME, self.name)
            .expect("ResolveMode::Get always produces a vertex"))
    }

    /// As [`CallCell::value`], but for a lazily-iterated sequence. A prior
    /// `DeferredIter` this vertex produced is closed automatically as part
    /// of assigning over it.
    pub fn value(&self, owner: &Owner) -> Result<DeferredIter<Item>, GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        let handle = graph
            .resolve(key, ResolveMode::Get, Owner::TYPE_NAME, self.name)
            .expect("ResolveMode::Get always produces a vertex");

        let make = self.make.clone();
        let graph_for_wrap = graph.clone();
        let handle_for_wrap = handle.clone();
        graph.evaluate(handle, move || {
            let raw = make(owner);
            Ok(DeferredIter::new(graph_for_wrap.clone(), handle_for_wrap.clone(), raw))
        })
    }

    pub fn set(&self, owner: &Owner, value: DeferredIter<Item>) -> Result<(), GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        graph.override_value(key, value, Owner::TYPE_NAME, self.name)
    }

    pub fn clear(&self, owner: &Owner) -> Result<(), GraphError>
    where
        Owner: Traceable,
    {
        let graph = Graph::current()?;
        let key = self.key(owner);
        graph.remove_override(key, Owner::TYPE_NAME, self.name)
    }

    pub fn subscribe(&self, cb: &Rc<Callback>) -> SubscriptionId {
        crate::notifier::cell_notifier(self.id).subscribe(cb)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        crate::notifier::cell_notifier(self.id).unsubscribe(id);
    }
}
