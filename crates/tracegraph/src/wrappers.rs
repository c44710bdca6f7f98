//! Transparent proxies over returned callables and lazy iterators.
//!
//! When a cell's expression returns something meant to be invoked later,
//! a closure, or an iterator driven incrementally, reads that happen
//! during that later invocation must still be attributed to the vertex that
//! produced the callable/iterator, not whichever vertex happens to be on
//! top of the evaluation stack at call time. `DeferredCall` and
//! `DeferredIter` re-enter the owning vertex's evaluation scope around each
//! invocation to make that true.
//!
//! Both wrappers are `Clone + PartialEq` by identity (`Rc::ptr_eq`) rather
//! than by the wrapped value's own equality, since there usually isn't one
//! for an arbitrary closure or iterator. That means re-evaluating a cell
//! that returns a fresh deferred wrapper always looks like a change to
//! assign and always notifies, the same way a freshly constructed
//! function/generator object in a dynamic language is never equal to the
//! previous one.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use crate::graph::Graph;
use crate::value::AnyValue;
use crate::vertex::VertexHandle;

/// Wraps a zero-argument closure returned from a cell's expression so that
/// invoking it re-attributes dependency reads to the vertex that produced
/// it.
pub struct DeferredCall<Out> {
    inner: Rc<dyn Fn() -> Out>,
    owner: VertexHandle,
    graph: Graph,
}

impl<Out> DeferredCall<Out> {
    pub fn new(graph: Graph, owner: VertexHandle, f: impl Fn() -> Out + 'static) -> Self {
        Self {
            inner: Rc::new(f),
            owner,
            graph,
        }
    }

    /// Invoke the wrapped closure, with the owning vertex re-pushed onto
    /// the current graph's evaluation stack for the duration of the call.
    pub fn call(&self) -> Out {
        let _scope = self.graph.reenter(self.owner.clone());
        (self.inner)()
    }
}

impl<Out> Clone for DeferredCall<Out> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            owner: self.owner.clone(),
            graph: self.graph.clone(),
        }
    }
}

impl<Out> PartialEq for DeferredCall<Out> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<Out: 'static> AnyValue for DeferredCall<Out> {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn clone_box(&self) -> Box<dyn AnyValue> {
        Box::new(self.clone())
    }
    fn eq_box(&self, other: &dyn AnyValue) -> bool {
        match other.as_any().downcast_ref::<Self>() {
            Some(o) => self == o,
            None => false,
        }
    }
    fn clone_any(&self) -> Rc<dyn std::any::Any> {
        Rc::new(self.clone())
    }
}

/// Wraps a lazy iterator returned from a cell's expression. Each `next()`
/// re-enters the owning vertex's evaluation scope for the duration of that
/// single advance. Once `close` has been called (explicitly, or implicitly
/// because a re-evaluation superseded this wrapper, see
/// [`AnyValue::close_if_deferred`]), the iterator is inert: `next()` always
/// returns `None` without touching the graph.
pub struct DeferredIter<Item> {
    inner: Rc<RefCell<dyn Iterator<Item = Item>>>,
    alive: Rc<StdCell<bool>>,
    owner: VertexHandle,
    graph: Graph,
}

impl<Item> DeferredIter<Item> {
    pub fn new(
        graph: Graph,
        owner: VertexHandle,
        iter: impl Iterator<Item = Item> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(iter)),
            alive: Rc::new(StdCell::new(true)),
            owner,
            graph,
        }
    }

    /// Mark this iterator (and every clone sharing its identity) inert.
    pub fn close(&self) {
        self.alive.set(false);
    }

    pub fn is_closed(&self) -> bool {
        !self.alive.get()
    }
}

impl<Item> Iterator for DeferredIter<Item> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        if !self.alive.get() {
            return None;
        }
        let _scope = self.graph.reenter(self.owner.clone());
        self.inner.borrow_mut().next()
    }
}

impl<Item> Clone for DeferredIter<Item> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            alive: self.alive.clone(),
            owner: self.owner.clone(),
            graph: self.graph.clone(),
        }
    }
}

impl<Item> PartialEq for DeferredIter<Item> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<Item: 'static> AnyValue for DeferredIter<Item> {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn clone_box(&self) -> Box<dyn AnyValue> {
        Box::new(self.clone())
    }
    fn eq_box(&self, other: &dyn AnyValue) -> bool {
        match other.as_any().downcast_ref::<Self>() {
            Some(o) => self == o,
            None => false,
        }
    }
    fn clone_any(&self) -> Rc<dyn std::any::Any> {
        Rc::new(self.clone())
    }
    fn close_if_deferred(&self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn closed_iterator_yields_nothing() {
        let graph = Graph::new();
        let _guard = graph.enter();
        let owner = VertexHandle::detached_for_test();
        let mut it = DeferredIter::new(graph.clone(), owner, vec![1, 2, 3].into_iter());
        assert_eq!(it.next(), Some(1));
        it.close();
        assert_eq!(it.next(), None);
    }
}
