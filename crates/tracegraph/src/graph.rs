//! The evaluation context: a vertex table, an evaluation stack, and an
//! optional parent graph, plus the process-global (modeled here as
//! thread-local) stack of active graphs.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracegraph_common::{GraphError, VertexKey};

use crate::clock::{tick, Timestamp};
use crate::notifier::{self, Callback, ChangeEvent};
use crate::value::AnyValue;
use crate::vertex::{Vertex, VertexHandle};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum ResolveMode {
    Get,
    Set,
    Del,
    Trace,
}

struct GraphInner {
    parent: Option<Graph>,
    vertices: FxHashMap<VertexKey, VertexHandle>,
    eval_stack: Vec<VertexHandle>,
}

/// An evaluation context. Cheap to clone (an `Rc` handle); cloning does not
/// create a new graph, it shares the same vertex table and eval stack.
#[derive(Clone)]
pub struct Graph(Rc<RefCell<GraphInner>>);

thread_local! {
    static ACTIVE_GRAPHS: RefCell<Vec<Graph>> = const { RefCell::new(Vec::new()) };
}

impl Graph {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(GraphInner {
            parent: None,
            vertices: FxHashMap::default(),
            eval_stack: Vec::new(),
        })))
    }

    pub(crate) fn same_as(&self, other: &Graph) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The innermost graph active on this thread. Fails with
    /// `GraphError::Context` if none has been entered.
    pub fn current() -> Result<Graph, GraphError> {
        ACTIVE_GRAPHS.with(|stack| stack.borrow().last().cloned()).ok_or(GraphError::Context)
    }

    /// Push this graph on the thread's active-graph stack. The returned
    /// guard pops it on drop, on every normal or panicking exit path of the
    /// surrounding region.
    ///
    /// A graph's parent is fixed the first time it is entered and is
    /// asserted unchanged on every subsequent entry. Re-entering under a
    /// different parent is a fatal invariant violation, not a reportable
    /// error.
    pub fn enter(&self) -> GraphGuard {
        let candidate_parent = ACTIVE_GRAPHS.with(|stack| stack.borrow().last().cloned());
        {
            let mut inner = self.0.borrow_mut();
            match (&inner.parent, &candidate_parent) {
                (None, parent) => inner.parent = parent.clone(),
                (Some(existing), Some(candidate)) => assert!(
                    existing.same_as(candidate),
                    "graph entered with a different parent than it was created under"
                ),
                (Some(_), None) => {
                    panic!("graph previously nested cannot be re-entered at the top level")
                }
            }
        }
        ACTIVE_GRAPHS.with(|stack| stack.borrow_mut().push(self.clone()));
        #[cfg(feature = "tracing")]
        tracing::trace!(nested = candidate_parent.is_some(), "graph entered");
        GraphGuard { graph: self.clone() }
    }

    fn parent(&self) -> Option<Graph> {
        self.0.borrow().parent.clone()
    }

    fn local_lookup(&self, key: VertexKey) -> Option<VertexHandle> {
        self.0.borrow().vertices.get(&key).cloned()
    }

    fn ancestor_lookup(&self, key: VertexKey) -> Option<VertexHandle> {
        let mut cursor = self.parent();
        while let Some(g) = cursor {
            if let Some(v) = g.local_lookup(key) {
                return Some(v);
            }
            cursor = g.parent();
        }
        None
    }

    fn get_or_create_local(
        &self,
        key: VertexKey,
        traceable_type: &'static str,
        cell_name: Option<&'static str>,
    ) -> VertexHandle {
        if let Some(v) = self.local_lookup(key) {
            return v;
        }
        let handle = VertexHandle::new(Vertex::new_undefined(key, traceable_type, cell_name));
        self.0.borrow_mut().vertices.insert(key, handle.clone());
        handle
    }

    /// Resolve the vertex for `key` under the given mode. `traceable_type`/
    /// `cell_name` are only used if a fresh vertex must be created.
    pub(crate) fn resolve(
        &self,
        key: VertexKey,
        mode: ResolveMode,
        traceable_type: &'static str,
        cell_name: Option<&'static str>,
    ) -> Option<VertexHandle> {
        let result = match mode {
            ResolveMode::Set => Some(self.get_or_create_local(key, traceable_type, cell_name)),
            ResolveMode::Get => {
                if let Some(v) = self.local_lookup(key) {
                    Some(v)
                } else if let Some(v) = self.ancestor_lookup(key) {
                    if self.is_dirty(&v) {
                        // Ancestor's cached vertex is stale. Fork a local
                        // vertex rather than recomputing into the ancestor's
                        // in place, so the ancestor's cache is untouched once
                        // this graph is dropped.
                        Some(self.get_or_create_local(key, traceable_type, cell_name))
                    } else {
                        Some(v)
                    }
                } else {
                    Some(self.get_or_create_local(key, traceable_type, cell_name))
                }
            }
            ResolveMode::Del => {
                if let Some(v) = self.local_lookup(key) {
                    Some(v)
                } else if let Some(anc) = self.ancestor_lookup(key) {
                    if anc.0.borrow().is_overridden() {
                        Some(self.get_or_create_local(key, traceable_type, cell_name))
                    } else {
                        Some(anc)
                    }
                } else {
                    None
                }
            }
            ResolveMode::Trace => self.local_lookup(key).or_else(|| self.ancestor_lookup(key)),
        };

        if mode == ResolveMode::Get {
            if let Some(w) = &result {
                self.register_dependency(w);
            }
        }
        result
    }

    /// While a vertex is on top of the eval stack, a nested get that
    /// returns a different vertex `w` adds `w`'s key to its dependencies. A
    /// `w` already present anywhere on the stack is a self-edge and is not
    /// registered; the loop surfaces instead when `w` is actually
    /// (re-)evaluated.
    fn register_dependency(&self, w: &VertexHandle) {
        let inner = self.0.borrow();
        let Some(top) = inner.eval_stack.last() else {
            return;
        };
        if inner.eval_stack.iter().any(|frame| frame.same_as(w)) {
            return;
        }
        let top = top.clone();
        drop(inner);
        let mut top_v = top.0.borrow_mut();
        top_v.dependency_keys.insert(w.key());
        top_v.touched = tick();
    }

    /// Push `handle` onto this graph's evaluation stack, failing with
    /// `GraphError::Loop` if it is already present anywhere on the stack.
    /// On the loop path the vertex is undefined before the error is
    /// returned.
    fn push_frame(&self, handle: VertexHandle) -> Result<StackGuard, GraphError> {
        let cycle_len = {
            let inner = self.0.borrow();
            inner
                .eval_stack
                .iter()
                .position(|frame| frame.same_as(&handle))
                .map(|idx| inner.eval_stack.len() - idx + 1)
        };
        if let Some(cycle_len) = cycle_len {
            handle.0.borrow_mut().undefine(tick());
            #[cfg(feature = "tracing")]
            tracing::warn!(vertex = ?handle.key(), cycle_len, "dependency loop detected");
            return Err(GraphError::loop_detected(cycle_len, handle.key()));
        }
        self.0.borrow_mut().eval_stack.push(handle.clone());
        Ok(StackGuard {
            graph: self.clone(),
            handle,
        })
    }

    /// Re-enter `handle`'s evaluation scope for the duration of a deferred
    /// call/iteration advance, on whichever graph is current right now
    /// (which may differ from the graph `handle` was first evaluated in).
    pub(crate) fn reenter(&self, handle: VertexHandle) -> StackGuard {
        match self.push_frame(handle) {
            Ok(guard) => guard,
            // Fn()/Iterator::next have no error channel to report a loop
            // through; treat a directly recursive deferred call as a fatal
            // misuse rather than silently swallowing it.
            Err(e) => panic!("dependency loop re-entering deferred scope: {e}"),
        }
    }

    fn is_dirty(&self, handle: &VertexHandle) -> bool {
        let v = handle.0.borrow();
        if v.is_overridden() {
            return false;
        }
        let Some(defined_at) = v.defined_at() else {
            return true;
        };
        let deps: Vec<VertexKey> = v.dependency_keys.iter().copied().collect();
        drop(v);
        for key in deps {
            match self.resolve_trace(key) {
                None => return true,
                Some(w) => {
                    if self.is_newer(&w, defined_at) {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn resolve_trace(&self, key: VertexKey) -> Option<VertexHandle> {
        self.local_lookup(key).or_else(|| self.ancestor_lookup(key))
    }

    fn is_newer(&self, w: &VertexHandle, defined_at: Timestamp) -> bool {
        if self.is_dirty(w) {
            return true;
        }
        w.0.borrow().touched > defined_at
    }

    /// Evaluate `handle` if dirty, returning its current value either way.
    /// `compute` runs the cell's expression; any nested cell reads it
    /// performs register as dependencies of `handle` via
    /// `register_dependency` because `handle` is on top of the stack while
    /// `compute` runs.
    pub(crate) fn evaluate<T, F>(&self, handle: VertexHandle, compute: F) -> Result<T, GraphError>
    where
        T: AnyValue + Clone + PartialEq + 'static,
        F: FnOnce() -> Result<T, GraphError>,
    {
        let guard = self.push_frame(handle.clone())?;

        if !self.is_dirty(&handle) {
            let cached = handle
                .0
                .borrow()
                .value
                .as_ref()
                .expect("a non-dirty vertex is always defined")
                .clone_box();
            drop(guard);
            return Ok(downcast_owned(cached.as_ref()));
        }

        let now = tick();
        {
            let mut v = handle.0.borrow_mut();
            v.touched = now;
            v.dependency_keys.clear();
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(vertex = ?handle.key(), "evaluating");

        match compute() {
            Ok(raw) => {
                handle.0.borrow_mut().evaluated = Some(now);
                let notification = self.assign(&handle, Box::new(raw.clone()), true);
                drop(guard);
                // Dispatch only after the frame is popped and with no
                // outstanding borrow on the vertex: a subscriber that
                // re-reads this cell must see a clean, already-assigned
                // vertex, not one still on the stack.
                if let Some((event, recipients)) = notification {
                    notifier::dispatch(&recipients, &event);
                }
                Ok(raw)
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(vertex = ?handle.key(), error = %e, "evaluation failed, undefining");
                handle.0.borrow_mut().undefine(tick());
                drop(guard);
                Err(e)
            }
        }
    }

    /// Override `key`'s value. Legal only with an empty evaluation stack.
    pub(crate) fn override_value<T>(
        &self,
        key: VertexKey,
        new: T,
        traceable_type: &'static str,
        cell_name: Option<&'static str>,
    ) -> Result<(), GraphError>
    where
        T: AnyValue + Clone + PartialEq + 'static,
    {
        if let Some(evaluating) = self.0.borrow().eval_stack.last() {
            return Err(GraphError::dependency(
                evaluating.0.borrow().describe(),
                describe(traceable_type, cell_name),
            ));
        }

        let handle = self.get_or_create_local(key, traceable_type, cell_name);
        let now = tick();
        {
            let mut v = handle.0.borrow_mut();
            v.overridden = Some(now);
            v.touched = now;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(vertex = ?key, "overridden");
        if let Some((event, recipients)) = self.assign(&handle, Box::new(new), false) {
            notifier::dispatch(&recipients, &event);
        }
        Ok(())
    }

    /// Clear an override. A no-op if no override exists anywhere in the
    /// ancestry.
    pub(crate) fn remove_override(
        &self,
        key: VertexKey,
        traceable_type: &'static str,
        cell_name: Option<&'static str>,
    ) -> Result<(), GraphError> {
        let handle = match self.resolve(key, ResolveMode::Del, traceable_type, cell_name) {
            Some(h) => h,
            None => return Ok(()),
        };
        let now = tick();
        let mut v = handle.0.borrow_mut();
        if v.overridden.is_none() {
            return Ok(());
        }
        v.overridden = None;
        v.touched = now;
        v.value = v.last_known.clone();
        Ok(())
    }

    /// Set `value`, and, if `update_last_known` (true for a successful
    /// evaluation, false for an override), also set `last_known`. Returns
    /// the change event and its recipients if the observable value changed,
    /// without invoking anything or holding any borrow on the vertex. The
    /// caller dispatches once it's safe to do so: frame popped, no borrow
    /// outstanding.
    fn assign(&self, handle: &VertexHandle, new: Box<dyn AnyValue>, update_last_known: bool) -> Option<(ChangeEvent, Vec<Rc<Callback>>)> {
        let (changed, old, traceable, cell, cell_name) = {
            let mut v = handle.0.borrow_mut();
            if let Some(old) = v.value.as_ref() {
                old.close_if_deferred();
            }
            let old = v.value.take();
            let changed = old.as_ref() != Some(&new);
            v.value = Some(new.clone());
            if update_last_known {
                v.last_known = Some(new.clone());
            }
            (changed, old, v.key.traceable, v.key.cell, v.cell_name)
        };

        if !changed {
            return None;
        }

        let event = ChangeEvent {
            traceable,
            cell,
            cell_name,
            new_value: new.clone_any(),
            old_value: old.as_ref().map(|o| o.clone_any()),
        };

        let cell_notifier = notifier::cell_notifier(cell);
        let traceable_notifier = notifier::traceable_notifier(traceable);
        let recipients = {
            let v = handle.0.borrow();
            // A broadcast always fans out to at most these three notifiers
            // (vertex, cell, traceable); `SmallVec` keeps that on the stack.
            let mut notifiers: SmallVec<[&notifier::Notifier; 3]> = smallvec::smallvec![&v.notifier, &cell_notifier];
            if let Some(t) = &traceable_notifier {
                notifiers.push(t.as_ref());
            }
            notifier::collect_recipients(&notifiers)
        };
        Some((event, recipients))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(traceable_type: &'static str, cell_name: Option<&'static str>) -> String {
    format!("{}::{}", traceable_type, cell_name.unwrap_or("<cell>"))
}

fn downcast_owned<T: Clone + 'static>(b: &dyn AnyValue) -> T {
    b.downcast_ref::<T>()
        .expect("vertex value type mismatch: a VertexKey was reused with a different T")
        .clone()
}

/// RAII guard returned by [`Graph::enter`]. Pops the graph from the
/// thread-local active-graph stack on drop, including on unwind.
pub struct GraphGuard {
    graph: Graph,
}

impl Drop for GraphGuard {
    fn drop(&mut self) {
        ACTIVE_GRAPHS.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.pop() {
                Some(top) if top.same_as(&self.graph) => {}
                _ => panic!("graph stack corrupted: mismatched pop on exit"),
            }
        });
    }
}

/// RAII guard for a single evaluation-stack frame. Pops on drop, including
/// on unwind, so a panicking or error-returning cell expression never
/// leaves a stale frame behind.
pub struct StackGuard {
    graph: Graph,
    handle: VertexHandle,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        let mut inner = self.graph.0.borrow_mut();
        match inner.eval_stack.pop() {
            Some(top) if top.same_as(&self.handle) => {}
            _ => panic!("evaluation stack corrupted: mismatched pop on exit"),
        }
    }
}

#[cfg(test)]
impl Graph {
    /// Test-only escape hatch for exercising `Vertex`/wrapper machinery
    /// without a full `Cell`/`Traceable` setup.
    pub(crate) fn debug_vertex(&self, key: VertexKey) -> VertexHandle {
        self.get_or_create_local(key, "test::Fixture", Some("debug"))
    }
}
