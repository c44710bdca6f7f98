//! End-to-end walkthroughs of the engine: a linear dependency chain,
//! swapping out an intermediate traceable, a diamond that must not
//! recompute its shared ancestor twice, loop detection, the
//! override-during-evaluation guard, nested scenario graphs, a deferred-call
//! closure capturing reads, and weak-subscriber collection.

use std::cell::{Cell as StdCell, RefCell};
use std::rc::Rc;

use tracegraph::{
    cell_id, Callback, CallCell, Cell, ChangeEvent, Graph, GraphError, Traceable, TraceableBase,
};

fn new_graph() -> (Graph, tracegraph::GraphGuard) {
    let graph = Graph::new();
    let guard = graph.enter();
    (graph, guard)
}

// Linear chain ------------------------------------------------------------

struct Formula {
    base: TraceableBase,
    input: Cell<Formula, i64>,
    output: Cell<Formula, i64>,
}

impl Traceable for Formula {
    const TYPE_NAME: &'static str = "Formula";
    fn base(&self) -> &TraceableBase {
        &self.base
    }
}

impl Formula {
    fn new() -> Result<Self, GraphError> {
        Ok(Self {
            base: TraceableBase::new()?,
            input: Cell::default_value(cell_id!(), "input", 1),
            output: Cell::try_derived(cell_id!(), "output", |s: &Formula| Ok(s.input.value(s)? + 1)),
        })
    }
}

#[test]
fn linear_chain_recomputes_lazily_on_override_and_clear() {
    let (_graph, _guard) = new_graph();
    let f = Formula::new().unwrap();

    assert_eq!(f.output.value(&f).unwrap(), 2);
    f.input.set(&f, -1).unwrap();
    assert_eq!(f.output.value(&f).unwrap(), 0);
    f.input.clear(&f).unwrap();
    assert_eq!(f.output.value(&f).unwrap(), 2);
}

// Replacing an intermediate traceable --------------------------------------

struct B {
    base: TraceableBase,
    input: Cell<B, i64>,
    output: Cell<B, i64>,
}

impl Traceable for B {
    const TYPE_NAME: &'static str = "B";
    fn base(&self) -> &TraceableBase {
        &self.base
    }
}

impl B {
    fn new(input: i64) -> Result<Self, GraphError> {
        Ok(Self {
            base: TraceableBase::new()?,
            input: Cell::default_value(cell_id!(), "input", input),
            output: Cell::try_derived(cell_id!(), "output", |s: &B| Ok(s.input.value(s)? + 1)),
        })
    }
}

#[derive(Clone)]
struct BHandle(Rc<B>);

impl PartialEq for BHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

tracegraph::impl_cell_value!(BHandle);

struct A {
    base: TraceableBase,
    another: Cell<A, BHandle>,
    mul2: Cell<A, i64>,
}

impl Traceable for A {
    const TYPE_NAME: &'static str = "A";
    fn base(&self) -> &TraceableBase {
        &self.base
    }
}

impl A {
    fn new(default_b: BHandle) -> Result<Self, GraphError> {
        Ok(Self {
            base: TraceableBase::new()?,
            another: Cell::default_value(cell_id!(), "another", default_b),
            mul2: Cell::try_derived(cell_id!(), "mul2", |s: &A| {
                let b = s.another.value(s)?;
                Ok(b.0.output.value(&b.0)? * 2)
            }),
        })
    }
}

#[test]
fn replacing_intermediate_traceable_recomputes_through_the_swap() {
    let (_graph, _guard) = new_graph();
    let b1 = BHandle(Rc::new(B::new(1).unwrap()));
    let a = A::new(b1.clone()).unwrap();

    assert_eq!(a.mul2.value(&a).unwrap(), 4);

    let b2 = BHandle(Rc::new(B::new(7).unwrap()));
    a.another.set(&a, b2).unwrap();
    assert_eq!(a.mul2.value(&a).unwrap(), 16);

    a.another.clear(&a).unwrap();
    b1.0.input.set(&b1.0, -1).unwrap();
    assert_eq!(a.mul2.value(&a).unwrap(), 0);
}

// Diamond shares its ancestor's single evaluation --------------------------

struct Diamond {
    base: TraceableBase,
    evaluations: RefCell<i32>,
    x: Cell<Diamond, i64>,
    y1: Cell<Diamond, i64>,
    y2: Cell<Diamond, i64>,
    z: Cell<Diamond, i64>,
}

impl Traceable for Diamond {
    const TYPE_NAME: &'static str = "Diamond";
    fn base(&self) -> &TraceableBase {
        &self.base
    }
}

impl Diamond {
    fn new() -> Result<Self, GraphError> {
        Ok(Self {
            base: TraceableBase::new()?,
            evaluations: RefCell::new(0),
            x: Cell::derived(cell_id!(), "x", |s: &Diamond| {
                *s.evaluations.borrow_mut() += 1;
                6
            }),
            y1: Cell::try_derived(cell_id!(), "y1", |s: &Diamond| Ok(s.x.value(s)? * 2)),
            y2: Cell::try_derived(cell_id!(), "y2", |s: &Diamond| Ok(s.x.value(s)? / 2)),
            z: Cell::try_derived(cell_id!(), "z", |s: &Diamond| {
                Ok(s.y1.value(s)? + s.y2.value(s)?)
            }),
        })
    }
}

#[test]
fn diamond_evaluates_shared_ancestor_once_and_skips_recompute_under_override() {
    let (_graph, _guard) = new_graph();
    let d = Diamond::new().unwrap();

    assert_eq!(d.z.value(&d).unwrap(), 15);
    assert_eq!(*d.evaluations.borrow(), 1);

    d.x.set(&d, 16).unwrap();
    assert_eq!(d.z.value(&d).unwrap(), 40);
    // x is overridden, not dirty, so its derive closure never runs again.
    assert_eq!(*d.evaluations.borrow(), 1);
}

// Loop detection, then recovery via override -------------------------------

struct Loopy {
    base: TraceableBase,
    a: Cell<Loopy, i64>,
    b: Cell<Loopy, i64>,
    c: Cell<Loopy, i64>,
}

impl Traceable for Loopy {
    const TYPE_NAME: &'static str = "Loopy";
    fn base(&self) -> &TraceableBase {
        &self.base
    }
}

impl Loopy {
    fn new() -> Result<Self, GraphError> {
        Ok(Self {
            base: TraceableBase::new()?,
            a: Cell::try_derived(cell_id!(), "a", |s: &Loopy| Ok(s.b.value(s)? + 1)),
            b: Cell::try_derived(cell_id!(), "b", |s: &Loopy| Ok(s.c.value(s)? + 1)),
            c: Cell::try_derived(cell_id!(), "c", |s: &Loopy| Ok(s.a.value(s)? + 1)),
        })
    }
}

#[test]
fn dependency_loop_reports_loop_error_then_clears_on_override() {
    let (_graph, _guard) = new_graph();
    let l = Loopy::new().unwrap();

    let err = l.a.value(&l).unwrap_err();
    assert!(err.is_loop());

    l.c.set(&l, 10).unwrap();
    assert_eq!(l.a.value(&l).unwrap(), 12);
    assert_eq!(l.b.value(&l).unwrap(), 11);
}

// Overriding mid-evaluation is rejected -------------------------------------

struct Misbehaving {
    base: TraceableBase,
    trigger: Cell<Misbehaving, i64>,
    other: Cell<Misbehaving, i64>,
}

impl Traceable for Misbehaving {
    const TYPE_NAME: &'static str = "Misbehaving";
    fn base(&self) -> &TraceableBase {
        &self.base
    }
}

impl Misbehaving {
    fn new() -> Result<Self, GraphError> {
        Ok(Self {
            base: TraceableBase::new()?,
            trigger: Cell::try_derived(cell_id!(), "trigger", |s: &Misbehaving| {
                s.other.set(s, 1)?;
                Ok(0)
            }),
            other: Cell::default_value(cell_id!(), "other", 0),
        })
    }
}

#[test]
fn override_attempted_mid_evaluation_fails_with_dependency_error() {
    let (_graph, _guard) = new_graph();
    let m = Misbehaving::new().unwrap();

    let err = m.trigger.value(&m).unwrap_err();
    assert!(matches!(err, GraphError::Dependency { .. }));
}

// Nested graphs leave the parent untouched ---------------------------------

struct Scene {
    base: TraceableBase,
    x: Cell<Scene, i64>,
    z: Cell<Scene, i64>,
}

impl Traceable for Scene {
    const TYPE_NAME: &'static str = "Scene";
    fn base(&self) -> &TraceableBase {
        &self.base
    }
}

impl Scene {
    fn new() -> Result<Self, GraphError> {
        Ok(Self {
            base: TraceableBase::new()?,
            x: Cell::default_value(cell_id!(), "x", 20),
            z: Cell::try_derived(cell_id!(), "z", |s: &Scene| Ok(s.x.value(s)? * 5 / 2)),
        })
    }
}

#[test]
fn nested_graph_overrides_are_invisible_to_the_parent_after_exit() {
    let (_parent, _parent_guard) = new_graph();
    let scene = Scene::new().unwrap();

    assert_eq!(scene.z.value(&scene).unwrap(), 50);

    let child = Graph::new();
    {
        let _child_guard = child.enter();
        scene.x.set(&scene, -8).unwrap();
        assert_eq!(scene.z.value(&scene).unwrap(), -20);
    }

    // Back on the parent graph: the child's override never happened here.
    assert_eq!(scene.x.value(&scene).unwrap(), 20);
    assert_eq!(scene.z.value(&scene).unwrap(), 50);
}

// A deferred call attributes its later reads to the cell that made it -----

struct Accumulator {
    base: TraceableBase,
    step: Cell<Accumulator, i64>,
    adder: CallCell<Accumulator, i64>,
}

impl Traceable for Accumulator {
    const TYPE_NAME: &'static str = "Accumulator";
    fn base(&self) -> &TraceableBase {
        &self.base
    }
}

impl Accumulator {
    fn new() -> Result<Self, GraphError> {
        Ok(Self {
            base: TraceableBase::new()?,
            step: Cell::default_value(cell_id!(), "step", 10),
            adder: CallCell::new(cell_id!(), "adder", |s: &Accumulator| {
                let step = s.step.value(s).unwrap();
                Box::new(move || step * 2)
            }),
        })
    }
}

#[test]
fn deferred_call_reattributes_reads_made_at_invocation_time() {
    let (_graph, _guard) = new_graph();
    let acc = Accumulator::new().unwrap();

    let call = acc.adder.value(&acc).unwrap();
    assert_eq!(call.call(), 20);

    // step is now a recorded dependency of `adder`'s vertex: overriding it
    // invalidates the memoized closure and forces a fresh one next read.
    acc.step.set(&acc, 3).unwrap();
    let call = acc.adder.value(&acc).unwrap();
    assert_eq!(call.call(), 6);
}

// Weakly-held subscribers are collected once dropped -----------------------

#[test]
fn weak_subscriber_stops_firing_once_dropped_but_survivors_still_fire() {
    let (_graph, _guard) = new_graph();
    let f = Formula::new().unwrap();

    let gone_count = Rc::new(StdCell::new(0));
    let kept_count = Rc::new(StdCell::new(0));

    {
        let gone_count = gone_count.clone();
        let gone_cb: Rc<Callback> = Rc::new(move |_: &ChangeEvent| gone_count.set(gone_count.get() + 1));
        f.output.subscribe(&gone_cb);
        // `gone_cb` drops at the end of this block; only a Weak remains.
    }

    let kept_cb: Rc<Callback> = {
        let kept_count = kept_count.clone();
        Rc::new(move |_: &ChangeEvent| kept_count.set(kept_count.get() + 1))
    };
    f.output.subscribe(&kept_cb);

    assert_eq!(f.output.value(&f).unwrap(), 2);
    f.input.set(&f, 9).unwrap();
    assert_eq!(f.output.value(&f).unwrap(), 10);

    assert_eq!(gone_count.get(), 0);
    // Fires once for the initial evaluation and once for the recompute
    // after `input` is overridden.
    assert_eq!(kept_count.get(), 2);
}
