//! Property test: a derived cell must track its dependency through any
//! sequence of overrides and clears, never drifting from what recomputing
//! the dependency chain from scratch would give.

use proptest::prelude::*;

use tracegraph::{cell_id, Cell, Graph, GraphError, Traceable, TraceableBase};

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

#[derive(Clone, Debug)]
enum Op {
    Set(i64),
    Clear,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            (-1_000_000i64..1_000_000).prop_map(Op::Set),
            Just(Op::Clear),
        ],
        0..30,
    )
}

proptest! {
    #[test]
    fn output_always_tracks_whatever_input_resolves_to(ops in arb_ops()) {
        let graph = Graph::new();
        let _guard = graph.enter();
        let f = Formula::new().unwrap();

        let mut expected_input = 1i64;
        for op in ops {
            match op {
                Op::Set(v) => {
                    f.input.set(&f, v).unwrap();
                    expected_input = v;
                }
                Op::Clear => {
                    f.input.clear(&f).unwrap();
                    expected_input = 1;
                }
            }
            prop_assert_eq!(f.input.value(&f).unwrap(), expected_input);
            prop_assert_eq!(f.output.value(&f).unwrap(), expected_input + 1);
        }
    }
}
