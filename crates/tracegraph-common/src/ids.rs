use std::sync::atomic::{AtomicU64, Ordering};

fn next_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Stable identity of a single traceable instance, assigned once when its
/// `TraceableBase` is constructed. Two traceables never share an id, even if
/// one is dropped and a new one happens to occupy the same memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceableId(u64);

impl TraceableId {
    pub fn fresh() -> Self {
        Self(next_id())
    }
}

/// Stable identity of a cell declaration. One `CellId` is shared by every
/// instance of the traceable type that declares it, mirroring "created at
/// class definition, lives forever": callers typically obtain one via
/// `CellId::declare`, called once per field through a `OnceLock`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    pub fn declare() -> Self {
        Self(next_id())
    }
}

/// The key a graph's vertex table is indexed by: one vertex per
/// (traceable, cell) pair per graph that has observed or created it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexKey {
    pub traceable: TraceableId,
    pub cell: CellId,
}

impl VertexKey {
    pub fn new(traceable: TraceableId, cell: CellId) -> Self {
        Self { traceable, cell }
    }
}
