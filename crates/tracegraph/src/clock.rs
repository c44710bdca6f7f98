//! Process-wide monotonic logical clock.
//!
//! Gives a total order over structural changes to vertices. A single
//! `AtomicU64` counter shared by every graph, `Relaxed` ordering since the
//! engine is single-threaded cooperative.

use std::sync::atomic::{AtomicU64, Ordering};

/// A timestamp produced by `tick`. Only ordering matters; `tick` never
/// repeats a value within one process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
}

static CLOCK: AtomicU64 = AtomicU64::new(1);

/// Advance and return the next timestamp.
pub fn tick() -> Timestamp {
    Timestamp(CLOCK.fetch_add(1, Ordering::Relaxed))
}
