//! Subscribe/unsubscribe/broadcast primitive reused by vertices, traceables
//! and cells.
//!
//! Subscribers are held by weak reference: a callback whose sole strong
//! `Rc` is dropped elsewhere is silently skipped on the next broadcast, and
//! its slot is reclaimed lazily.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracegraph_common::{CellId, TraceableId};

/// Payload delivered to every subscriber on a value transition.
#[derive(Clone)]
pub struct ChangeEvent {
    pub traceable: TraceableId,
    pub cell: CellId,
    pub cell_name: Option<&'static str>,
    pub new_value: Rc<dyn std::any::Any>,
    pub old_value: Option<Rc<dyn std::any::Any>>,
}

pub type Callback = dyn Fn(&ChangeEvent);

/// Opaque handle returned by `subscribe`, usable with `unsubscribe`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct Notifier {
    subscribers: RefCell<Vec<(SubscriptionId, Weak<Callback>)>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cb` weakly. The caller retains the strong `Rc` and is
    /// responsible for keeping it alive as long as the subscription should
    /// fire.
    pub fn subscribe(&self, cb: &Rc<Callback>) -> SubscriptionId {
        let id = SubscriptionId(next_subscription_id());
        self.subscribers.borrow_mut().push((id, Rc::downgrade(cb)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().retain(|(sid, _)| *sid != id);
    }

    /// Upgrade every live subscriber, dropping dead ones, and append the
    /// result to `out` for deduplication by the caller (`Weak::as_ptr`).
    fn collect_live(&self, out: &mut Vec<Rc<Callback>>) {
        self.subscribers.borrow_mut().retain(|(_, weak)| {
            if let Some(cb) = weak.upgrade() {
                out.push(cb);
                true
            } else {
                false
            }
        });
    }
}

/// Collect the union of live subscribers across `notifiers`, deduplicated by
/// identity so a callback registered to more than one notifier only appears
/// once. Returns owned `Rc`s rather than invoking anything, so the caller
/// can drop any borrows it's holding before dispatching.
pub fn collect_recipients(notifiers: &[&Notifier]) -> Vec<Rc<Callback>> {
    let mut live = Vec::new();
    for notifier in notifiers {
        notifier.collect_live(&mut live);
    }

    let mut seen: Vec<*const ()> = Vec::with_capacity(live.len());
    let mut out = Vec::with_capacity(live.len());
    for cb in live {
        let ptr = Rc::as_ptr(&cb) as *const ();
        if seen.contains(&ptr) {
            continue;
        }
        seen.push(ptr);
        out.push(cb);
    }
    out
}

/// Invoke every recipient with `event`.
pub fn dispatch(recipients: &[Rc<Callback>], event: &ChangeEvent) {
    for cb in recipients {
        cb(event);
    }
}

/// Collect and immediately dispatch to the union of subscribers across
/// `notifiers`.
pub fn broadcast(notifiers: &[&Notifier], event: &ChangeEvent) {
    dispatch(&collect_recipients(notifiers), event);
}

fn next_subscription_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

thread_local! {
    // One notifier per cell declaration, kept for the life of the thread.
    static CELL_NOTIFIERS: RefCell<FxHashMap<CellId, Rc<Notifier>>> = RefCell::new(FxHashMap::default());
    // Traceable instances come and go at the user's discretion, so their
    // notifiers are tracked weakly: once the owning `TraceableBase` is
    // dropped, `traceable_notifier` stops finding anything to broadcast to.
    static TRACEABLE_NOTIFIERS: RefCell<FxHashMap<TraceableId, Weak<Notifier>>> = RefCell::new(FxHashMap::default());
}

/// The shared, process-lifetime notifier for a cell declaration, created
/// lazily on first use.
pub(crate) fn cell_notifier(cell: CellId) -> Rc<Notifier> {
    CELL_NOTIFIERS.with(|m| m.borrow_mut().entry(cell).or_insert_with(|| Rc::new(Notifier::new())).clone())
}

/// The notifier for a still-live traceable instance, if any. Returns `None`
/// once the instance's `TraceableBase` has been dropped.
pub(crate) fn traceable_notifier(id: TraceableId) -> Option<Rc<Notifier>> {
    TRACEABLE_NOTIFIERS.with(|m| m.borrow().get(&id).and_then(Weak::upgrade))
}

/// Register a traceable instance's own notifier so that `traceable_notifier`
/// can find it by id. Called once from `TraceableBase::new`.
pub(crate) fn register_traceable_notifier(id: TraceableId, notifier: &Rc<Notifier>) {
    TRACEABLE_NOTIFIERS.with(|m| {
        m.borrow_mut().insert(id, Rc::downgrade(notifier));
    });
}
