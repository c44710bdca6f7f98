//! Type-erased storage for vertex values.
//!
//! A `Graph`'s vertex table is homogeneous: one `FxHashMap<VertexKey,
//! Rc<RefCell<Vertex>>>` shared by every traceable type a program declares,
//! while each `Cell<Owner, T>` is generic over its own concrete `T`.
//! `Vertex` bridges the two by storing `Box<dyn AnyValue>` and letting the
//! typed `Cell` downcast back on read.

use std::any::Any;
use std::rc::Rc;

/// Implemented for every concrete type usable as a cell value. Provided for
/// ordinary `Clone + PartialEq + 'static` types by the [`impl_cell_value`]
/// macro (or `#[derive(CellValue)]` from `tracegraph-macros`); deferred
/// wrappers (`DeferredCall`, `DeferredIter`) implement it by hand so that
/// [`AnyValue::close_if_deferred`] can do something for them.
pub trait AnyValue: Any {
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn AnyValue>;
    fn eq_box(&self, other: &dyn AnyValue) -> bool;

    /// An owned, type-erased handle to the same value, handed to change
    /// subscribers (`ChangeEvent::new_value`/`old_value`) so they can
    /// `downcast_ref` without the `Clone + PartialEq` bounds `AnyValue`
    /// itself doesn't require of its consumers.
    fn clone_any(&self) -> Rc<dyn Any>;

    /// Called on the value a vertex is about to stop observing, just before
    /// it is dropped in favor of a freshly evaluated one. A no-op for
    /// ordinary values.
    fn close_if_deferred(&self) {}
}

impl dyn AnyValue {
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl Clone for Box<dyn AnyValue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl PartialEq for Box<dyn AnyValue> {
    fn eq(&self, other: &Self) -> bool {
        self.eq_box(other.as_ref())
    }
}

/// Implements [`AnyValue`] for a plain `Clone + PartialEq + 'static` type
/// with the default (no-op) `close_if_deferred`.
#[macro_export]
macro_rules! impl_cell_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::value::AnyValue for $ty {
                fn as_any(&self) -> &dyn ::std::any::Any { self }
                fn clone_box(&self) -> Box<dyn $crate::value::AnyValue> { Box::new(self.clone()) }
                fn eq_box(&self, other: &dyn $crate::value::AnyValue) -> bool {
                    match other.as_any().downcast_ref::<$ty>() {
                        Some(o) => self == o,
                        None => false,
                    }
                }
                fn clone_any(&self) -> ::std::rc::Rc<dyn ::std::any::Any> { ::std::rc::Rc::new(self.clone()) }
            }
        )+
    };
}

impl_cell_value!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String
);

impl<T: AnyValue + Clone + PartialEq> AnyValue for Option<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn AnyValue> {
        Box::new(self.clone())
    }
    fn eq_box(&self, other: &dyn AnyValue) -> bool {
        match other.as_any().downcast_ref::<Option<T>>() {
            Some(o) => self == o,
            None => false,
        }
    }
    fn clone_any(&self) -> Rc<dyn Any> {
        Rc::new(self.clone())
    }
}

impl<T: AnyValue + Clone + PartialEq> AnyValue for Vec<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn AnyValue> {
        Box::new(self.clone())
    }
    fn eq_box(&self, other: &dyn AnyValue) -> bool {
        match other.as_any().downcast_ref::<Vec<T>>() {
            Some(o) => self == o,
            None => false,
        }
    }
    fn clone_any(&self) -> Rc<dyn Any> {
        Rc::new(self.clone())
    }
}
