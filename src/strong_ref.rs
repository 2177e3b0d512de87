//! Strong references between native objects
//!
//! A `StrongRef<U>` field lets one native object own a reference to another.
//! It is private (never an attribute or constructor argument), reported to
//! the collector, and cleared by deallocation before the payload is dropped
//! or the record is pooled.

use crate::host::{HostError, HostResult, ObjRef};
use crate::module::NativeClass;
use core::marker::PhantomData;
use std::fmt;

/// Pointer-sized owning reference to an instance of `U`
#[repr(transparent)]
pub struct StrongRef<U> {
    target: Option<ObjRef>,
    _marker: PhantomData<fn() -> U>,
}

impl<U> StrongRef<U> {
    pub const fn new() -> Self {
        Self {
            target: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn get(&self) -> Option<&ObjRef> {
        self.target.as_ref()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.target.is_some()
    }

    /// Drop the held reference, if any
    pub fn clear(&mut self) {
        // Null the field before the decrement can run any deallocation.
        let old = self.target.take();
        drop(old);
    }
}

impl<U: NativeClass> StrongRef<U> {
    /// Hold `target`, releasing the previous referent afterwards
    pub fn set(&mut self, target: &ObjRef) -> HostResult<()> {
        if !target.is_instance_of::<U>() {
            return Err(HostError::type_error(format!(
                "expected '{}', got '{}'",
                U::NAME,
                target.ty().name()
            )));
        }
        let new = target.clone();
        let old = self.target.replace(new);
        drop(old);
        Ok(())
    }

    /// Run `f` on the referent's payload
    pub fn with<R>(&self, f: impl FnOnce(&U) -> R) -> HostResult<Option<R>> {
        match &self.target {
            Some(target) => {
                let payload = target.borrow::<U>()?;
                Ok(Some(f(&payload)))
            }
            None => Ok(None),
        }
    }
}

impl<U> Default for StrongRef<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> fmt::Debug for StrongRef<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "StrongRef({target:?})"),
            None => f.write_str("StrongRef(None)"),
        }
    }
}

/// Type-erased access to a `StrongRef<_>` field; the layout is the same for every `U`
pub(crate) mod raw {
    use crate::gc::Visitor;
    use crate::host::{ObjRef, Value};

    #[inline]
    unsafe fn slot<'a>(ptr: *const u8) -> &'a Option<ObjRef> {
        &*ptr.cast::<Option<ObjRef>>()
    }

    pub unsafe fn get(ptr: *const u8) -> Value {
        Value::from(slot(ptr).clone())
    }

    pub unsafe fn visit(ptr: *const u8, visitor: &mut Visitor<'_>) -> i32 {
        slot(ptr).as_ref().map_or(0, |target| visitor.visit(target))
    }

    pub unsafe fn take(ptr: *mut u8, out: &mut Vec<ObjRef>) {
        out.extend((*ptr.cast::<Option<ObjRef>>()).take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ClassBuilder;
    use crate::host::gil::with_gil;
    use crate::lifecycle::create;

    struct Node {
        value: i64,
    }

    impl NativeClass for Node {
        const NAME: &'static str = "StrongRefNode";

        fn describe(class: &mut ClassBuilder<Self>) {
            class.field("value", crate::field!(Node, value));
        }
    }

    struct Other;

    impl NativeClass for Other {
        const NAME: &'static str = "StrongRefOther";

        fn describe(_class: &mut ClassBuilder<Self>) {}
    }

    #[test]
    fn set_then_set_releases_the_first_target_once() {
        with_gil(|| {
            let a = create(Node { value: 1 }).unwrap();
            let b = create(Node { value: 2 }).unwrap();
            let mut strong = StrongRef::<Node>::new();

            strong.set(&a).unwrap();
            assert_eq!(a.refcount(), 2);

            strong.set(&b).unwrap();
            assert_eq!(a.refcount(), 1);
            assert_eq!(b.refcount(), 2);
            assert_eq!(strong.with(|node| node.value).unwrap(), Some(2));

            strong.clear();
            assert!(!strong.is_set());
            assert_eq!(b.refcount(), 1);
        });
    }

    #[test]
    fn setting_the_same_target_twice_keeps_one_increment() {
        with_gil(|| {
            let a = create(Node { value: 1 }).unwrap();
            let mut strong = StrongRef::<Node>::new();
            strong.set(&a).unwrap();
            strong.set(&a).unwrap();
            assert_eq!(a.refcount(), 2);
            strong.clear();
            strong.clear();
            assert_eq!(a.refcount(), 1);
        });
    }

    #[test]
    fn wrong_target_type_is_rejected() {
        with_gil(|| {
            let other = create(Other).unwrap();
            let mut strong = StrongRef::<Node>::new();
            let err = strong.set(&other).unwrap_err();
            assert_eq!(err.kind, crate::host::ExceptionKind::TypeError);
            assert!(!strong.is_set());
            assert_eq!(other.refcount(), 1);
        });
    }

    #[test]
    fn strong_ref_is_pointer_sized() {
        assert_eq!(core::mem::size_of::<StrongRef<Node>>(), core::mem::size_of::<usize>());
    }
}
