//! Weak references
//!
//! A weakref-enabled record owns at most one shared cell holding its own
//! address. Every weak reference to the record clones that cell, and
//! deallocation zeroes it, so all of them observe the death at once without
//! the record having to keep a list of referrers.

use super::err::{HostError, HostResult};
use super::gil;
use super::object::ObjRef;
use super::value::Value;
use crate::allocator::{flags, ObjectHeader};
use crate::descriptor::ClassBuilder;
use crate::lifecycle;
use crate::module::NativeClass;
use core::ptr::NonNull;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Contents of a record's weaklist slot
pub(crate) type WeakList = Option<Arc<AtomicUsize>>;

/// A reference that does not keep its target alive
pub struct WeakRef {
    target: Arc<AtomicUsize>,
}

impl WeakRef {
    /// Fails with `TypeError` unless the target's type enables weak references
    pub fn new(obj: &ObjRef) -> HostResult<Self> {
        let _gil = gil::acquire();
        let Some(offset) = obj.ty().layout().weaklist_offset else {
            return Err(HostError::type_error(format!(
                "cannot create weak reference to '{}' object",
                obj.ty().name()
            )));
        };
        let slot = unsafe { &mut *obj.region(offset).cast::<WeakList>().as_ptr() };
        let address = obj.address();
        let cell = slot.get_or_insert_with(|| Arc::new(AtomicUsize::new(address)));
        Ok(Self { target: Arc::clone(cell) })
    }

    /// A strong reference to the target, if it is still alive
    pub fn upgrade(&self) -> Option<ObjRef> {
        let _gil = gil::acquire();
        let ptr = NonNull::new(self.target.load(Ordering::Acquire) as *mut ObjectHeader)?;
        if unsafe { ptr.as_ref() }.has_flag(flags::DEALLOCATING) {
            return None;
        }
        Some(unsafe { ObjRef::from_borrowed(ptr) })
    }

    pub fn is_dead(&self) -> bool {
        self.target.load(Ordering::Acquire) == 0
    }

    /// Weak references sharing this one's target cell
    pub fn referrers(&self) -> usize {
        Arc::strong_count(&self.target) - 1
    }
}

impl fmt::Debug for WeakRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef").field("alive", &!self.is_dead()).finish()
    }
}

impl NativeClass for WeakRef {
    const NAME: &'static str = "weakref";

    fn describe(class: &mut ClassBuilder<Self>) {
        class
            .call(|this: &WeakRef, _args: &[Value]| Value::from(this.upgrade()))
            .repr(|this: &WeakRef| match this.upgrade() {
                Some(obj) => format!("<weakref; to '{}' at {:#x}>", obj.ty().name(), obj.address()),
                None => "<weakref; dead>".to_owned(),
            });
    }
}

/// A weak reference to `obj`
pub fn new(obj: &ObjRef) -> HostResult<WeakRef> {
    WeakRef::new(obj)
}

/// `weakref.ref(obj)`: a host weakref object; calling it returns the target or `None`
pub fn new_ref(obj: &ObjRef) -> HostResult<ObjRef> {
    let weak = WeakRef::new(obj)?;
    lifecycle::create(weak)
}

/// Number of live weak references to `obj`
pub fn weak_count(obj: &ObjRef) -> usize {
    let _gil = gil::acquire();
    let Some(offset) = obj.ty().layout().weaklist_offset else {
        return 0;
    };
    let slot = unsafe { &*obj.region(offset).cast::<WeakList>().as_ptr() };
    slot.as_ref().map_or(0, |cell| Arc::strong_count(cell) - 1)
}
