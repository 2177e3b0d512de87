//! Reference counting entry points

use crate::allocator::ObjectHeader;
use crate::gc;
use crate::host::gil;
use core::ptr::NonNull;

/// Increment a record's reference count
///
/// # Safety
/// - Null-safe (no-op for null pointers)
/// - A non-null `obj` must point to a live record
#[no_mangle]
pub unsafe extern "C" fn pybridge_incref(obj: *mut ObjectHeader) {
    let Some(ptr) = NonNull::new(obj) else {
        return;
    };
    let _gil = gil::acquire();
    gc::incref(ptr);
}

/// Decrement a record's reference count, deallocating it at zero
///
/// # Safety
/// - Null-safe (no-op for null pointers)
/// - A non-null `obj` must point to a live record the caller holds a reference to
#[no_mangle]
pub unsafe extern "C" fn pybridge_decref(obj: *mut ObjectHeader) {
    let Some(ptr) = NonNull::new(obj) else {
        return;
    };
    let _gil = gil::acquire();
    gc::decref(ptr);
}

/// Current reference count; 0 for null
///
/// # Safety
/// A non-null `obj` must point to a live record
#[no_mangle]
pub unsafe extern "C" fn pybridge_refcount(obj: *const ObjectHeader) -> u32 {
    match obj.as_ref() {
        Some(header) => header.refcount(),
        None => 0,
    }
}
