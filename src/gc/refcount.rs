//! Reference count primitives
//!
//! Counts live inline in the record header. Increments are relaxed; the
//! decrement that reaches zero synchronizes with every earlier decrement
//! before the record is torn down.

use crate::allocator::{flags, ObjectHeader};
use crate::lifecycle;
use crate::logging::log_invariant_violation;
use core::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

/// Increment a record's reference count (hot path)
#[inline(always)]
pub fn incref(ptr: NonNull<ObjectHeader>) {
    let header = unsafe { ptr.as_ref() };
    let old = header.refcount.fetch_add(1, Ordering::Relaxed);
    debug_assert!(old < u32::MAX, "refcount overflow");
}

/// Decrement a record's reference count, deallocating at zero (hot path)
#[inline(always)]
pub fn decref(ptr: NonNull<ObjectHeader>) {
    let header = unsafe { ptr.as_ref() };
    let old = header.refcount.fetch_sub(1, Ordering::Release);

    if old == 1 {
        fence(Ordering::Acquire);
        release(ptr);
    } else if old == 0 {
        underflow(header);
    }
}

#[cold]
fn release(ptr: NonNull<ObjectHeader>) {
    // The last reference went away: nothing else can observe the record.
    unsafe { lifecycle::deallocate(ptr) }
}

#[cold]
fn underflow(header: &ObjectHeader) {
    header.refcount.store(0, Ordering::Relaxed);
    let detail = format!(
        "'{}' record released more times than referenced (deallocating: {})",
        header.ty().name(),
        header.has_flag(flags::DEALLOCATING)
    );
    log_invariant_violation("refcount underflow", &detail);
}
