//! Record allocation - zeroed raw memory with an optional byte budget
//!
//! Design: Two layers.
//! 1. `FreelistPool` per type (fast path, owned by the type object)
//! 2. System allocator with a process-wide budget (slow path)
//!
//! Every allocation is zero-filled, so a record is observably zeroed before
//! any constructor runs.

mod freelist;
mod header;


pub use freelist::{FreelistPool, FreelistStats};
pub use header::{flags, ObjectHeader, HEADER_ALIGN, HEADER_SIZE};

use crate::config::AllocatorConfig;
use crate::logging::{log_allocation, log_deallocation, warn};
use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

const UNLIMITED: usize = usize::MAX;

static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
static LIMIT_BYTES: AtomicUsize = AtomicUsize::new(UNLIMITED);
static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static RELEASES: AtomicUsize = AtomicUsize::new(0);
static REFUSED: AtomicUsize = AtomicUsize::new(0);

/// Apply allocator configuration
pub fn init(config: &AllocatorConfig) {
    set_allocation_limit(config.limit_bytes);
}

/// Cap the number of live record bytes (`None` removes the cap)
pub fn set_allocation_limit(limit: Option<usize>) {
    LIMIT_BYTES.store(limit.unwrap_or(UNLIMITED), Ordering::Relaxed);
}

pub fn allocation_limit() -> Option<usize> {
    match LIMIT_BYTES.load(Ordering::Relaxed) {
        UNLIMITED => None,
        limit => Some(limit),
    }
}

/// Allocate a zeroed block, or `None` when the budget or the system refuses
pub fn allocate(layout: Layout) -> Option<NonNull<u8>> {
    let size = layout.size();
    let limit = LIMIT_BYTES.load(Ordering::Relaxed);
    let live = LIVE_BYTES.fetch_add(size, Ordering::Relaxed);

    if limit != UNLIMITED && live.saturating_add(size) > limit {
        LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
        REFUSED.fetch_add(1, Ordering::Relaxed);
        warn!(event = "allocation_refused", size_bytes = size, live_bytes = live, limit_bytes = limit);
        return None;
    }

    let ptr = unsafe { alloc_zeroed(layout) };
    match NonNull::new(ptr) {
        Some(ptr) => {
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
            log_allocation(size, ptr.as_ptr());
            Some(ptr)
        }
        None => {
            LIVE_BYTES.fetch_sub(size, Ordering::Relaxed);
            REFUSED.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

/// Return a block to the system allocator
///
/// # Safety
/// `ptr` must come from `allocate` with the same `layout` and not be used again.
pub unsafe fn release(ptr: NonNull<u8>, layout: Layout) {
    log_deallocation(ptr.as_ptr());
    dealloc(ptr.as_ptr(), layout);
    LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
    RELEASES.fetch_add(1, Ordering::Relaxed);
}

/// Get allocator statistics
pub fn stats() -> AllocatorStats {
    AllocatorStats {
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
        allocations: ALLOCATIONS.load(Ordering::Relaxed),
        releases: RELEASES.load(Ordering::Relaxed),
        refused: REFUSED.load(Ordering::Relaxed),
    }
}

/// Allocator statistics for monitoring and debugging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub live_bytes: usize,
    pub allocations: usize,
    pub releases: usize,
    pub refused: usize,
}
