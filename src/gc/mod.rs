//! Garbage collection - reference counting + cycle collection
//!
//! Design: Hybrid approach matching the host object model:
//! 1. Reference counting (fast path, deterministic)
//! 2. Trial-deletion cycle collector over tracked records (rare)
//! 3. Collection triggered after a threshold of tracked allocations
//!
//! The collector never frees memory directly. It finalizes unreachable
//! records, asks each to clear its references, and lets reference counting
//! deallocate them.

mod cycles;
mod refcount;


pub use cycles::{collect, is_tracked, tracked_count};
pub(crate) use cycles::{track, untrack};
pub use refcount::{decref, incref};

use crate::allocator::ObjectHeader;
use crate::config::GcConfig;
use crate::host::{ObjRef, Value};
use crate::logging::{debug, info};
use core::ptr::NonNull;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Collector configuration and counters (lock-free)
static GC_STATE: Lazy<GcState> = Lazy::new(GcState::new);

struct GcState {
    enabled: AtomicBool,
    threshold: AtomicUsize,
    since_collection: AtomicUsize,
    collections: AtomicUsize,
    collected: AtomicUsize,
}

impl GcState {
    const INITIAL_THRESHOLD: usize = 700;

    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            threshold: AtomicUsize::new(Self::INITIAL_THRESHOLD),
            since_collection: AtomicUsize::new(0),
            collections: AtomicUsize::new(0),
            collected: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn note_allocation(&self) -> bool {
        let count = self.since_collection.fetch_add(1, Ordering::Relaxed) + 1;
        count >= self.threshold.load(Ordering::Relaxed)
    }

    fn finish_collection(&self, collected: usize) {
        self.since_collection.store(0, Ordering::Relaxed);
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.collected.fetch_add(collected, Ordering::Relaxed);
    }
}

/// Apply collector configuration
pub fn init(config: &GcConfig) {
    GC_STATE.enabled.store(config.enabled, Ordering::Relaxed);
    GC_STATE.threshold.store(config.threshold.max(1), Ordering::Relaxed);
    debug!(
        enabled = config.enabled,
        threshold = config.threshold,
        "cycle collector configured"
    );
}

/// Final collection before shutdown
pub fn cleanup() {
    info!(tracked = tracked_count(), "final cycle collection");
    collect();
}

pub fn set_enabled(enabled: bool) {
    GC_STATE.enabled.store(enabled, Ordering::Relaxed);
}

pub fn is_enabled() -> bool {
    GC_STATE.enabled.load(Ordering::Relaxed)
}

pub fn set_threshold(threshold: usize) {
    GC_STATE.threshold.store(threshold.max(1), Ordering::Relaxed);
}

/// Count a tracked allocation and collect once the threshold is reached
#[inline]
pub fn maybe_collect() {
    if GC_STATE.note_allocation() && is_enabled() {
        debug!(
            allocations = GC_STATE.since_collection.load(Ordering::Relaxed),
            threshold = GC_STATE.threshold.load(Ordering::Relaxed),
            "collection threshold exceeded"
        );
        collect();
    }
}

/// Collector statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub tracked: usize,
    pub collections: usize,
    pub collected: usize,
    pub threshold: usize,
}

pub fn stats() -> GcStats {
    GcStats {
        tracked: tracked_count(),
        collections: GC_STATE.collections.load(Ordering::Relaxed),
        collected: GC_STATE.collected.load(Ordering::Relaxed),
        threshold: GC_STATE.threshold.load(Ordering::Relaxed),
    }
}

/// Callback handed to traversal hooks
///
/// A non-zero return from `visit` stops the traversal and is passed back
/// to whoever started it.
pub struct Visitor<'a> {
    visit: &'a mut dyn FnMut(NonNull<ObjectHeader>) -> i32,
}

impl<'a> Visitor<'a> {
    pub(crate) fn new(visit: &'a mut dyn FnMut(NonNull<ObjectHeader>) -> i32) -> Self {
        Self { visit }
    }

    /// Report one held reference
    #[inline]
    pub fn visit(&mut self, obj: &ObjRef) -> i32 {
        (self.visit)(obj.as_ptr())
    }

    /// Report the reference inside a value, if it holds one
    #[inline]
    pub fn visit_value(&mut self, value: &Value) -> i32 {
        match value {
            Value::Obj(obj) => self.visit(obj),
            _ => 0,
        }
    }

    /// Report every value in a slice, stopping at the first non-zero result
    pub fn visit_all<'v>(&mut self, values: impl IntoIterator<Item = &'v Value>) -> i32 {
        for value in values {
            let result = self.visit_value(value);
            if result != 0 {
                return result;
            }
        }
        0
    }
}
