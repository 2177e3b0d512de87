//! Cycle detection via trial deletion
//!
//! Rare operation for reference cycles that refcounting can't reclaim.
//! Based on the host's generational collector: subtract every reference a
//! tracked record receives from another tracked record; whatever still has a
//! positive count is referenced from outside and roots the reachable set.

use super::{Visitor, GC_STATE};
use crate::allocator::{flags, ObjectHeader};
use crate::host::{gil, ObjRef};
use crate::lifecycle;
use crate::logging::{debug, log_gc_complete, log_gc_start, trace};
use core::ptr::NonNull;
use dashmap::DashSet;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Global cycle collector state
static COLLECTOR: Lazy<CycleCollector> = Lazy::new(CycleCollector::new);

struct CycleCollector {
    /// Addresses of tracked records
    tracked: DashSet<usize>,
    /// Held for the duration of a collection; finalizers that allocate
    /// cannot start a nested one
    collection_lock: Mutex<()>,
}

#[inline]
fn header_at<'a>(addr: usize) -> &'a ObjectHeader {
    unsafe { &*(addr as *const ObjectHeader) }
}

#[inline]
fn address(ptr: NonNull<ObjectHeader>) -> usize {
    ptr.as_ptr() as usize
}

/// Report the tracked children of one record
///
/// Records with a live payload borrow are skipped: their edges are neither
/// subtracted nor followed, which keeps their children conservatively alive.
fn visit_children(addr: usize, visit: &mut dyn FnMut(NonNull<ObjectHeader>) -> i32) {
    if header_at(addr).is_borrowed() {
        return;
    }
    let ptr = unsafe { NonNull::new_unchecked(addr as *mut ObjectHeader) };
    lifecycle::visit_raw(ptr, &mut Visitor::new(visit));
}

impl CycleCollector {
    fn new() -> Self {
        Self {
            tracked: DashSet::with_capacity(1024),
            collection_lock: Mutex::new(()),
        }
    }

    fn snapshot(&self) -> Vec<usize> {
        self.tracked.iter().map(|entry| *entry.key()).collect()
    }

    /// Records in `candidates` not reachable from outside the set
    ///
    /// `held` names records the collector itself holds one reference to.
    fn find_unreachable(&self, candidates: &[usize], held: &HashSet<usize>) -> Vec<usize> {
        // Phase 1: external reference estimate per record
        let mut gc_refs: HashMap<usize, i64> = candidates
            .iter()
            .map(|&addr| {
                let own = i64::from(held.contains(&addr));
                (addr, i64::from(header_at(addr).refcount()) - own)
            })
            .collect();

        // Phase 2: subtract references coming from inside the candidate set
        trace!("subtracting internal references");
        for &addr in candidates {
            visit_children(addr, &mut |child| {
                if let Some(refs) = gc_refs.get_mut(&address(child)) {
                    *refs -= 1;
                }
                0
            });
        }

        // Phase 3: everything reachable from an externally referenced record survives
        trace!("propagating reachability");
        let mut stack: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|addr| gc_refs[addr] > 0 || header_at(*addr).is_borrowed())
            .collect();
        let mut reachable = HashSet::with_capacity(candidates.len());

        while let Some(addr) = stack.pop() {
            if !reachable.insert(addr) {
                continue;
            }
            visit_children(addr, &mut |child| {
                let child = address(child);
                if gc_refs.contains_key(&child) && !reachable.contains(&child) {
                    stack.push(child);
                }
                0
            });
        }

        candidates.iter().copied().filter(|addr| !reachable.contains(addr)).collect()
    }

    fn collect(&self) -> usize {
        let _gil = gil::acquire();
        let Some(_guard) = self.collection_lock.try_lock() else {
            trace!("collection already running");
            return 0;
        };
        let start = Instant::now();

        let candidates = self.snapshot();
        log_gc_start(candidates.len());
        let unreachable = self.find_unreachable(&candidates, &HashSet::new());

        if unreachable.is_empty() {
            GC_STATE.finish_collection(0);
            log_gc_complete(start.elapsed().as_micros() as u64, 0, self.tracked.len());
            return 0;
        }

        // Hold every doomed record so nothing is freed while hooks run.
        let doomed: Vec<ObjRef> = unreachable
            .iter()
            .map(|&addr| unsafe { ObjRef::from_borrowed(NonNull::new_unchecked(addr as *mut ObjectHeader)) })
            .collect();
        debug!(unreachable = doomed.len(), "finalizing unreachable records");

        // Phase 4: cleanup hooks, each with every field still valid
        let mut deferred = HashSet::new();
        for obj in &doomed {
            if lifecycle::finalize(obj).is_err() {
                deferred.insert(obj.address());
            }
        }

        // Phase 5: a finalizer may have stored a doomed record somewhere live.
        // Records whose hook could not run root the re-check, so they and
        // everything they reach wait for a later collection.
        let held: HashSet<usize> = unreachable.iter().copied().filter(|addr| !deferred.contains(addr)).collect();
        let candidates = self.snapshot();
        let still_unreachable: HashSet<usize> = self
            .find_unreachable(&candidates, &held)
            .into_iter()
            .filter(|addr| held.contains(addr))
            .collect();
        let survivors = doomed.len() - still_unreachable.len();
        if survivors > 0 {
            debug!(survivors, deferred = deferred.len(), "records survived finalization");
        }

        // Phase 6: break the cycles; refcounting frees the records
        let mut collected = 0;
        for obj in &doomed {
            if still_unreachable.contains(&obj.address()) {
                lifecycle::clear(obj);
                collected += 1;
            }
        }
        drop(doomed);

        GC_STATE.finish_collection(collected);
        log_gc_complete(start.elapsed().as_micros() as u64, collected, self.tracked.len());
        collected
    }
}

/// Register a record with the collector
pub(crate) fn track(ptr: NonNull<ObjectHeader>) {
    let header = unsafe { ptr.as_ref() };
    header.set_flag(flags::GC_TRACKED);
    COLLECTOR.tracked.insert(address(ptr));
}

/// Remove a record from the collector
pub(crate) fn untrack(ptr: NonNull<ObjectHeader>) {
    let header = unsafe { ptr.as_ref() };
    if header.has_flag(flags::GC_TRACKED) {
        header.clear_flag(flags::GC_TRACKED);
        COLLECTOR.tracked.remove(&address(ptr));
    }
}

pub fn is_tracked(obj: &ObjRef) -> bool {
    obj.header().has_flag(flags::GC_TRACKED)
}

pub fn tracked_count() -> usize {
    COLLECTOR.tracked.len()
}

/// Run a full collection, returning the number of records reclaimed
pub fn collect() -> usize {
    COLLECTOR.collect()
}
