//! Freelist pool - bounded stack of recycled records for one type
//!
//! Entries are raw record allocations whose payload has already been torn
//! down. Popping re-zeroes the whole record before handing it out.

use core::ptr::NonNull;

/// Fixed-capacity stack of recycled record allocations
pub struct FreelistPool {
    capacity: usize,
    record_size: usize,
    entries: Vec<NonNull<u8>>,
    stats: FreelistStats,
}

// Entries are only touched while the interpreter lock is held.
unsafe impl Send for FreelistPool {}

impl FreelistPool {
    pub fn new(capacity: usize, record_size: usize) -> Self {
        Self {
            capacity,
            record_size,
            entries: Vec::with_capacity(capacity),
            stats: FreelistStats::default(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Pop a recycled record, zero-filled
    pub fn pop(&mut self) -> Option<NonNull<u8>> {
        match self.entries.pop() {
            Some(ptr) => {
                unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0, self.record_size) };
                self.stats.reused += 1;
                Some(ptr)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Push a record; hands it back when the pool is full
    pub fn push(&mut self, ptr: NonNull<u8>) -> Result<(), NonNull<u8>> {
        if self.is_full() {
            self.stats.overflowed += 1;
            return Err(ptr);
        }
        self.entries.push(ptr);
        self.stats.recycled += 1;
        Ok(())
    }

    /// Remove every pooled record (caller frees them)
    pub fn drain(&mut self) -> Vec<NonNull<u8>> {
        std::mem::take(&mut self.entries)
    }

    pub fn stats(&self) -> FreelistStats {
        self.stats
    }
}

/// Freelist counters for one type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreelistStats {
    /// Allocations served from the pool
    pub reused: usize,
    /// Allocations that found the pool empty
    pub misses: usize,
    /// Deallocations kept in the pool
    pub recycled: usize,
    /// Deallocations that found the pool full
    pub overflowed: usize,
}
