//! Object header - prefix of every ObjectRecord
//!
//! Layout: refcount, state flags, dynamic type pointer, payload borrow state
//! and buffer export count. A pointer to the header is also a pointer to the
//! start of the record, so every region offset is relative to it.

use crate::host::HostType;
use core::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

/// Record state bits stored in `ObjectHeader::flags`
pub mod flags {
    /// Payload has been written; cleanup hook and payload drop apply
    pub const CONSTRUCTED: u32 = 1 << 0;
    /// Record is registered with the cycle collector
    pub const GC_TRACKED: u32 = 1 << 1;
    /// Cleanup hook already ran
    pub const FINALIZED: u32 = 1 << 2;
    /// Allocation was popped from the type's freelist
    pub const FROM_FREELIST: u32 = 1 << 3;
    /// Deallocation in progress
    pub const DEALLOCATING: u32 = 1 << 4;
}

const BORROW_EXCLUSIVE: i32 = -1;

/// Header written at offset zero of every record
#[repr(C, align(8))]
pub struct ObjectHeader {
    pub refcount: AtomicU32,
    pub flags: AtomicU32,
    pub ty: NonNull<HostType>,
    borrow: AtomicI32,
    exports: AtomicU32,
}

/// Size of the header, i.e. the offset of the first record region
pub const HEADER_SIZE: usize = core::mem::size_of::<ObjectHeader>();

/// Alignment every record honors at minimum
pub const HEADER_ALIGN: usize = core::mem::align_of::<ObjectHeader>();

impl ObjectHeader {
    /// Write a fresh header (refcount 1) at the start of a zeroed record
    ///
    /// # Safety
    /// `record` must point to at least `HEADER_SIZE` writable, aligned bytes.
    #[inline]
    pub unsafe fn init(record: NonNull<u8>, ty: &'static HostType, from_freelist: bool) -> NonNull<Self> {
        let header = record.cast::<Self>();
        header.as_ptr().write(Self {
            refcount: AtomicU32::new(1),
            flags: AtomicU32::new(if from_freelist { flags::FROM_FREELIST } else { 0 }),
            ty: NonNull::from(ty),
            borrow: AtomicI32::new(0),
            exports: AtomicU32::new(0),
        });
        header
    }

    /// Dynamic type of the record
    #[inline]
    pub fn ty(&self) -> &'static HostType {
        // Type objects are leaked at registration and live for the process.
        unsafe { &*self.ty.as_ptr() }
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags.load(Ordering::Relaxed) & flag != 0
    }

    #[inline]
    pub fn set_flag(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::Relaxed);
    }

    #[inline]
    pub fn clear_flag(&self, flag: u32) {
        self.flags.fetch_and(!flag, Ordering::Relaxed);
    }

    /// Take a shared payload borrow; false while an exclusive borrow is live
    #[inline]
    pub fn try_borrow(&self) -> bool {
        let current = self.borrow.load(Ordering::Relaxed);
        if current == BORROW_EXCLUSIVE {
            return false;
        }
        self.borrow.store(current + 1, Ordering::Relaxed);
        true
    }

    #[inline]
    pub fn release_borrow(&self) {
        let old = self.borrow.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(old > 0, "shared borrow underflow");
    }

    /// Take the exclusive payload borrow; false if any borrow is live
    #[inline]
    pub fn try_borrow_mut(&self) -> bool {
        self.borrow
            .compare_exchange(0, BORROW_EXCLUSIVE, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn release_borrow_mut(&self) {
        let old = self.borrow.swap(0, Ordering::Relaxed);
        debug_assert_eq!(old, BORROW_EXCLUSIVE, "exclusive borrow not held");
    }

    /// True while any payload borrow is live
    #[inline]
    pub fn is_borrowed(&self) -> bool {
        self.borrow.load(Ordering::Relaxed) != 0
    }

    #[inline]
    pub fn exports(&self) -> u32 {
        self.exports.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn add_export(&self) {
        self.exports.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn release_export(&self) {
        let old = self.exports.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(old > 0, "buffer export underflow");
    }
}
