//! Object lifecycle - allocate, construct, finalize, deallocate
//!
//! States of one record:
//!
//! ```text
//! Allocated -> Constructed -> [tracked] -> Finalized -> Deallocated
//!     |                                                     |
//!     +-- constructor failed: released, no cleanup hook     +-- freelist or free
//! ```
//!
//! Deallocation order is fixed: cleanup hook, weakref invalidation, dict
//! release, strong reference clearing, payload drop, storage drop, then the
//! record goes back to its type's freelist or to the system allocator.

#[cfg(test)]
mod tests;

use crate::allocator::{self, flags, ObjectHeader};
use crate::config::FreelistConfig;
use crate::descriptor::FieldDescriptor;
use crate::gc::{self, Visitor};
use crate::host::err::bridge;
use crate::host::weakref::WeakList;
use crate::host::{gil, registry, HostError, HostResult, HostType, ObjRef, Value};
use crate::logging::{debug, log_freelist, log_invariant_violation, trace};
use crate::module::{self, NativeClass};
use core::mem::ManuallyDrop;
use core::ptr::NonNull;
use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};

static FREELISTS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Apply freelist configuration
pub fn init(config: &FreelistConfig) {
    FREELISTS_ENABLED.store(config.enabled, Ordering::Relaxed);
}

#[inline]
pub fn freelists_enabled() -> bool {
    FREELISTS_ENABLED.load(Ordering::Relaxed)
}

/// Release every pooled record of every registered type
pub fn drain_freelists() -> usize {
    let _gil = gil::acquire();
    let mut released = 0;
    for ty in registry::types() {
        let Some(pool) = ty.freelist() else { continue };
        let entries = pool.lock().drain();
        released += entries.len();
        for ptr in entries {
            unsafe { allocator::release(ptr, ty.layout().alloc_layout()) };
        }
        log_freelist(ty.name(), "drain", 0);
    }
    released
}

/// An allocated, not yet constructed record
///
/// Dropping it returns the memory without running any hook: nothing was
/// constructed, so there is nothing to finalize.
pub(crate) struct RawRecord {
    ptr: NonNull<ObjectHeader>,
}

impl RawRecord {
    #[inline]
    fn header(&self) -> &ObjectHeader {
        unsafe { self.ptr.as_ref() }
    }

    #[cfg(test)]
    pub(crate) fn as_ptr(&self) -> NonNull<ObjectHeader> {
        self.ptr
    }

    fn payload_ptr(&self) -> *mut u8 {
        let offset = self.header().ty().layout().payload_offset;
        unsafe { self.ptr.as_ptr().cast::<u8>().add(offset) }
    }

    /// Write the payload and hand the record to refcounting
    pub(crate) fn finish<T: 'static>(self, payload: T) -> ObjRef {
        unsafe { self.payload_ptr().cast::<T>().write(payload) };
        self.publish()
    }

    /// Publish a record whose type carries no payload
    pub(crate) fn finish_empty(self) -> ObjRef {
        self.publish()
    }

    fn publish(self) -> ObjRef {
        let record = ManuallyDrop::new(self);
        let header = record.header();
        header.set_flag(flags::CONSTRUCTED);
        let obj = unsafe { ObjRef::from_owned(record.ptr) };
        if header.ty().is_gc() {
            gc::track(record.ptr);
            gc::maybe_collect();
        }
        obj
    }
}

impl Drop for RawRecord {
    fn drop(&mut self) {
        let ty = self.header().ty();
        trace!(type_name = ty.name(), "releasing unconstructed record");
        unsafe {
            drop_storage(self.ptr, ty);
            release_record(self.ptr, ty);
        }
    }
}

fn pop_freelist(ty: &'static HostType) -> Option<NonNull<u8>> {
    if !freelists_enabled() {
        return None;
    }
    let mut pool = ty.freelist()?.lock();
    let ptr = pool.pop()?;
    log_freelist(ty.name(), "pop", pool.len());
    Some(ptr)
}

/// Allocate a zeroed record with an initialized header and storage
///
/// Fails with `MemoryError` before any constructor can run.
pub(crate) fn allocate(ty: &'static HostType) -> HostResult<RawRecord> {
    let layout = ty.layout();
    let (memory, from_freelist) = match pop_freelist(ty) {
        Some(ptr) => (ptr, true),
        None => {
            let ptr = allocator::allocate(layout.alloc_layout()).ok_or_else(|| {
                HostError::memory_error(format!(
                    "cannot allocate {} bytes for '{}' object",
                    layout.size,
                    ty.name()
                ))
            })?;
            (ptr, false)
        }
    };

    let ptr = unsafe { ObjectHeader::init(memory, ty, from_freelist) };
    if let Some(storage) = ty.storage() {
        unsafe { (storage.init)(memory.as_ptr().add(layout.storage_offset)) };
    }
    Ok(RawRecord { ptr })
}

/// Build a record of `ty` around an existing payload
pub(crate) fn construct<T: 'static>(ty: &'static HostType, payload: T) -> HostResult<ObjRef> {
    if ty.native_type_id() != Some(TypeId::of::<T>()) {
        return Err(HostError::type_error(format!(
            "'{}' objects do not carry a '{}' payload",
            ty.name(),
            std::any::type_name::<T>()
        )));
    }
    let _gil = gil::acquire();
    Ok(allocate(ty)?.finish(payload))
}

/// Build an instance of a payload-less type (`object`, `list`, `dict`)
pub(crate) fn construct_empty(ty: &'static HostType) -> HostResult<ObjRef> {
    if ty.payload().is_some() {
        return Err(HostError::type_error(format!("'{}' objects need a payload", ty.name())));
    }
    let _gil = gil::acquire();
    Ok(allocate(ty)?.finish_empty())
}

/// Wrap a native value as a new host object of its registered type
pub fn create<T: NativeClass>(value: T) -> HostResult<ObjRef> {
    let _gil = gil::acquire();
    let ty = module::type_object::<T>()?;
    construct(ty, value)
}

/// Call a type: allocate, run its constructor, publish
pub fn instantiate(ty: &'static HostType, args: &[Value]) -> HostResult<ObjRef> {
    let _gil = gil::acquire();
    match ty.constructor() {
        Some(ctor) => ctor(ty, args),
        None => Err(HostError::type_error(format!("cannot create '{}' instances", ty.name()))),
    }
}

/// Fill a default payload from one argument per flattened public field
pub(crate) fn fill_fields<T>(payload: &mut T, fields: &[std::sync::Arc<FieldDescriptor>], args: &[Value]) -> HostResult<()> {
    if args.len() != fields.len() {
        return Err(HostError::type_error(format!(
            "expected {} arguments ({}), got {}",
            fields.len(),
            fields.iter().map(|field| field.name).collect::<Vec<_>>().join(", "),
            args.len()
        )));
    }
    let base = (payload as *mut T).cast::<u8>();
    for (field, arg) in fields.iter().zip(args) {
        let old = unsafe { field.write(base, arg)? };
        drop(old);
    }
    Ok(())
}

/// Run the cleanup hook if it has not run yet
///
/// The record counts as finalized only once the hook has run. A hook that
/// could not borrow its payload fails here and runs again on the next attempt.
pub(crate) fn finalize(obj: &ObjRef) -> HostResult<()> {
    let header = obj.header();
    if !header.has_flag(flags::CONSTRUCTED) || header.has_flag(flags::FINALIZED) {
        return Ok(());
    }
    let Some(hook) = &obj.ty().slots().cleanup else {
        header.set_flag(flags::FINALIZED);
        return Ok(());
    };
    trace!(type_name = obj.ty().name(), "running cleanup hook");
    // Set before the call: a hook may finalize its own receiver.
    header.set_flag(flags::FINALIZED);
    let result = bridge(hook(obj), "__del__");
    if result.is_err() {
        header.clear_flag(flags::FINALIZED);
    }
    result
}

/// Cleanup hook run from deallocation; false if the hook resurrected the record
unsafe fn finalize_for_dealloc(ptr: NonNull<ObjectHeader>) -> bool {
    let header = ptr.as_ref();
    header.set_flag(flags::FINALIZED);
    // The hook sees a live record: weak references still upgrade.
    header.clear_flag(flags::DEALLOCATING);
    header.refcount.store(1, Ordering::Relaxed);
    let obj = ObjRef::from_owned(ptr);
    if let Some(hook) = &header.ty().slots().cleanup {
        if let Err(err) = bridge(hook(&obj), "__del__") {
            log_invariant_violation("cleanup hook failed during deallocation", &err.to_string());
        }
    }
    let ptr = obj.into_raw();
    let old = header.refcount.fetch_sub(1, Ordering::AcqRel);
    if old > 1 {
        if header.ty().is_gc() {
            gc::track(ptr);
        }
        debug!(type_name = header.ty().name(), refcount = old - 1, "cleanup hook resurrected record");
        return false;
    }
    header.set_flag(flags::DEALLOCATING);
    true
}

/// Tear down a record whose refcount reached zero
///
/// # Safety
/// `ptr` must point to a live record with no remaining references.
pub(crate) unsafe fn deallocate(ptr: NonNull<ObjectHeader>) {
    let header = ptr.as_ref();
    if header.has_flag(flags::DEALLOCATING) {
        log_invariant_violation("deallocation re-entered", header.ty().name());
        return;
    }
    header.set_flag(flags::DEALLOCATING);
    let ty = header.ty();
    let layout = ty.layout();
    let constructed = header.has_flag(flags::CONSTRUCTED);
    gc::untrack(ptr);

    if constructed
        && !header.has_flag(flags::FINALIZED)
        && ty.slots().cleanup.is_some()
        && !finalize_for_dealloc(ptr)
    {
        return;
    }

    let base = ptr.as_ptr().cast::<u8>();

    if let Some(offset) = layout.weaklist_offset {
        let slot = &mut *base.add(offset).cast::<WeakList>();
        if let Some(cell) = slot.take() {
            cell.store(0, Ordering::Release);
        }
    }

    if let Some(offset) = layout.dict_offset {
        let dict = (*base.add(offset).cast::<Option<ObjRef>>()).take();
        drop(dict);
    }

    if constructed {
        let payload = base.add(layout.payload_offset);
        let mut referents = Vec::new();
        for field in ty.strong_ref_fields() {
            field.take_refs(payload, &mut referents);
        }
        drop(referents);

        if let Some(vtable) = ty.payload() {
            (vtable.drop)(payload);
        }
    }

    drop_storage(ptr, ty);
    release_record(ptr, ty);
}

unsafe fn drop_storage(ptr: NonNull<ObjectHeader>, ty: &HostType) {
    if let Some(storage) = ty.storage() {
        (storage.drop)(ptr.as_ptr().cast::<u8>().add(ty.layout().storage_offset));
    }
}

/// Pool the record if its type has room, otherwise free it
unsafe fn release_record(ptr: NonNull<ObjectHeader>, ty: &HostType) {
    let memory = ptr.cast::<u8>();
    if freelists_enabled() {
        if let Some(pool) = ty.freelist() {
            let mut pool = pool.lock();
            if pool.push(memory).is_ok() {
                log_freelist(ty.name(), "push", pool.len());
                return;
            }
        }
    }
    allocator::release(memory, ty.layout().alloc_layout());
}

/// Report every reference a record holds
///
/// Covers the dict slot, builtin storage, declared reference fields and the
/// type's traverse hook. A non-zero visitor result stops the walk.
pub(crate) fn traverse(obj: &ObjRef, visitor: &mut Visitor<'_>) -> i32 {
    let ty = obj.ty();
    let layout = ty.layout();

    if let Some(slot) = obj.dict_slot() {
        if let Some(dict) = unsafe { slot.as_ref() } {
            let result = visitor.visit(dict);
            if result != 0 {
                return result;
            }
        }
    }

    if let Some(storage) = ty.storage() {
        let result = unsafe { (storage.traverse)(obj.region(layout.storage_offset).as_ptr(), visitor) };
        if result != 0 {
            return result;
        }
    }

    if obj.header().has_flag(flags::CONSTRUCTED) {
        let payload = obj.region(layout.payload_offset).as_ptr();
        for field in ty.gc_fields() {
            let result = unsafe { field.visit(payload, visitor) };
            if result != 0 {
                return result;
            }
        }
        if let Some(hook) = &ty.slots().traverse {
            return hook(obj, visitor);
        }
    }
    0
}

/// Traverse a record the caller only has a pointer to
pub(crate) fn visit_raw(ptr: NonNull<ObjectHeader>, visitor: &mut Visitor<'_>) -> i32 {
    let obj = ManuallyDrop::new(unsafe { ObjRef::from_owned(ptr) });
    traverse(&obj, visitor)
}

/// Objects directly referenced by `obj`
pub fn referents(obj: &ObjRef) -> HostResult<Vec<ObjRef>> {
    let _gil = gil::acquire();
    let header = obj.header();
    if !header.try_borrow() {
        return Err(HostError::runtime_error(format!(
            "'{}' object is mutably borrowed",
            obj.ty().name()
        )));
    }
    let mut found = Vec::new();
    let mut collect = |child: NonNull<ObjectHeader>| {
        found.push(unsafe { ObjRef::from_borrowed(child) });
        0
    };
    traverse(obj, &mut Visitor::new(&mut collect));
    header.release_borrow();
    Ok(found)
}

/// Drop every reference a record holds, breaking cycles through it
///
/// Idempotent: cleared fields are empty, so a second pass finds nothing.
pub(crate) fn clear(obj: &ObjRef) {
    let ty = obj.ty();
    let layout = ty.layout();
    let header = obj.header();
    let mut released: Vec<ObjRef> = Vec::new();

    if let Some(slot) = obj.dict_slot() {
        released.extend(unsafe { (*slot.as_ptr()).take() });
    }

    if let Some(storage) = ty.storage() {
        unsafe { (storage.clear)(obj.region(layout.storage_offset).as_ptr(), &mut released) };
    }

    if header.has_flag(flags::CONSTRUCTED) {
        if header.try_borrow_mut() {
            let payload = obj.region(layout.payload_offset).as_ptr();
            for field in ty.gc_fields() {
                unsafe { field.take_refs(payload, &mut released) };
            }
            header.release_borrow_mut();
        } else {
            log_invariant_violation("clear skipped borrowed payload", ty.name());
        }
        if let Some(hook) = &ty.slots().clear {
            hook(obj);
        }
    }

    trace!(type_name = ty.name(), released = released.len(), "record cleared");
    drop(released);
}

/// Payload pointer of a constructed record, for field descriptors
fn payload_of(obj: &ObjRef) -> HostResult<*mut u8> {
    if !obj.header().has_flag(flags::CONSTRUCTED) || obj.ty().payload().is_none() {
        return Err(HostError::runtime_error(format!(
            "'{}' object is not initialized",
            obj.ty().name()
        )));
    }
    Ok(obj.region(obj.ty().layout().payload_offset).as_ptr())
}

/// Read a public field through its descriptor
pub(crate) fn read_field(obj: &ObjRef, field: &FieldDescriptor) -> HostResult<Value> {
    let payload = payload_of(obj)?;
    let header = obj.header();
    if !header.try_borrow() {
        return Err(HostError::runtime_error(format!(
            "'{}' object is already mutably borrowed",
            obj.ty().name()
        )));
    }
    let value = unsafe { field.read(payload) };
    header.release_borrow();
    Ok(value)
}

/// Store into a public field; the previous value is released after the write
pub(crate) fn write_field(obj: &ObjRef, field: &FieldDescriptor, value: &Value) -> HostResult<()> {
    let payload = payload_of(obj)?;
    let header = obj.header();
    if header.exports() > 0 {
        return Err(HostError::buffer_error(format!(
            "cannot modify '{}' object while a buffer export is active",
            obj.ty().name()
        )));
    }
    if !header.try_borrow_mut() {
        return Err(HostError::runtime_error(format!(
            "'{}' object is already borrowed",
            obj.ty().name()
        )));
    }
    let result = unsafe { field.write(payload, value) };
    header.release_borrow_mut();
    drop(result?);
    Ok(())
}
