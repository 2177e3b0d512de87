//! Owned object references and payload borrow guards

use super::err::{HostError, HostResult};
use super::gil;
use super::types::HostType;
use crate::allocator::{flags, ObjectHeader};
use crate::gc;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;
use std::any::TypeId;
use std::fmt;

/// Owned strong reference to a host object
///
/// Clone increments the record's refcount; drop decrements it (under the
/// interpreter lock), deallocating the record when it reaches zero.
#[repr(transparent)]
pub struct ObjRef {
    ptr: NonNull<ObjectHeader>,
}

// Records are only mutated under the interpreter lock; refcounts are atomic.
unsafe impl Send for ObjRef {}
unsafe impl Sync for ObjRef {}

impl ObjRef {
    /// Adopt an existing reference without incrementing
    ///
    /// # Safety
    /// `ptr` must point to a live record and the caller must own one of its
    /// references, which is transferred to the returned handle.
    #[inline]
    pub unsafe fn from_owned(ptr: NonNull<ObjectHeader>) -> Self {
        Self { ptr }
    }

    /// Take a new reference to a record
    ///
    /// # Safety
    /// `ptr` must point to a live record.
    #[inline]
    pub unsafe fn from_borrowed(ptr: NonNull<ObjectHeader>) -> Self {
        gc::incref(ptr);
        Self { ptr }
    }

    #[inline]
    pub fn as_ptr(&self) -> NonNull<ObjectHeader> {
        self.ptr
    }

    /// Give up the handle without decrementing
    #[inline]
    pub fn into_raw(self) -> NonNull<ObjectHeader> {
        let ptr = self.ptr;
        core::mem::forget(self);
        ptr
    }

    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    pub fn ty(&self) -> &'static HostType {
        self.header().ty()
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.header().refcount()
    }

    /// Identity comparison
    #[inline]
    pub fn is(&self, other: &ObjRef) -> bool {
        self.ptr == other.ptr
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Subtype check against the record's dynamic type (constant time)
    #[inline]
    pub fn is_instance(&self, ty: &HostType) -> bool {
        self.ty().is_subtype(ty)
    }

    /// True if the record carries a `T` payload (exact type or subclass)
    pub fn is_instance_of<T: 'static>(&self) -> bool {
        let wanted = TypeId::of::<T>();
        self.ty().mro().any(|ty| ty.native_type_id() == Some(wanted))
    }

    /// Shared access to the native payload
    pub fn borrow<T: 'static>(&self) -> HostResult<PayloadRef<'_, T>> {
        let ptr = self.payload_ptr::<T>()?;
        let header = self.header();
        if !header.try_borrow() {
            return Err(HostError::runtime_error(format!(
                "'{}' object is already mutably borrowed",
                self.ty().name()
            )));
        }
        Ok(PayloadRef { header, ptr, _marker: PhantomData })
    }

    /// Shared access if the record carries a `T` payload, `None` otherwise
    pub fn downcast<T: 'static>(&self) -> HostResult<Option<PayloadRef<'_, T>>> {
        if !self.is_instance_of::<T>() {
            return Ok(None);
        }
        self.borrow::<T>().map(Some)
    }

    /// Exclusive access to the native payload
    pub fn borrow_mut<T: 'static>(&self) -> HostResult<PayloadMut<'_, T>> {
        let ptr = self.payload_ptr::<T>()?;
        let header = self.header();
        if header.exports() > 0 {
            return Err(HostError::buffer_error(format!(
                "cannot modify '{}' object while a buffer export is active",
                self.ty().name()
            )));
        }
        if !header.try_borrow_mut() {
            return Err(HostError::runtime_error(format!(
                "'{}' object is already borrowed",
                self.ty().name()
            )));
        }
        Ok(PayloadMut { header, ptr, _marker: PhantomData })
    }

    fn payload_ptr<T: 'static>(&self) -> HostResult<NonNull<T>> {
        if !self.is_instance_of::<T>() {
            return Err(HostError::type_error(format!(
                "'{}' object does not carry a '{}' payload",
                self.ty().name(),
                short_type_name::<T>()
            )));
        }
        if !self.header().has_flag(flags::CONSTRUCTED) {
            return Err(HostError::runtime_error(format!(
                "'{}' object is not initialized",
                self.ty().name()
            )));
        }
        Ok(self.region(self.ty().layout().payload_offset).cast())
    }

    /// Pointer to a byte offset inside the record
    #[inline]
    pub(crate) fn region(&self, offset: usize) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().cast::<u8>().add(offset)) }
    }

    /// Builtin container storage, if the type carries storage of type `S`
    pub(crate) fn storage<S: 'static>(&self) -> Option<&S> {
        let ty = self.ty();
        let storage = ty.storage()?;
        if storage.type_id != TypeId::of::<S>() {
            return None;
        }
        let ptr = self.region(ty.layout().storage_offset).cast::<S>();
        Some(unsafe { ptr.as_ref() })
    }

    /// The instance attribute dict slot, if the type has one
    pub(crate) fn dict_slot(&self) -> Option<NonNull<Option<ObjRef>>> {
        self.ty().layout().dict_offset.map(|offset| self.region(offset).cast())
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

impl Clone for ObjRef {
    #[inline]
    fn clone(&self) -> Self {
        gc::incref(self.ptr);
        Self { ptr: self.ptr }
    }
}

impl Drop for ObjRef {
    #[inline]
    fn drop(&mut self) {
        let _gil = gil::acquire();
        gc::decref(self.ptr);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object at {:p}>", self.ty().name(), self.ptr.as_ptr())
    }
}

/// Shared borrow of an object's payload
pub struct PayloadRef<'a, T> {
    header: &'a ObjectHeader,
    ptr: NonNull<T>,
    _marker: PhantomData<&'a T>,
}

impl<T> Deref for PayloadRef<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Drop for PayloadRef<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.header.release_borrow();
    }
}

/// Exclusive borrow of an object's payload
pub struct PayloadMut<'a, T> {
    header: &'a ObjectHeader,
    ptr: NonNull<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<T> Deref for PayloadMut<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PayloadMut<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PayloadMut<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.header.release_borrow_mut();
    }
}
