//! Typed hook adapters
//!
//! Each function turns a typed Rust callable over the payload `T` into the
//! erased slot the host dispatches through. The adapter borrows the payload
//! for exactly the duration of the call, applies the hook's return
//! convention, and answers `NotImplemented` when the other operand is not a
//! `T` so the host can try the reflected side.

use super::buffer::BufferSpec;
use super::slots::*;
use crate::descriptor::{IntoHookResult, PropertyGet, PropertySet};
use crate::gc::Visitor;
use crate::host::value::IntoValue;
use crate::host::{HookFailure, HookResult, HostType, ObjRef, Value};
use std::sync::Arc;

/// The other operand as a `T` instance, or `NotImplemented`
fn same_type<'a, T: 'static>(other: &'a Value) -> HookResult<&'a ObjRef> {
    match other {
        Value::Obj(obj) if obj.is_instance_of::<T>() => Ok(obj),
        _ => Err(HookFailure::NotImplemented),
    }
}

pub fn repr<T, F, R>(f: F) -> ReprSlot
where
    T: 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = String>,
{
    Arc::new(move |obj: &ObjRef| {
        let this = obj.borrow::<T>()?;
        f(&*this).into_hook_result()
    })
}

pub fn hash<T, F, R>(f: F) -> HashSlot
where
    T: 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = i64>,
{
    Arc::new(move |obj: &ObjRef| {
        let this = obj.borrow::<T>()?;
        f(&*this).into_hook_result()
    })
}

pub fn boolean<T, F, R>(f: F) -> BoolSlot
where
    T: 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = bool>,
{
    Arc::new(move |obj: &ObjRef| {
        let this = obj.borrow::<T>()?;
        f(&*this).into_hook_result()
    })
}

pub fn len<T, F, R>(f: F) -> LenSlot
where
    T: 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = usize>,
{
    Arc::new(move |obj: &ObjRef| {
        let this = obj.borrow::<T>()?;
        f(&*this).into_hook_result()
    })
}

pub fn unary<T, F, R>(f: F) -> UnarySlot
where
    T: 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Arc::new(move |obj: &ObjRef| {
        let result = {
            let this = obj.borrow::<T>()?;
            f(&*this).into_hook_result()?
        };
        Ok(result.into_value()?)
    })
}

/// `a op b` with both operands of type `T`
pub fn binary<T, F, R>(f: F) -> BinarySlot
where
    T: 'static,
    F: Fn(&T, &T) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Arc::new(move |obj: &ObjRef, other: &Value| {
        let other = same_type::<T>(other)?;
        let result = {
            let this = obj.borrow::<T>()?;
            let that = other.borrow::<T>()?;
            f(&*this, &*that).into_hook_result()?
        };
        Ok(result.into_value()?)
    })
}

/// `other op self` where `other` is any host value
pub fn reflected<T, F, R>(f: F) -> BinarySlot
where
    T: 'static,
    F: Fn(&T, &Value) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Arc::new(move |obj: &ObjRef, other: &Value| {
        let result = {
            let this = obj.borrow::<T>()?;
            f(&*this, other).into_hook_result()?
        };
        Ok(result.into_value()?)
    })
}

/// `a op= b`: mutates the left operand in place
pub fn inplace<T, F, R>(f: F) -> InplaceSlot
where
    T: 'static,
    F: Fn(&mut T, &T) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = ()>,
{
    Arc::new(move |obj: &ObjRef, other: &Value| {
        let other = same_type::<T>(other)?;
        if other.is(obj) {
            // `a op= a` cannot borrow the payload twice; the host falls back to `a op a`.
            return Err(HookFailure::NotImplemented);
        }
        let mut this = obj.borrow_mut::<T>()?;
        let that = other.borrow::<T>()?;
        f(&mut *this, &*that).into_hook_result()
    })
}

pub fn compare<T, F, R>(f: F) -> CompareSlot
where
    T: 'static,
    F: Fn(&T, &T) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = bool>,
{
    Arc::new(move |obj: &ObjRef, other: &Value| {
        let other = same_type::<T>(other)?;
        let this = obj.borrow::<T>()?;
        let that = other.borrow::<T>()?;
        f(&*this, &*that).into_hook_result()
    })
}

/// Raw `__getitem__`: the key is passed through unchanged
pub fn getitem<T, F, R>(f: F) -> ItemSlot
where
    T: 'static,
    F: Fn(&T, &Value) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Arc::new(move |obj: &ObjRef, key: &Value| {
        let result = {
            let this = obj.borrow::<T>()?;
            f(&*this, key).into_hook_result()?
        };
        Ok(result.into_value()?)
    })
}

/// Sequence `__getitem__`: receives an index already wrapped and bounds-checked
pub fn seq_getitem<T, F, R>(f: F) -> IndexSlot
where
    T: 'static,
    F: Fn(&T, usize) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Arc::new(move |obj: &ObjRef, index: usize| {
        let result = {
            let this = obj.borrow::<T>()?;
            f(&*this, index).into_hook_result()?
        };
        Ok(result.into_value()?)
    })
}

pub fn setitem<T, F, R>(f: F) -> SetItemSlot
where
    T: 'static,
    F: Fn(&mut T, &Value, Value) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = ()>,
{
    Arc::new(move |obj: &ObjRef, key: &Value, value: Value| {
        let mut this = obj.borrow_mut::<T>()?;
        f(&mut *this, key, value).into_hook_result()
    })
}

pub fn seq_setitem<T, F, R>(f: F) -> SetIndexSlot
where
    T: 'static,
    F: Fn(&mut T, usize, Value) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = ()>,
{
    Arc::new(move |obj: &ObjRef, index: usize, value: Value| {
        let mut this = obj.borrow_mut::<T>()?;
        f(&mut *this, index, value).into_hook_result()
    })
}

pub fn delitem<T, F, R>(f: F) -> DelItemSlot
where
    T: 'static,
    F: Fn(&mut T, &Value) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = ()>,
{
    Arc::new(move |obj: &ObjRef, key: &Value| {
        let mut this = obj.borrow_mut::<T>()?;
        f(&mut *this, key).into_hook_result()
    })
}

pub fn seq_delitem<T, F, R>(f: F) -> DelIndexSlot
where
    T: 'static,
    F: Fn(&mut T, usize) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = ()>,
{
    Arc::new(move |obj: &ObjRef, index: usize| {
        let mut this = obj.borrow_mut::<T>()?;
        f(&mut *this, index).into_hook_result()
    })
}

pub fn contains<T, F, R>(f: F) -> ContainsSlot
where
    T: 'static,
    F: Fn(&T, &Value) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = bool>,
{
    Arc::new(move |obj: &ObjRef, item: &Value| {
        let this = obj.borrow::<T>()?;
        f(&*this, item).into_hook_result()
    })
}

/// `__next__` with `None` meaning exhausted
pub fn next<T, F, V>(f: F) -> NextSlot
where
    T: 'static,
    F: Fn(&mut T) -> Option<V> + Send + Sync + 'static,
    V: IntoValue,
{
    Arc::new(move |obj: &ObjRef| {
        let item = {
            let mut this = obj.borrow_mut::<T>()?;
            f(&mut *this)
        };
        Ok(item.map(IntoValue::into_value).transpose()?)
    })
}

/// Fallible `__next__`
pub fn try_next<T, F, R, V>(f: F) -> NextSlot
where
    T: 'static,
    F: Fn(&mut T) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = Option<V>>,
    V: IntoValue,
{
    Arc::new(move |obj: &ObjRef| {
        let item = {
            let mut this = obj.borrow_mut::<T>()?;
            f(&mut *this).into_hook_result()?
        };
        Ok(item.map(IntoValue::into_value).transpose()?)
    })
}

pub fn call<T, F, R>(f: F) -> CallSlot
where
    T: 'static,
    F: Fn(&T, &[Value]) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Arc::new(move |obj: &ObjRef, args: &[Value]| {
        let result = {
            let this = obj.borrow::<T>()?;
            f(&*this, args).into_hook_result()?
        };
        Ok(result.into_value()?)
    })
}

pub fn getattr<T, F, R>(f: F) -> GetAttrSlot
where
    T: 'static,
    F: Fn(&T, &str) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Arc::new(move |obj: &ObjRef, name: &str| {
        let result = {
            let this = obj.borrow::<T>()?;
            f(&*this, name).into_hook_result()?
        };
        Ok(result.into_value()?)
    })
}

/// `__get__(self, instance, owner)`; `instance` is `None` for class access
pub fn descr_get<T, F, R>(f: F) -> DescrGetSlot
where
    T: 'static,
    F: Fn(&T, Option<&Value>, &'static HostType) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    Arc::new(move |obj: &ObjRef, instance: Option<&Value>, owner: &'static HostType| {
        let result = {
            let this = obj.borrow::<T>()?;
            f(&*this, instance, owner).into_hook_result()?
        };
        Ok(result.into_value()?)
    })
}

/// `__set__(self, instance, value)`
pub fn descr_set<T, F, R>(f: F) -> DescrSetSlot
where
    T: 'static,
    F: Fn(&T, &Value, Value) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = ()>,
{
    Arc::new(move |obj: &ObjRef, instance: &Value, value: Value| {
        let this = obj.borrow::<T>()?;
        f(&*this, instance, value).into_hook_result()
    })
}

pub fn buffer<T, F, R>(f: F) -> BufferSlot
where
    T: 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = BufferSpec>,
{
    Arc::new(move |obj: &ObjRef| {
        let this = obj.borrow::<T>()?;
        f(&*this).into_hook_result()
    })
}

/// Cleanup hook; runs once with every field still valid
///
/// Fails without running `f` when the payload is borrowed or exported.
pub fn cleanup<T, F>(f: F) -> CleanupSlot
where
    T: 'static,
    F: Fn(&mut T) + Send + Sync + 'static,
{
    Arc::new(move |obj: &ObjRef| {
        let mut this = obj.borrow_mut::<T>()?;
        f(&mut *this);
        Ok(())
    })
}

/// Report references held outside declared fields
pub fn traverse<T, F>(f: F) -> TraverseSlot
where
    T: 'static,
    F: Fn(&T, &mut Visitor<'_>) -> i32 + Send + Sync + 'static,
{
    Arc::new(move |obj: &ObjRef, visitor: &mut Visitor<'_>| match obj.borrow::<T>() {
        Ok(this) => f(&*this, visitor),
        Err(_) => 0,
    })
}

/// Drop references held outside declared fields
pub fn clear<T, F>(f: F) -> ClearSlot
where
    T: 'static,
    F: Fn(&mut T) + Send + Sync + 'static,
{
    Arc::new(move |obj: &ObjRef| {
        if let Ok(mut this) = obj.borrow_mut::<T>() {
            f(&mut *this);
        }
    })
}

pub fn property_get<T, F, R>(f: F) -> PropertyGet
where
    T: 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
    R: IntoHookResult,
    R::Output: IntoValue,
{
    unary::<T, F, R>(f)
}

pub fn property_set<T, F, R>(f: F) -> PropertySet
where
    T: 'static,
    F: Fn(&mut T, Value) -> R + Send + Sync + 'static,
    R: IntoHookResult<Output = ()>,
{
    Arc::new(move |obj: &ObjRef, value: Value| {
        let mut this = obj.borrow_mut::<T>()?;
        f(&mut *this, value).into_hook_result()
    })
}
