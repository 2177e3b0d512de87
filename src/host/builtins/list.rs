//! `list` - a growable sequence of values
//!
//! No borrow of the storage is ever held across a call that can run user
//! code (`__eq__`, `__repr__`, a finalizer); items are cloned out first and
//! replaced values are released after the borrow ends.

use super::{arity, builtin_method, leak_container, list_type, BuiltinSpec, ListIterator, ReprGuard};
use crate::gc::Visitor;
use crate::host::err::{HookFailure, HookResult, HostError, HostResult};
use crate::host::types::{Constructor, HostType, StorageVTable};
use crate::host::{gil, ops, ObjRef, Value};
use crate::layout::RecordLayout;
use crate::lifecycle;
use crate::protocol::{BinaryOp, CompareOp, DelItem, GetItem, HashPolicy, IterSlot, SetItem, SlotTable};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type ListStorage = RefCell<Vec<Value>>;

unsafe fn init_storage(ptr: *mut u8) {
    ptr.cast::<ListStorage>().write(RefCell::new(Vec::new()));
}

unsafe fn drop_storage(ptr: *mut u8) {
    core::ptr::drop_in_place(ptr.cast::<ListStorage>());
}

unsafe fn traverse_storage(ptr: *const u8, visitor: &mut Visitor<'_>) -> i32 {
    match (*ptr.cast::<ListStorage>()).try_borrow() {
        Ok(items) => visitor.visit_all(items.iter()),
        Err(_) => 0,
    }
}

unsafe fn clear_storage(ptr: *const u8, released: &mut Vec<ObjRef>) {
    if let Ok(mut items) = (*ptr.cast::<ListStorage>()).try_borrow_mut() {
        released.extend(items.drain(..).filter_map(Value::into_obj));
    }
}

fn storage_vtable() -> StorageVTable {
    StorageVTable {
        type_id: TypeId::of::<ListStorage>(),
        size: core::mem::size_of::<ListStorage>(),
        align: core::mem::align_of::<ListStorage>(),
        init: init_storage,
        drop: drop_storage,
        traverse: traverse_storage,
        clear: clear_storage,
    }
}

fn storage(obj: &ObjRef) -> HostResult<&ListStorage> {
    obj.storage::<ListStorage>()
        .ok_or_else(|| HostError::type_error(format!("'{}' object is not a list", obj.ty().name())))
}

fn busy() -> HostError {
    HostError::runtime_error("list modified during iteration")
}

/// A new `list` holding `items`
pub fn new(items: Vec<Value>) -> HostResult<ObjRef> {
    let _gil = gil::acquire();
    let obj = lifecycle::construct_empty(list_type())?;
    *storage(&obj)?.try_borrow_mut().map_err(|_| busy())? = items;
    Ok(obj)
}

pub fn len(list: &ObjRef) -> HostResult<usize> {
    Ok(storage(list)?.try_borrow().map_err(|_| busy())?.len())
}

/// Item at an already resolved index
pub fn get(list: &ObjRef, index: usize) -> HostResult<Option<Value>> {
    Ok(storage(list)?.try_borrow().map_err(|_| busy())?.get(index).cloned())
}

/// Snapshot of the items
pub fn to_vec(list: &ObjRef) -> HostResult<Vec<Value>> {
    Ok(storage(list)?.try_borrow().map_err(|_| busy())?.clone())
}

pub fn append(list: &ObjRef, item: Value) -> HostResult<()> {
    let _gil = gil::acquire();
    storage(list)?.try_borrow_mut().map_err(|_| busy())?.push(item);
    Ok(())
}

pub fn extend(list: &ObjRef, items: Vec<Value>) -> HostResult<()> {
    let _gil = gil::acquire();
    storage(list)?.try_borrow_mut().map_err(|_| busy())?.extend(items);
    Ok(())
}

fn set(list: &ObjRef, index: usize, value: Value) -> HostResult<()> {
    let old = {
        let mut items = storage(list)?.try_borrow_mut().map_err(|_| busy())?;
        let slot = items
            .get_mut(index)
            .ok_or_else(|| HostError::index_error("list assignment index out of range"))?;
        std::mem::replace(slot, value)
    };
    drop(old);
    Ok(())
}

fn remove(list: &ObjRef, index: usize) -> HostResult<Value> {
    let mut items = storage(list)?.try_borrow_mut().map_err(|_| busy())?;
    if index >= items.len() {
        return Err(HostError::index_error("list index out of range"));
    }
    Ok(items.remove(index))
}

fn clear(list: &ObjRef) -> HostResult<()> {
    let old = std::mem::take(&mut *storage(list)?.try_borrow_mut().map_err(|_| busy())?);
    drop(old);
    Ok(())
}

fn repr(list: &ObjRef) -> HostResult<String> {
    let Some(_guard) = ReprGuard::enter(list) else {
        return Ok("[...]".to_owned());
    };
    let parts = to_vec(list)?.iter().map(ops::repr).collect::<HostResult<Vec<_>>>()?;
    Ok(format!("[{}]", parts.join(", ")))
}

fn equal(list: &ObjRef, other: &Value) -> HookResult<bool> {
    let Some(other) = other.as_obj().filter(|obj| obj.storage::<ListStorage>().is_some()) else {
        return Err(HookFailure::NotImplemented);
    };
    let (left, right) = (to_vec(list)?, to_vec(other)?);
    if left.len() != right.len() {
        return Ok(false);
    }
    for (a, b) in left.iter().zip(&right) {
        if !ops::eq(a, b)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn slots() -> SlotTable {
    let mut slots = SlotTable {
        repr: Some(Arc::new(|obj: &ObjRef| -> HookResult<String> { Ok(repr(obj)?) })),
        hash: Some(HashPolicy::Unhashable),
        len: Some(Arc::new(|obj: &ObjRef| -> HookResult<usize> { Ok(len(obj)?) })),
        getitem: Some(GetItem::Sequence(Arc::new(|obj: &ObjRef, index: usize| -> HookResult<Value> {
            get(obj, index)?.ok_or_else(|| HostError::index_error("list index out of range").into())
        }))),
        setitem: Some(SetItem::Sequence(Arc::new(
            |obj: &ObjRef, index: usize, value: Value| -> HookResult<()> { Ok(set(obj, index, value)?) },
        ))),
        delitem: Some(DelItem::Sequence(Arc::new(|obj: &ObjRef, index: usize| -> HookResult<()> {
            let removed = remove(obj, index)?;
            drop(removed);
            Ok(())
        }))),
        contains: Some(Arc::new(|obj: &ObjRef, item: &Value| -> HookResult<bool> {
            for candidate in to_vec(obj)? {
                if ops::eq(&candidate, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })),
        iter: Some(IterSlot::Factory(Arc::new(|obj: &ObjRef| -> HookResult<Value> {
            Ok(Value::Obj(ListIterator::over(obj)?))
        }))),
        ..SlotTable::default()
    };
    slots.compare[CompareOp::Eq.index()] = Some(Arc::new(equal));
    slots.binary[BinaryOp::Add.index()] = Some(Arc::new(|obj: &ObjRef, other: &Value| -> HookResult<Value> {
        let Some(other) = other.as_obj().filter(|obj| obj.storage::<ListStorage>().is_some()) else {
            return Err(HookFailure::NotImplemented);
        };
        let mut items = to_vec(obj)?;
        items.extend(to_vec(other)?);
        Ok(Value::Obj(new(items)?))
    }));
    slots.inplace[BinaryOp::Add.index()] = Some(Arc::new(|obj: &ObjRef, other: &Value| -> HookResult<()> {
        let items = ops::collect(other)?;
        Ok(extend(obj, items)?)
    }));
    slots
}

fn attrs() -> HashMap<String, crate::host::ClassAttr> {
    [
        builtin_method("append", |obj, args| {
            arity("append", args, 1, 1)?;
            append(obj, args[0].clone())?;
            Ok(Value::None)
        }),
        builtin_method("extend", |obj, args| {
            arity("extend", args, 1, 1)?;
            let items = ops::collect(&args[0])?;
            extend(obj, items)?;
            Ok(Value::None)
        }),
        builtin_method("pop", |obj, args| {
            arity("pop", args, 0, 1)?;
            let len = len(obj)?;
            if len == 0 {
                return Err(HostError::index_error("pop from empty list"));
            }
            let index = match args.first() {
                Some(index) => {
                    let index = index
                        .as_int()
                        .ok_or_else(|| HostError::type_error("list indices must be integers"))?;
                    crate::protocol::wrap_index(index, len)?
                }
                None => len - 1,
            };
            remove(obj, index)
        }),
        builtin_method("clear", |obj, args| {
            arity("clear", args, 0, 0)?;
            clear(obj)?;
            Ok(Value::None)
        }),
    ]
    .into_iter()
    .collect()
}

pub(super) fn build_type() -> &'static HostType {
    let constructor: Constructor = Arc::new(|ty: &'static HostType, args: &[Value]| {
        let items = match args {
            [] => Vec::new(),
            [iterable] => ops::collect(iterable)?,
            _ => return Err(HostError::type_error(format!("{}() takes at most 1 argument", ty.name()))),
        };
        let obj = lifecycle::construct_empty(ty)?;
        *storage(&obj)?.try_borrow_mut().map_err(|_| busy())? = items;
        Ok(obj)
    });
    leak_container(BuiltinSpec {
        name: "list",
        doc: "Built-in mutable sequence.",
        layout: RecordLayout::builtin::<ListStorage>(),
        slots: slots(),
        attrs: attrs(),
        storage: storage_vtable(),
        constructor,
    })
}
