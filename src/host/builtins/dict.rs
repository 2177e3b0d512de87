//! `dict` - insertion-ordered hash map keyed by host equality
//!
//! Entries live in a dense vector (tombstoned on removal) indexed by hash.
//! Key comparison may run user `__eq__`, so lookups compare against a
//! snapshot of the candidate keys and fail with `RuntimeError` if the table
//! changed underneath them.

use super::{arity, builtin_method, dict_type, leak_container, BuiltinSpec, ListIterator, ReprGuard};
use crate::gc::Visitor;
use crate::host::err::{HookFailure, HookResult, HostError, HostResult};
use crate::host::types::{Constructor, HostType, StorageVTable};
use crate::host::{gil, ops, ClassAttr, ObjRef, Value};
use crate::layout::RecordLayout;
use crate::lifecycle;
use crate::protocol::{CompareOp, DelItem, GetItem, HashPolicy, IterSlot, SetItem, SlotTable};
use smallvec::SmallVec;
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    hash: i64,
    key: Value,
    value: Value,
}

#[derive(Default)]
pub(crate) struct DictTable {
    entries: Vec<Option<Entry>>,
    index: HashMap<i64, SmallVec<[usize; 1]>>,
    live: usize,
    /// Bumped on every structural change
    version: u64,
}

impl DictTable {
    fn live_entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().flatten()
    }

    fn insert(&mut self, hash: i64, key: Value, value: Value) {
        let slot = self.entries.len();
        self.entries.push(Some(Entry { hash, key, value }));
        self.index.entry(hash).or_default().push(slot);
        self.live += 1;
        self.version += 1;
    }

    fn remove(&mut self, slot: usize) -> Option<Entry> {
        let entry = self.entries.get_mut(slot)?.take()?;
        if let Some(slots) = self.index.get_mut(&entry.hash) {
            slots.retain(|candidate| *candidate != slot);
            if slots.is_empty() {
                self.index.remove(&entry.hash);
            }
        }
        self.live -= 1;
        self.version += 1;
        if self.entries.len() > 8 && self.live * 2 < self.entries.len() {
            self.compact();
        }
        Some(entry)
    }

    fn compact(&mut self) {
        let entries: Vec<Option<Entry>> = self.entries.drain(..).filter(Option::is_some).collect();
        self.index.clear();
        for (slot, entry) in entries.iter().enumerate() {
            if let Some(entry) = entry {
                self.index.entry(entry.hash).or_default().push(slot);
            }
        }
        self.entries = entries;
    }

    fn take_all(&mut self) -> Vec<Entry> {
        self.index.clear();
        self.live = 0;
        self.version += 1;
        self.entries.drain(..).flatten().collect()
    }
}

pub(crate) type DictStorage = RefCell<DictTable>;

unsafe fn init_storage(ptr: *mut u8) {
    ptr.cast::<DictStorage>().write(RefCell::new(DictTable::default()));
}

unsafe fn drop_storage(ptr: *mut u8) {
    core::ptr::drop_in_place(ptr.cast::<DictStorage>());
}

unsafe fn traverse_storage(ptr: *const u8, visitor: &mut Visitor<'_>) -> i32 {
    let Ok(table) = (*ptr.cast::<DictStorage>()).try_borrow() else {
        return 0;
    };
    for entry in table.live_entries() {
        let result = visitor.visit_value(&entry.key);
        if result != 0 {
            return result;
        }
        let result = visitor.visit_value(&entry.value);
        if result != 0 {
            return result;
        }
    }
    0
}

unsafe fn clear_storage(ptr: *const u8, released: &mut Vec<ObjRef>) {
    if let Ok(mut table) = (*ptr.cast::<DictStorage>()).try_borrow_mut() {
        for entry in table.take_all() {
            released.extend(entry.key.into_obj());
            released.extend(entry.value.into_obj());
        }
    }
}

fn storage_vtable() -> StorageVTable {
    StorageVTable {
        type_id: TypeId::of::<DictStorage>(),
        size: core::mem::size_of::<DictStorage>(),
        align: core::mem::align_of::<DictStorage>(),
        init: init_storage,
        drop: drop_storage,
        traverse: traverse_storage,
        clear: clear_storage,
    }
}

fn storage(obj: &ObjRef) -> HostResult<&DictStorage> {
    obj.storage::<DictStorage>()
        .ok_or_else(|| HostError::type_error(format!("'{}' object is not a dict", obj.ty().name())))
}

fn busy() -> HostError {
    HostError::runtime_error("dictionary changed size during iteration")
}

/// Slot of `key`, comparing with host equality
fn find(dict: &ObjRef, key: &Value, hash: i64) -> HostResult<Option<usize>> {
    let cell = storage(dict)?;
    let (version, candidates) = {
        let table = cell.try_borrow().map_err(|_| busy())?;
        let candidates: SmallVec<[(usize, Value); 2]> = table
            .index
            .get(&hash)
            .into_iter()
            .flatten()
            .filter_map(|&slot| table.entries[slot].as_ref().map(|entry| (slot, entry.key.clone())))
            .collect();
        (table.version, candidates)
    };
    for (slot, candidate) in candidates {
        if candidate.is(key) || ops::eq(&candidate, key)? {
            if cell.try_borrow().map_err(|_| busy())?.version != version {
                return Err(HostError::runtime_error("dictionary changed during lookup"));
            }
            return Ok(Some(slot));
        }
    }
    Ok(None)
}

/// A new, empty `dict`
pub fn new() -> HostResult<ObjRef> {
    let _gil = gil::acquire();
    lifecycle::construct_empty(dict_type())
}

pub fn len(dict: &ObjRef) -> HostResult<usize> {
    Ok(storage(dict)?.try_borrow().map_err(|_| busy())?.live)
}

pub fn get(dict: &ObjRef, key: &Value) -> HostResult<Option<Value>> {
    let _gil = gil::acquire();
    let hash = ops::hash(key)?;
    let Some(slot) = find(dict, key, hash)? else {
        return Ok(None);
    };
    let table = storage(dict)?.try_borrow().map_err(|_| busy())?;
    Ok(table.entries[slot].as_ref().map(|entry| entry.value.clone()))
}

pub fn contains(dict: &ObjRef, key: &Value) -> HostResult<bool> {
    let _gil = gil::acquire();
    let hash = ops::hash(key)?;
    Ok(find(dict, key, hash)?.is_some())
}

/// Insert or replace; the replaced value is released after the table is updated
pub fn set_item(dict: &ObjRef, key: Value, value: Value) -> HostResult<()> {
    let _gil = gil::acquire();
    let hash = ops::hash(&key)?;
    let slot = find(dict, &key, hash)?;
    let old = {
        let mut table = storage(dict)?.try_borrow_mut().map_err(|_| busy())?;
        match slot.and_then(|slot| table.entries[slot].as_mut()) {
            Some(entry) => Some(std::mem::replace(&mut entry.value, value)),
            None => {
                table.insert(hash, key, value);
                None
            }
        }
    };
    drop(old);
    Ok(())
}

/// Remove `key`, returning its value, or `None` if absent
pub fn remove(dict: &ObjRef, key: &Value) -> HostResult<Option<Value>> {
    let _gil = gil::acquire();
    let hash = ops::hash(key)?;
    let Some(slot) = find(dict, key, hash)? else {
        return Ok(None);
    };
    let entry = storage(dict)?.try_borrow_mut().map_err(|_| busy())?.remove(slot);
    Ok(entry.map(|entry| entry.value))
}

pub fn keys(dict: &ObjRef) -> HostResult<Vec<Value>> {
    let table = storage(dict)?.try_borrow().map_err(|_| busy())?;
    Ok(table.live_entries().map(|entry| entry.key.clone()).collect())
}

pub fn values(dict: &ObjRef) -> HostResult<Vec<Value>> {
    let table = storage(dict)?.try_borrow().map_err(|_| busy())?;
    Ok(table.live_entries().map(|entry| entry.value.clone()).collect())
}

/// Snapshot of the `(key, value)` pairs in insertion order
pub fn items(dict: &ObjRef) -> HostResult<Vec<(Value, Value)>> {
    let table = storage(dict)?.try_borrow().map_err(|_| busy())?;
    Ok(table
        .live_entries()
        .map(|entry| (entry.key.clone(), entry.value.clone()))
        .collect())
}

fn clear(dict: &ObjRef) -> HostResult<()> {
    let entries = storage(dict)?.try_borrow_mut().map_err(|_| busy())?.take_all();
    drop(entries);
    Ok(())
}

fn key_error(key: &Value) -> HostError {
    HostError::key_error(ops::repr(key).unwrap_or_else(|_| key.type_name().to_owned()))
}

/// `d[key]`, falling back to the type's `__missing__`
fn subscript(dict: &ObjRef, key: &Value) -> HookResult<Value> {
    if let Some(value) = get(dict, key)? {
        return Ok(value);
    }
    match &dict.ty().slots().missing {
        Some(missing) => missing(dict, key),
        None => Err(key_error(key).into()),
    }
}

fn repr(dict: &ObjRef) -> HostResult<String> {
    let Some(_guard) = ReprGuard::enter(dict) else {
        return Ok("{...}".to_owned());
    };
    let mut parts = Vec::new();
    for (key, value) in items(dict)? {
        parts.push(format!("{}: {}", ops::repr(&key)?, ops::repr(&value)?));
    }
    Ok(format!("{{{}}}", parts.join(", ")))
}

fn equal(dict: &ObjRef, other: &Value) -> HookResult<bool> {
    let Some(other) = other.as_obj().filter(|obj| obj.storage::<DictStorage>().is_some()) else {
        return Err(HookFailure::NotImplemented);
    };
    if len(dict)? != len(other)? {
        return Ok(false);
    }
    for (key, value) in items(dict)? {
        match get(other, &key)? {
            Some(theirs) if ops::eq(&value, &theirs)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

fn slots() -> SlotTable {
    let mut slots = SlotTable {
        repr: Some(Arc::new(|obj: &ObjRef| -> HookResult<String> { Ok(repr(obj)?) })),
        hash: Some(HashPolicy::Unhashable),
        len: Some(Arc::new(|obj: &ObjRef| -> HookResult<usize> { Ok(len(obj)?) })),
        getitem: Some(GetItem::Mapping(Arc::new(subscript))),
        setitem: Some(SetItem::Mapping(Arc::new(
            |obj: &ObjRef, key: &Value, value: Value| -> HookResult<()> { Ok(set_item(obj, key.clone(), value)?) },
        ))),
        delitem: Some(DelItem::Mapping(Arc::new(|obj: &ObjRef, key: &Value| -> HookResult<()> {
            match remove(obj, key)? {
                Some(_) => Ok(()),
                None => Err(key_error(key).into()),
            }
        }))),
        contains: Some(Arc::new(|obj: &ObjRef, key: &Value| -> HookResult<bool> { Ok(contains(obj, key)?) })),
        iter: Some(IterSlot::Factory(Arc::new(|obj: &ObjRef| -> HookResult<Value> {
            let snapshot = super::list::new(keys(obj)?)?;
            Ok(Value::Obj(ListIterator::over(&snapshot)?))
        }))),
        ..SlotTable::default()
    };
    slots.compare[CompareOp::Eq.index()] = Some(Arc::new(equal));
    slots
}

fn attrs() -> HashMap<String, ClassAttr> {
    [
        builtin_method("get", |obj, args| {
            arity("get", args, 1, 2)?;
            Ok(get(obj, &args[0])?.unwrap_or_else(|| args.get(1).cloned().unwrap_or_default()))
        }),
        builtin_method("pop", |obj, args| {
            arity("pop", args, 1, 2)?;
            match (remove(obj, &args[0])?, args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(key_error(&args[0])),
            }
        }),
        builtin_method("setdefault", |obj, args| {
            arity("setdefault", args, 1, 2)?;
            if let Some(value) = get(obj, &args[0])? {
                return Ok(value);
            }
            let default = args.get(1).cloned().unwrap_or_default();
            set_item(obj, args[0].clone(), default.clone())?;
            Ok(default)
        }),
        builtin_method("keys", |obj, args| {
            arity("keys", args, 0, 0)?;
            Ok(Value::Obj(super::list::new(keys(obj)?)?))
        }),
        builtin_method("values", |obj, args| {
            arity("values", args, 0, 0)?;
            Ok(Value::Obj(super::list::new(values(obj)?)?))
        }),
        builtin_method("items", |obj, args| {
            arity("items", args, 0, 0)?;
            let pairs = items(obj)?
                .into_iter()
                .map(|(key, value)| super::list::new(vec![key, value]).map(Value::Obj))
                .collect::<HostResult<Vec<_>>>()?;
            Ok(Value::Obj(super::list::new(pairs)?))
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
        if !args.is_empty() {
            return Err(HostError::type_error(format!("{}() takes no positional arguments", ty.name())));
        }
        lifecycle::construct_empty(ty)
    });
    leak_container(BuiltinSpec {
        name: "dict",
        doc: "Built-in mapping ordered by insertion.",
        layout: RecordLayout::builtin::<DictStorage>(),
        slots: slots(),
        attrs: attrs(),
        storage: storage_vtable(),
        constructor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compaction_keeps_insertion_order() {
        let mut table = DictTable::default();
        for i in 0..20 {
            table.insert(i, Value::Int(i), Value::Int(i * 10));
        }
        // The eleventh removal leaves 9 of 20 slots live and compacts.
        for slot in 0..11 {
            assert!(table.remove(slot).is_some());
        }
        assert_eq!(table.live, 9);
        assert_eq!(table.entries.len(), 9);
        let keys: Vec<i64> = table.live_entries().filter_map(|entry| entry.key.as_int()).collect();
        assert_eq!(keys, (11..20).collect::<Vec<_>>());
        for (slot, entry) in table.entries.iter().enumerate() {
            let entry = entry.as_ref().unwrap();
            assert_eq!(table.index[&entry.hash].as_slice(), &[slot]);
        }
    }

    #[test]
    fn take_all_empties_the_index() {
        let mut table = DictTable::default();
        table.insert(1, Value::Int(1), Value::None);
        table.insert(1, Value::Int(2), Value::None);
        assert_eq!(table.index[&1].len(), 2);
        let taken = table.take_all();
        assert_eq!(taken.len(), 2);
        assert!(table.index.is_empty());
        assert_eq!(table.live, 0);
    }
}
