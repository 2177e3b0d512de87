//! Slot tables - what the host consults on every object operation
//!
//! Every entry is erased over `ObjRef`, so builtin types and native classes
//! share one table shape and subclasses inherit entries by cloning them.

use super::buffer::BufferSpec;
use super::number::{BinaryOp, CompareOp, UnaryOp};
use crate::gc::Visitor;
use crate::host::{HookResult, HostType, ObjRef, Value};
use std::fmt;
use std::sync::Arc;

pub type ReprSlot = Arc<dyn Fn(&ObjRef) -> HookResult<String> + Send + Sync>;
pub type HashSlot = Arc<dyn Fn(&ObjRef) -> HookResult<i64> + Send + Sync>;
pub type BoolSlot = Arc<dyn Fn(&ObjRef) -> HookResult<bool> + Send + Sync>;
pub type LenSlot = Arc<dyn Fn(&ObjRef) -> HookResult<usize> + Send + Sync>;
pub type UnarySlot = Arc<dyn Fn(&ObjRef) -> HookResult<Value> + Send + Sync>;
pub type BinarySlot = Arc<dyn Fn(&ObjRef, &Value) -> HookResult<Value> + Send + Sync>;
pub type InplaceSlot = Arc<dyn Fn(&ObjRef, &Value) -> HookResult<()> + Send + Sync>;
pub type CompareSlot = Arc<dyn Fn(&ObjRef, &Value) -> HookResult<bool> + Send + Sync>;
pub type ItemSlot = Arc<dyn Fn(&ObjRef, &Value) -> HookResult<Value> + Send + Sync>;
pub type IndexSlot = Arc<dyn Fn(&ObjRef, usize) -> HookResult<Value> + Send + Sync>;
pub type SetItemSlot = Arc<dyn Fn(&ObjRef, &Value, Value) -> HookResult<()> + Send + Sync>;
pub type SetIndexSlot = Arc<dyn Fn(&ObjRef, usize, Value) -> HookResult<()> + Send + Sync>;
pub type DelItemSlot = Arc<dyn Fn(&ObjRef, &Value) -> HookResult<()> + Send + Sync>;
pub type DelIndexSlot = Arc<dyn Fn(&ObjRef, usize) -> HookResult<()> + Send + Sync>;
pub type ContainsSlot = Arc<dyn Fn(&ObjRef, &Value) -> HookResult<bool> + Send + Sync>;
pub type NextSlot = Arc<dyn Fn(&ObjRef) -> HookResult<Option<Value>> + Send + Sync>;
pub type CallSlot = Arc<dyn Fn(&ObjRef, &[Value]) -> HookResult<Value> + Send + Sync>;
pub type DescrGetSlot =
    Arc<dyn Fn(&ObjRef, Option<&Value>, &'static HostType) -> HookResult<Value> + Send + Sync>;
pub type DescrSetSlot = Arc<dyn Fn(&ObjRef, &Value, Value) -> HookResult<()> + Send + Sync>;
pub type GetAttrSlot = Arc<dyn Fn(&ObjRef, &str) -> HookResult<Value> + Send + Sync>;
pub type BufferSlot = Arc<dyn Fn(&ObjRef) -> HookResult<BufferSpec> + Send + Sync>;
pub type CleanupSlot = Arc<dyn Fn(&ObjRef) -> HookResult<()> + Send + Sync>;
pub type TraverseSlot = Arc<dyn Fn(&ObjRef, &mut Visitor<'_>) -> i32 + Send + Sync>;
pub type ClearSlot = Arc<dyn Fn(&ObjRef) + Send + Sync>;

/// `__getitem__`: raw keys, or sequence indices wrapped by the host
#[derive(Clone)]
pub enum GetItem {
    Mapping(ItemSlot),
    Sequence(IndexSlot),
}

#[derive(Clone)]
pub enum SetItem {
    Mapping(SetItemSlot),
    Sequence(SetIndexSlot),
}

#[derive(Clone)]
pub enum DelItem {
    Mapping(DelItemSlot),
    Sequence(DelIndexSlot),
}

#[derive(Clone)]
pub enum IterSlot {
    /// `__iter__` returns the object itself
    SelfIter,
    /// `__iter__` builds a new iterator object
    Factory(UnarySlot),
}

#[derive(Clone)]
pub enum HashPolicy {
    /// Hash by address
    Identity,
    /// `__hash__ = None`: hashing raises TypeError
    Unhashable,
    Custom(HashSlot),
}

#[derive(Clone, Default)]
pub struct SlotTable {
    pub repr: Option<ReprSlot>,
    pub str: Option<ReprSlot>,
    /// `None` until declared or inherited; the root type hashes by identity
    pub hash: Option<HashPolicy>,
    pub compare: [Option<CompareSlot>; CompareOp::COUNT],
    pub binary: [Option<BinarySlot>; BinaryOp::COUNT],
    pub reflected: [Option<BinarySlot>; BinaryOp::COUNT],
    pub inplace: [Option<InplaceSlot>; BinaryOp::COUNT],
    pub unary: [Option<UnarySlot>; UnaryOp::COUNT],
    pub bool: Option<BoolSlot>,
    pub len: Option<LenSlot>,
    pub getitem: Option<GetItem>,
    pub setitem: Option<SetItem>,
    pub delitem: Option<DelItem>,
    pub contains: Option<ContainsSlot>,
    pub iter: Option<IterSlot>,
    pub next: Option<NextSlot>,
    pub call: Option<CallSlot>,
    pub getattr: Option<GetAttrSlot>,
    pub descr_get: Option<DescrGetSlot>,
    pub descr_set: Option<DescrSetSlot>,
    pub missing: Option<ItemSlot>,
    pub buffer: Option<BufferSlot>,
    pub cleanup: Option<CleanupSlot>,
    pub traverse: Option<TraverseSlot>,
    pub clear: Option<ClearSlot>,
}

impl SlotTable {
    pub fn compare_slot(&self, op: CompareOp) -> Option<&CompareSlot> {
        self.compare[op.index()].as_ref()
    }

    pub fn binary_slot(&self, op: BinaryOp) -> Option<&BinarySlot> {
        self.binary[op.index()].as_ref()
    }

    pub fn reflected_slot(&self, op: BinaryOp) -> Option<&BinarySlot> {
        self.reflected[op.index()].as_ref()
    }

    pub fn inplace_slot(&self, op: BinaryOp) -> Option<&InplaceSlot> {
        self.inplace[op.index()].as_ref()
    }

    pub fn unary_slot(&self, op: UnaryOp) -> Option<&UnarySlot> {
        self.unary[op.index()].as_ref()
    }

    /// Effective hash policy
    pub fn hash_policy(&self) -> &HashPolicy {
        self.hash.as_ref().unwrap_or(&HashPolicy::Identity)
    }

    pub fn is_hashable(&self) -> bool {
        !matches!(self.hash_policy(), HashPolicy::Unhashable)
    }

    /// Fill every undeclared entry from the base type's table
    ///
    /// Declaring `__eq__` without `__hash__` makes the type unhashable even
    /// when the base is hashable.
    pub fn inherit(&mut self, base: &SlotTable) {
        if self.hash.is_none() {
            self.hash = if self.compare_slot(CompareOp::Eq).is_some() {
                Some(HashPolicy::Unhashable)
            } else {
                base.hash.clone()
            };
        }

        fn fill<S: Clone>(own: &mut Option<S>, base: &Option<S>) {
            if own.is_none() {
                own.clone_from(base);
            }
        }

        fill(&mut self.repr, &base.repr);
        fill(&mut self.str, &base.str);
        for (own, base) in self.compare.iter_mut().zip(&base.compare) {
            fill(own, base);
        }
        for (own, base) in self.binary.iter_mut().zip(&base.binary) {
            fill(own, base);
        }
        for (own, base) in self.reflected.iter_mut().zip(&base.reflected) {
            fill(own, base);
        }
        for (own, base) in self.inplace.iter_mut().zip(&base.inplace) {
            fill(own, base);
        }
        for (own, base) in self.unary.iter_mut().zip(&base.unary) {
            fill(own, base);
        }
        fill(&mut self.bool, &base.bool);
        fill(&mut self.len, &base.len);
        fill(&mut self.getitem, &base.getitem);
        fill(&mut self.setitem, &base.setitem);
        fill(&mut self.delitem, &base.delitem);
        fill(&mut self.contains, &base.contains);
        fill(&mut self.iter, &base.iter);
        fill(&mut self.next, &base.next);
        fill(&mut self.call, &base.call);
        fill(&mut self.getattr, &base.getattr);
        fill(&mut self.descr_get, &base.descr_get);
        fill(&mut self.descr_set, &base.descr_set);
        fill(&mut self.missing, &base.missing);
        fill(&mut self.buffer, &base.buffer);
        fill(&mut self.cleanup, &base.cleanup);
        fill(&mut self.traverse, &base.traverse);
        fill(&mut self.clear, &base.clear);
    }

    /// Names of the protocol hooks present in the table
    pub fn declared(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut push = |present: bool, name: &'static str| {
            if present {
                names.push(name);
            }
        };

        push(self.repr.is_some(), "__repr__");
        push(self.str.is_some(), "__str__");
        push(matches!(self.hash, Some(HashPolicy::Custom(_))), "__hash__");
        for op in CompareOp::ALL {
            push(self.compare_slot(op).is_some(), op.dunder());
        }
        for op in BinaryOp::ALL {
            push(self.binary_slot(op).is_some(), op.dunder());
            push(self.reflected_slot(op).is_some(), op.reflected_dunder());
            push(self.inplace_slot(op).is_some(), op.inplace_dunder());
        }
        for op in UnaryOp::ALL {
            push(self.unary_slot(op).is_some(), op.dunder());
        }
        push(self.bool.is_some(), "__bool__");
        push(self.len.is_some(), "__len__");
        push(self.getitem.is_some(), "__getitem__");
        push(self.setitem.is_some(), "__setitem__");
        push(self.delitem.is_some(), "__delitem__");
        push(self.contains.is_some(), "__contains__");
        push(self.iter.is_some(), "__iter__");
        push(self.next.is_some(), "__next__");
        push(self.call.is_some(), "__call__");
        push(self.getattr.is_some(), "__getattr__");
        push(self.descr_get.is_some(), "__get__");
        push(self.descr_set.is_some(), "__set__");
        push(self.missing.is_some(), "__missing__");
        push(self.buffer.is_some(), "__buffer__");
        push(self.cleanup.is_some(), "__del__");
        push(self.traverse.is_some(), "__traverse__");
        push(self.clear.is_some(), "__clear__");
        names
    }
}

impl fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.declared()).finish()
    }
}
