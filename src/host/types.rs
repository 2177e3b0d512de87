//! Type objects and the process-wide type registry

use super::err::HostResult;
use super::object::ObjRef;
use super::value::Value;
use crate::allocator::{FreelistPool, FreelistStats};
use crate::descriptor::{FeatureFlags, FieldDescriptor, MethodDescriptor, PropertyDescriptor, TypeDescriptor};
use crate::gc::Visitor;
use crate::layout::RecordLayout;
use crate::protocol::SlotTable;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where a type's behavior comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Implemented by the host itself (`object`, `list`, `dict`)
    Builtin,
    /// Generated from a native class definition
    Native,
}

/// Constructs a live instance of a type from call arguments
pub type Constructor = Arc<dyn Fn(&'static HostType, &[Value]) -> HostResult<ObjRef> + Send + Sync>;

/// Type-erased handling of a native payload
#[derive(Clone, Copy)]
pub struct PayloadVTable {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub size: usize,
    pub align: usize,
    pub drop: unsafe fn(*mut u8),
}

impl PayloadVTable {
    pub fn of<T: 'static>() -> Self {
        unsafe fn drop_payload<T>(ptr: *mut u8) {
            core::ptr::drop_in_place(ptr.cast::<T>());
        }

        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            size: core::mem::size_of::<T>(),
            align: core::mem::align_of::<T>(),
            drop: drop_payload::<T>,
        }
    }
}

/// Type-erased handling of builtin container storage
#[derive(Clone, Copy)]
pub struct StorageVTable {
    pub type_id: TypeId,
    pub size: usize,
    pub align: usize,
    pub init: unsafe fn(*mut u8),
    pub drop: unsafe fn(*mut u8),
    pub traverse: unsafe fn(*const u8, &mut Visitor<'_>) -> i32,
    pub clear: unsafe fn(*const u8, &mut Vec<ObjRef>),
}

/// A class-level attribute
#[derive(Clone)]
pub enum ClassAttr {
    /// Public payload field (data descriptor)
    Field(Arc<FieldDescriptor>),
    Method(Arc<MethodDescriptor>),
    /// Computed attribute (data descriptor)
    Property(Arc<PropertyDescriptor>),
    /// Plain class attribute; objects whose type declares `__get__` bind on lookup
    Const(Value),
}

impl fmt::Debug for ClassAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassAttr::Field(field) => write!(f, "Field({})", field.name),
            ClassAttr::Method(method) => write!(f, "Method({})", method.name),
            ClassAttr::Property(prop) => write!(f, "Property({})", prop.name),
            ClassAttr::Const(value) => write!(f, "Const({value:?})"),
        }
    }
}

/// Everything needed to create a type object
pub(crate) struct TypeSpec {
    pub name: &'static str,
    pub kind: TypeKind,
    pub doc: Option<&'static str>,
    pub base: Option<&'static HostType>,
    pub layout: RecordLayout,
    pub flags: FeatureFlags,
    pub slots: SlotTable,
    pub attrs: HashMap<String, ClassAttr>,
    pub storage: Option<StorageVTable>,
    pub payload: Option<PayloadVTable>,
    pub descriptor: Option<Arc<TypeDescriptor>>,
    pub constructor: Option<Constructor>,
    pub ctor_fields: Vec<Arc<FieldDescriptor>>,
    pub gc_fields: Vec<Arc<FieldDescriptor>>,
    pub strong_ref_fields: Vec<Arc<FieldDescriptor>>,
}

/// A host type object
///
/// Created once at registration and leaked; every record's header points at
/// one of these for the rest of the process.
pub struct HostType {
    name: &'static str,
    kind: TypeKind,
    doc: Option<&'static str>,
    base: Option<&'static HostType>,
    /// Root first, direct base last
    ancestors: SmallVec<[&'static HostType; 4]>,
    layout: RecordLayout,
    flags: FeatureFlags,
    slots: SlotTable,
    attrs: HashMap<String, ClassAttr>,
    storage: Option<StorageVTable>,
    payload: Option<PayloadVTable>,
    freelist: Option<Mutex<FreelistPool>>,
    descriptor: Option<Arc<TypeDescriptor>>,
    constructor: Option<Constructor>,
    ctor_fields: Vec<Arc<FieldDescriptor>>,
    gc_fields: Vec<Arc<FieldDescriptor>>,
    strong_ref_fields: Vec<Arc<FieldDescriptor>>,
    is_gc: bool,
}

impl HostType {
    pub(crate) fn leak(spec: TypeSpec) -> &'static HostType {
        let mut ancestors = SmallVec::new();
        if let Some(base) = spec.base {
            ancestors.extend(base.ancestors.iter().copied());
            ancestors.push(base);
        }

        let freelist = match spec.flags.freelist_capacity() {
            0 => None,
            capacity => Some(Mutex::new(FreelistPool::new(capacity, spec.layout.size))),
        };

        let is_gc = !spec.gc_fields.is_empty()
            || spec.slots.traverse.is_some()
            || spec.storage.is_some()
            || spec.layout.dict_offset.is_some();

        Box::leak(Box::new(HostType {
            name: spec.name,
            kind: spec.kind,
            doc: spec.doc,
            base: spec.base,
            ancestors,
            layout: spec.layout,
            flags: spec.flags,
            slots: spec.slots,
            attrs: spec.attrs,
            storage: spec.storage,
            payload: spec.payload,
            freelist,
            descriptor: spec.descriptor,
            constructor: spec.constructor,
            ctor_fields: spec.ctor_fields,
            gc_fields: spec.gc_fields,
            strong_ref_fields: spec.strong_ref_fields,
            is_gc,
        }))
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn doc(&self) -> Option<&'static str> {
        self.doc
    }

    #[inline]
    pub fn base(&self) -> Option<&'static HostType> {
        self.base
    }

    /// Number of ancestors (`object` has depth 0)
    #[inline]
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }

    /// Method resolution order: this type, then each base up to the root
    pub fn mro(&self) -> impl Iterator<Item = &HostType> + '_ {
        std::iter::once(self).chain(self.ancestors.iter().rev().map(|ty| &**ty))
    }

    /// Constant-time subtype check via the ancestor table
    #[inline]
    pub fn is_subtype(&self, other: &HostType) -> bool {
        std::ptr::eq(self, other)
            || self
                .ancestors
                .get(other.depth())
                .is_some_and(|ancestor| std::ptr::eq(*ancestor, other))
    }

    #[inline]
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    #[inline]
    pub fn flags(&self) -> FeatureFlags {
        self.flags
    }

    #[inline]
    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    #[inline]
    pub fn storage(&self) -> Option<&StorageVTable> {
        self.storage.as_ref()
    }

    #[inline]
    pub fn payload(&self) -> Option<&PayloadVTable> {
        self.payload.as_ref()
    }

    #[inline]
    pub fn native_type_id(&self) -> Option<TypeId> {
        self.payload.as_ref().map(|payload| payload.type_id)
    }

    pub fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        self.descriptor.as_ref()
    }

    /// Attributes declared directly on this type
    pub fn own_attrs(&self) -> &HashMap<String, ClassAttr> {
        &self.attrs
    }

    /// Resolve a class attribute along the MRO
    pub fn lookup(&self, name: &str) -> Option<&ClassAttr> {
        self.mro().find_map(|ty| ty.attrs.get(name))
    }

    pub(crate) fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    /// Flattened constructor arguments: base public fields, then own
    pub fn ctor_fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.ctor_fields
    }

    /// Fields holding object references, including inherited ones
    pub(crate) fn gc_fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.gc_fields
    }

    pub(crate) fn strong_ref_fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.strong_ref_fields
    }

    /// True if instances may hold references into the object graph
    #[inline]
    pub fn is_gc(&self) -> bool {
        self.is_gc
    }

    #[inline]
    pub(crate) fn freelist(&self) -> Option<&Mutex<FreelistPool>> {
        self.freelist.as_ref()
    }

    pub fn freelist_stats(&self) -> Option<FreelistStats> {
        self.freelist.as_ref().map(|pool| pool.lock().stats())
    }

    pub fn freelist_len(&self) -> usize {
        self.freelist.as_ref().map_or(0, |pool| pool.lock().len())
    }

    /// Call the type: construct a new instance
    pub fn instantiate(&'static self, args: &[Value]) -> HostResult<ObjRef> {
        crate::lifecycle::instantiate(self, args)
    }
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base", &self.base.map(HostType::name))
            .field("size", &self.layout.size)
            .finish()
    }
}

/// Process-wide table of registered native types, keyed by Rust type
pub mod registry {
    use super::HostType;
    use dashmap::DashMap;
    use once_cell::sync::Lazy;
    use std::any::TypeId;

    static TYPES: Lazy<DashMap<TypeId, &'static HostType>> = Lazy::new(DashMap::new);

    #[inline]
    pub fn lookup(id: TypeId) -> Option<&'static HostType> {
        TYPES.get(&id).map(|entry| *entry.value())
    }

    pub fn lookup_of<T: 'static>() -> Option<&'static HostType> {
        lookup(TypeId::of::<T>())
    }

    pub fn lookup_name(name: &str) -> Option<&'static HostType> {
        TYPES.iter().map(|entry| *entry.value()).find(|ty| ty.name() == name)
    }

    pub(crate) fn insert(id: TypeId, ty: &'static HostType) {
        TYPES.insert(id, ty);
    }

    /// Snapshot of every registered native type
    pub fn types() -> Vec<&'static HostType> {
        TYPES.iter().map(|entry| *entry.value()).collect()
    }
}
