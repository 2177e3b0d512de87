//! Field descriptors and typed field access

use crate::gc::Visitor;
use crate::host::{HostError, HostResult, ObjRef, Value};
use core::marker::PhantomData;
use serde::Serialize;
use std::fmt;

/// Native type tag of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Int,
    Float,
    Bool,
    Str,
    /// Any host value or object reference
    Object,
    StrongRef,
    /// The embedded payload of the parent type
    Base,
}

impl FieldType {
    /// True if values of this type can reference other objects
    pub const fn holds_references(self) -> bool {
        matches!(self, FieldType::Object | FieldType::StrongRef)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    /// Name starts with an underscore: not an attribute, not a constructor argument
    Private,
}

impl Visibility {
    pub fn of(name: &str) -> Self {
        if name.starts_with('_') {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

/// A native type usable as a declared field
pub trait FieldValue: Sized + 'static {
    const TAG: FieldType;

    fn to_value(&self) -> Value;

    fn from_value(value: &Value) -> HostResult<Self>;

    /// Report held references to the collector
    fn visit(&self, _visitor: &mut Visitor<'_>) -> i32 {
        0
    }

    /// Move held references out, leaving the field empty
    fn take_refs(&mut self, _out: &mut Vec<ObjRef>) {}
}

fn expected(what: &str, value: &Value) -> HostError {
    HostError::type_error(format!("expected {what}, got '{}'", value.type_name()))
}

impl FieldValue for i64 {
    const TAG: FieldType = FieldType::Int;

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: &Value) -> HostResult<Self> {
        value.as_int().ok_or_else(|| expected("int", value))
    }
}

impl FieldValue for f64 {
    const TAG: FieldType = FieldType::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> HostResult<Self> {
        value.as_float().ok_or_else(|| expected("float", value))
    }
}

impl FieldValue for bool {
    const TAG: FieldType = FieldType::Bool;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> HostResult<Self> {
        value.as_bool().ok_or_else(|| expected("bool", value))
    }
}

impl FieldValue for String {
    const TAG: FieldType = FieldType::Str;

    fn to_value(&self) -> Value {
        Value::str(self)
    }

    fn from_value(value: &Value) -> HostResult<Self> {
        value.as_str().map(str::to_owned).ok_or_else(|| expected("str", value))
    }
}

impl FieldValue for Value {
    const TAG: FieldType = FieldType::Object;

    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> HostResult<Self> {
        Ok(value.clone())
    }

    fn visit(&self, visitor: &mut Visitor<'_>) -> i32 {
        visitor.visit_value(self)
    }

    fn take_refs(&mut self, out: &mut Vec<ObjRef>) {
        if let Value::Obj(obj) = std::mem::take(self) {
            out.push(obj);
        }
    }
}

impl FieldValue for Option<ObjRef> {
    const TAG: FieldType = FieldType::Object;

    fn to_value(&self) -> Value {
        Value::from(self.clone())
    }

    fn from_value(value: &Value) -> HostResult<Self> {
        match value {
            Value::None => Ok(None),
            Value::Obj(obj) => Ok(Some(obj.clone())),
            other => Err(expected("object or None", other)),
        }
    }

    fn visit(&self, visitor: &mut Visitor<'_>) -> i32 {
        self.as_ref().map_or(0, |obj| visitor.visit(obj))
    }

    fn take_refs(&mut self, out: &mut Vec<ObjRef>) {
        out.extend(self.take());
    }
}

/// Typed location of a field inside `T`; built by [`field!`](crate::field)
pub struct FieldRef<T, F> {
    offset: usize,
    _marker: PhantomData<fn(&T) -> &F>,
}

impl<T, F> FieldRef<T, F> {
    /// # Safety
    /// `offset` must be the offset of a field of type `F` inside `T`.
    #[doc(hidden)]
    pub unsafe fn new_unchecked(offset: usize, _project: fn(&T) -> &F) -> Self {
        Self { offset, _marker: PhantomData }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Locate a field for `ClassBuilder::field` and friends
///
/// ```ignore
/// class.field("x", field!(Point, x));
/// ```
#[macro_export]
macro_rules! field {
    ($ty:ty, $field:ident) => {
        unsafe {
            $crate::descriptor::FieldRef::<$ty, _>::new_unchecked(
                ::core::mem::offset_of!($ty, $field),
                |this: &$ty| &this.$field,
            )
        }
    };
}

/// Erased accessors over a field's bytes, offsets relative to the field
#[derive(Clone, Copy)]
pub(crate) struct FieldAccess {
    pub get: unsafe fn(*const u8) -> Value,
    pub set: Option<unsafe fn(*mut u8, &Value) -> HostResult<Value>>,
    pub visit: unsafe fn(*const u8, &mut Visitor<'_>) -> i32,
    pub take_refs: unsafe fn(*mut u8, &mut Vec<ObjRef>),
}

impl FieldAccess {
    pub fn of<F: FieldValue>() -> Self {
        unsafe fn get<F: FieldValue>(ptr: *const u8) -> Value {
            (*ptr.cast::<F>()).to_value()
        }

        unsafe fn set<F: FieldValue>(ptr: *mut u8, value: &Value) -> HostResult<Value> {
            let new = F::from_value(value)?;
            let old = core::mem::replace(&mut *ptr.cast::<F>(), new);
            Ok(old.to_value())
        }

        unsafe fn visit<F: FieldValue>(ptr: *const u8, visitor: &mut Visitor<'_>) -> i32 {
            (*ptr.cast::<F>()).visit(visitor)
        }

        unsafe fn take_refs<F: FieldValue>(ptr: *mut u8, out: &mut Vec<ObjRef>) {
            (*ptr.cast::<F>()).take_refs(out)
        }

        Self {
            get: get::<F>,
            set: Some(set::<F>),
            visit: visit::<F>,
            take_refs: take_refs::<F>,
        }
    }

    pub fn strong_ref() -> Self {
        use crate::strong_ref::raw;

        Self {
            get: raw::get,
            set: None,
            visit: raw::visit,
            take_refs: raw::take,
        }
    }
}

/// One declared field of a native class
pub struct FieldDescriptor {
    pub name: &'static str,
    pub ty: FieldType,
    pub visibility: Visibility,
    /// Byte offset inside the owning payload
    pub offset: usize,
    pub doc: Option<&'static str>,
    pub(crate) access: Option<FieldAccess>,
}

impl FieldDescriptor {
    pub(crate) fn new<F: FieldValue>(name: &'static str, offset: usize) -> Self {
        Self {
            name,
            ty: F::TAG,
            visibility: Visibility::of(name),
            offset,
            doc: None,
            access: Some(FieldAccess::of::<F>()),
        }
    }

    pub(crate) fn strong_ref(name: &'static str, offset: usize) -> Self {
        Self {
            name,
            ty: FieldType::StrongRef,
            visibility: Visibility::Private,
            offset,
            doc: None,
            access: Some(FieldAccess::strong_ref()),
        }
    }

    pub(crate) fn base(name: &'static str) -> Self {
        Self {
            name,
            ty: FieldType::Base,
            visibility: Visibility::Private,
            offset: 0,
            doc: None,
            access: None,
        }
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    #[inline]
    pub fn is_strong_ref(&self) -> bool {
        self.ty == FieldType::StrongRef
    }

    #[inline]
    pub fn is_base(&self) -> bool {
        self.ty == FieldType::Base
    }

    /// Read the field from a payload
    ///
    /// # Safety
    /// `payload` must point to a live payload of the type that declared it.
    pub(crate) unsafe fn read(&self, payload: *const u8) -> Value {
        match self.access {
            Some(access) => (access.get)(payload.add(self.offset)),
            None => Value::None,
        }
    }

    /// Convert and store a value, returning the previous one
    ///
    /// # Safety
    /// As for [`FieldDescriptor::read`], with exclusive access.
    pub(crate) unsafe fn write(&self, payload: *mut u8, value: &Value) -> HostResult<Value> {
        match self.access.and_then(|access| access.set) {
            Some(set) => set(payload.add(self.offset), value),
            None => Err(HostError::attribute_error(format!("field '{}' is not writable", self.name))),
        }
    }

    /// # Safety
    /// As for [`FieldDescriptor::read`].
    pub(crate) unsafe fn visit(&self, payload: *const u8, visitor: &mut Visitor<'_>) -> i32 {
        match self.access {
            Some(access) => (access.visit)(payload.add(self.offset), visitor),
            None => 0,
        }
    }

    /// # Safety
    /// As for [`FieldDescriptor::write`].
    pub(crate) unsafe fn take_refs(&self, payload: *mut u8, out: &mut Vec<ObjRef>) {
        if let Some(access) = self.access {
            (access.take_refs)(payload.add(self.offset), out);
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("visibility", &self.visibility)
            .field("offset", &self.offset)
            .finish()
    }
}
