//! Inheritance Composer
//!
//! A native class either extends `object` (the default), a host builtin
//! container (`list`, `dict`), or another registered native class. In the
//! last case the child's first field embeds the parent's whole payload, so a
//! pointer to the child payload is also a valid pointer to the parent
//! payload, and parent field offsets, methods and hooks apply unchanged.

use crate::descriptor::{FeatureFlags, FieldDescriptor, TypeDescriptor};
use crate::error::BuildError;
use crate::host::builtins;
use crate::host::{registry, HostType};
use crate::protocol::SlotTable;
use core::ops::{Deref, DerefMut};
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// Host builtin containers a native class can extend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinBase {
    List,
    Dict,
}

impl BuiltinBase {
    pub const fn name(self) -> &'static str {
        match self {
            BuiltinBase::List => "list",
            BuiltinBase::Dict => "dict",
        }
    }

    pub fn host_type(self) -> &'static HostType {
        match self {
            BuiltinBase::List => builtins::list_type(),
            BuiltinBase::Dict => builtins::dict_type(),
        }
    }
}

/// Base of a class as declared by its builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BaseSpec {
    Object,
    Builtin(BuiltinBase),
    Native {
        type_id: TypeId,
        name: &'static str,
        offset: usize,
    },
}

/// Base of a class as recorded in its `TypeDescriptor`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    Object,
    Builtin(BuiltinBase),
    Native(&'static str),
}

impl From<BaseSpec> for BaseKind {
    fn from(spec: BaseSpec) -> Self {
        match spec {
            BaseSpec::Object => BaseKind::Object,
            BaseSpec::Builtin(builtin) => BaseKind::Builtin(builtin),
            BaseSpec::Native { name, .. } => BaseKind::Native(name),
        }
    }
}

/// The embedded payload of a parent native class
///
/// Must be the first field of the child. Declare the child `#[repr(C)]` so
/// the compiler keeps it there; [`base_payload!`] checks the offset at
/// compile time.
#[repr(transparent)]
#[derive(Default)]
pub struct BasePayload<P> {
    inner: P,
}

impl<P> BasePayload<P> {
    pub const fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P> Deref for BasePayload<P> {
    type Target = P;

    #[inline]
    fn deref(&self) -> &P {
        &self.inner
    }
}

impl<P> DerefMut for BasePayload<P> {
    #[inline]
    fn deref_mut(&mut self) -> &mut P {
        &mut self.inner
    }
}

impl<P: fmt::Debug> fmt::Debug for BasePayload<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BasePayload").field(&self.inner).finish()
    }
}

/// Locate the base payload field for `ClassBuilder::extends`
///
/// Fails to compile unless the field sits at offset zero.
///
/// ```ignore
/// #[repr(C)]
/// struct Child { base: BasePayload<Parent>, extra: i64 }
/// class.extends(base_payload!(Child, base));
/// ```
#[macro_export]
macro_rules! base_payload {
    ($ty:ty, $field:ident) => {{
        const _: () = assert!(
            ::core::mem::offset_of!($ty, $field) == 0,
            "the base payload must be the first field"
        );
        $crate::field!($ty, $field)
    }};
}

/// Resolve the declared base to its registered type object
pub(crate) fn resolve_base(
    child: &'static str,
    flags: FeatureFlags,
    spec: BaseSpec,
) -> Result<&'static HostType, BuildError> {
    match spec {
        BaseSpec::Object => Ok(builtins::object_type()),
        BaseSpec::Builtin(builtin) => Ok(builtin.host_type()),
        BaseSpec::Native { type_id, name, offset, .. } => {
            if offset != 0 {
                return Err(BuildError::BasePayloadNotFirst { ty: child, offset });
            }
            let parent = registry::lookup(type_id)
                .ok_or(BuildError::ParentNotRegistered { child, parent: name })?;
            if parent.flags().is_frozen() && !flags.is_frozen() {
                return Err(BuildError::FrozenParent { child, parent: parent.name() });
            }
            Ok(parent)
        }
    }
}

/// Constructor arguments: the base's flattened public fields, then our own
pub(crate) fn flatten_ctor_fields(
    base: &HostType,
    own: &[Arc<FieldDescriptor>],
) -> Vec<Arc<FieldDescriptor>> {
    base.ctor_fields()
        .iter()
        .cloned()
        .chain(own.iter().filter(|field| field.is_public() && !field.is_base()).cloned())
        .collect()
}

/// Fields the collector must see, inherited ones first
pub(crate) fn compose_gc_fields(
    base: &HostType,
    own: &[Arc<FieldDescriptor>],
) -> Vec<Arc<FieldDescriptor>> {
    base.gc_fields()
        .iter()
        .cloned()
        .chain(own.iter().filter(|field| field.ty.holds_references()).cloned())
        .collect()
}

pub(crate) fn compose_strong_refs(
    base: &HostType,
    own: &[Arc<FieldDescriptor>],
) -> Vec<Arc<FieldDescriptor>> {
    base.strong_ref_fields()
        .iter()
        .cloned()
        .chain(own.iter().filter(|field| field.is_strong_ref()).cloned())
        .collect()
}

/// Fill undeclared slots from the base
pub(crate) fn compose_slots(mut own: SlotTable, base: &HostType) -> SlotTable {
    own.inherit(base.slots());
    own
}

/// The parent's descriptor, for generated-parent inheritance
pub(crate) fn parent_descriptor(base: &HostType) -> Option<Arc<TypeDescriptor>> {
    base.descriptor().cloned()
}
