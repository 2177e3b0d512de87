//! TypeDescriptor Builder
//!
//! A native class describes itself through a [`ClassBuilder`]: fields,
//! constructor, methods, properties and protocol hooks. The builder
//! classifies every member (public/private field, instance/class/static
//! method, hook, property) and produces one frozen [`TypeDescriptor`] per
//! class, which registration and stub/documentation tooling consume.

mod builder;
mod field;
mod flags;
mod metadata;
mod method;

#[cfg(test)]
mod tests;

pub use builder::ClassBuilder;
pub use field::{FieldDescriptor, FieldRef, FieldType, FieldValue, Visibility};
pub use flags::FeatureFlags;
pub use metadata::{ClassMetadata, FieldMetadata, MethodMetadata, PropertyMetadata};
pub use method::{
    ClassSelf, ClassToken, ExclusiveSelf, IntoHookResult, IntoMethod, MethodDescriptor, MethodFn,
    MethodKind, NoSelf, PropertyDescriptor, PropertyGet, PropertySet, Receiver, ReturnConvention,
    SharedSelf,
};

pub(crate) use builder::{ClassParts, CtorSpec};

use crate::inherit::BaseKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Build-time plan of one native class
///
/// Built once at registration and never mutated afterwards.
#[derive(Debug)]
pub struct TypeDescriptor {
    pub name: &'static str,
    pub doc: Option<&'static str>,
    pub flags: FeatureFlags,
    pub base: BaseKind,
    /// Descriptor of the native parent, registered before this type
    pub parent: Option<Arc<TypeDescriptor>>,
    /// Own fields in declaration order, base payload included
    pub fields: Vec<Arc<FieldDescriptor>>,
    /// Methods, constructor and protocol hooks
    pub methods: Vec<Arc<MethodDescriptor>>,
    pub properties: Vec<Arc<PropertyDescriptor>>,
    pub class_attrs: Vec<&'static str>,
    pub member_docs: HashMap<&'static str, &'static str>,
}

impl TypeDescriptor {
    pub fn public_fields(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields.iter().filter(|field| field.is_public() && !field.is_base())
    }

    pub fn private_fields(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields.iter().filter(|field| !field.is_public() && !field.is_base())
    }

    pub fn strong_refs(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields.iter().filter(|field| field.is_strong_ref())
    }

    pub fn base_field(&self) -> Option<&Arc<FieldDescriptor>> {
        self.fields.iter().find(|field| field.is_base())
    }

    /// Public fields up the parent chain, parent first
    pub fn flattened_fields(&self) -> Vec<Arc<FieldDescriptor>> {
        let mut fields = self
            .parent
            .as_ref()
            .map(|parent| parent.flattened_fields())
            .unwrap_or_default();
        fields.extend(self.public_fields().cloned());
        fields
    }

    /// Argument names of the generated fields constructor
    pub fn constructor_args(&self) -> Vec<&'static str> {
        self.flattened_fields().iter().map(|field| field.name).collect()
    }

    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn methods_of(&self, kind: MethodKind) -> impl Iterator<Item = &Arc<MethodDescriptor>> {
        self.methods.iter().filter(move |method| method.kind == kind)
    }

    /// Declared protocol hooks
    pub fn hooks(&self) -> impl Iterator<Item = &Arc<MethodDescriptor>> {
        self.methods_of(MethodKind::Magic)
    }

    pub fn has_constructor(&self) -> bool {
        self.methods_of(MethodKind::Constructor).next().is_some()
    }

    pub fn doc_of(&self, member: &str) -> Option<&'static str> {
        self.member_docs.get(member).copied()
    }

    /// True if `ancestor` is this descriptor or one of its parents
    pub fn extends(&self, ancestor: &str) -> bool {
        self.name == ancestor || self.parent.as_ref().is_some_and(|parent| parent.extends(ancestor))
    }
}
