//! ClassBuilder - how a native class declares its members

use super::field::{FieldDescriptor, FieldRef, FieldValue};
use super::method::{
    IntoHookResult, IntoMethod, MethodDescriptor, MethodKind, PropertyDescriptor, Receiver,
    ReturnConvention,
};
use super::{FeatureFlags, TypeDescriptor};
use crate::error::BuildError;
use crate::gc::Visitor;
use crate::host::value::IntoValue;
use crate::host::{ClassAttr, HookResult, HostType, Value};
use crate::inherit::{BasePayload, BaseSpec, BuiltinBase};
use crate::module::NativeClass;
use crate::protocol::{
    hooks, magic, BinaryOp, BufferSpec, CompareOp, DelItem, GetItem, HashPolicy, IterSlot,
    SetItem, SlotTable, UnaryOp,
};
use crate::strong_ref::StrongRef;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) type CtorFn<T> = Arc<dyn Fn(&[Value]) -> HookResult<T> + Send + Sync>;

/// How instances are built from call arguments
pub(crate) enum CtorSpec<T> {
    /// User constructor over the raw arguments
    Custom(CtorFn<T>),
    /// Default payload, then one argument per flattened public field
    Fields(fn() -> T),
}

/// A `StrongRef<U>` field and the type it points at
#[derive(Debug, Clone, Copy)]
pub(crate) struct StrongRefTarget {
    pub field: &'static str,
    pub type_id: TypeId,
    pub name: &'static str,
}

/// What registration needs from a finished builder
pub(crate) struct ClassParts<T> {
    pub descriptor: TypeDescriptor,
    pub base: BaseSpec,
    pub slots: SlotTable,
    pub attrs: HashMap<String, ClassAttr>,
    pub ctor: Option<CtorSpec<T>>,
    pub strong_ref_targets: Vec<StrongRefTarget>,
}

/// Collects the members of native class `T`
///
/// Mistakes are recorded rather than reported immediately; registration
/// fails with the first one.
pub struct ClassBuilder<T> {
    name: &'static str,
    doc: Option<&'static str>,
    flags: FeatureFlags,
    base: BaseSpec,
    fields: Vec<FieldDescriptor>,
    methods: Vec<Arc<MethodDescriptor>>,
    properties: Vec<Arc<PropertyDescriptor>>,
    class_attrs: Vec<(&'static str, Value)>,
    slots: SlotTable,
    ctor: Option<CtorSpec<T>>,
    strong_refs: Vec<StrongRefTarget>,
    member_docs: HashMap<&'static str, &'static str>,
    names: HashSet<&'static str>,
    errors: Vec<BuildError>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> ClassBuilder<T> {
    pub(crate) fn new(name: &'static str, flags: FeatureFlags) -> Self {
        Self {
            name,
            doc: None,
            flags,
            base: BaseSpec::Object,
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            class_attrs: Vec::new(),
            slots: SlotTable::default(),
            ctor: None,
            strong_refs: Vec::new(),
            member_docs: HashMap::new(),
            names: HashSet::new(),
            errors: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn flags(&self) -> FeatureFlags {
        self.flags
    }

    fn fail(&mut self, err: BuildError) {
        self.errors.push(err);
    }

    fn declare(&mut self, name: &'static str) {
        if !self.names.insert(name) {
            self.fail(BuildError::DuplicateMember { ty: self.name, name: name.to_owned() });
        }
    }

    fn declare_plain(&mut self, name: &'static str) {
        if magic::is_hook_name(name) {
            self.fail(BuildError::ReservedMagicName { ty: self.name, name: name.to_owned() });
        }
        self.declare(name);
    }

    fn forbid_on_frozen(&mut self, member: &'static str) {
        if self.flags.is_frozen() {
            self.fail(BuildError::MutationOnFrozen { ty: self.name, member });
        }
    }

    fn hook(&mut self, name: &'static str, receiver: Receiver, convention: ReturnConvention) {
        self.declare(name);
        self.methods.push(Arc::new(MethodDescriptor::hook(name, receiver, convention)));
    }

    pub fn doc(&mut self, doc: &'static str) -> &mut Self {
        self.doc = Some(doc);
        self
    }

    /// Document a member for stub and help generation
    pub fn member_doc(&mut self, member: &'static str, doc: &'static str) -> &mut Self {
        self.member_docs.insert(member, doc);
        self
    }

    /// Declare a field; a leading underscore makes it private
    pub fn field<F: FieldValue>(&mut self, name: &'static str, field: FieldRef<T, F>) -> &mut Self {
        self.declare_plain(name);
        self.fields.push(FieldDescriptor::new::<F>(name, field.offset()));
        self
    }

    /// Declare an owning reference to an instance of `U`; always private
    pub fn strong_ref<U: NativeClass>(
        &mut self,
        name: &'static str,
        field: FieldRef<T, StrongRef<U>>,
    ) -> &mut Self {
        self.declare_plain(name);
        self.fields.push(FieldDescriptor::strong_ref(name, field.offset()));
        self.strong_refs.push(StrongRefTarget {
            field: name,
            type_id: TypeId::of::<U>(),
            name: U::NAME,
        });
        self
    }

    /// Extend the registered native class `P`, embedded as our first field
    pub fn extends<P: NativeClass>(&mut self, field: FieldRef<T, BasePayload<P>>) -> &mut Self {
        if self.base != BaseSpec::Object {
            self.fail(BuildError::MultipleBases { ty: self.name });
            return self;
        }
        self.base = BaseSpec::Native {
            type_id: TypeId::of::<P>(),
            name: P::NAME,
            offset: field.offset(),
        };
        self.fields.insert(0, FieldDescriptor::base(P::NAME));
        self
    }

    /// Extend a host builtin container
    pub fn extends_builtin(&mut self, builtin: BuiltinBase) -> &mut Self {
        if self.base != BaseSpec::Object {
            self.fail(BuildError::MultipleBases { ty: self.name });
            return self;
        }
        self.base = BaseSpec::Builtin(builtin);
        self
    }

    fn set_ctor(&mut self, ctor: CtorSpec<T>, convention: ReturnConvention) {
        if self.ctor.is_some() {
            self.fail(BuildError::DuplicateMember { ty: self.name, name: "__init__".to_owned() });
            return;
        }
        self.ctor = Some(ctor);
        self.methods.push(Arc::new(MethodDescriptor::constructor(convention)));
    }

    /// Build instances with `f` from the raw call arguments
    pub fn constructor<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = T>,
    {
        let ctor: CtorFn<T> = Arc::new(move |args: &[Value]| f(args).into_hook_result());
        self.set_ctor(CtorSpec::Custom(ctor), R::CONVENTION);
        self
    }

    /// Build instances from one argument per public field, parent fields first
    pub fn fields_constructor(&mut self) -> &mut Self
    where
        T: Default,
    {
        self.set_ctor(CtorSpec::Fields(T::default), ReturnConvention::Fallible);
        self
    }

    /// Declare a method; its first parameter decides instance, class or static
    pub fn def<M, Marker>(&mut self, name: &'static str, method: M) -> &mut Self
    where
        M: IntoMethod<T, Marker>,
    {
        self.declare_plain(name);
        if M::RECEIVER == Receiver::Exclusive {
            self.forbid_on_frozen(name);
        }
        let func = method.into_method_fn();
        self.methods.push(Arc::new(MethodDescriptor::new(name, M::RECEIVER, M::CONVENTION, func)));
        self
    }

    /// Read-only computed attribute
    pub fn property<F, R>(&mut self, name: &'static str, get: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.declare_plain(name);
        self.properties.push(Arc::new(PropertyDescriptor {
            name,
            get: hooks::property_get(get),
            set: None,
        }));
        self
    }

    /// Computed attribute with a setter
    pub fn property_rw<G, R, S, W>(&mut self, name: &'static str, get: G, set: S) -> &mut Self
    where
        G: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
        S: Fn(&mut T, Value) -> W + Send + Sync + 'static,
        W: IntoHookResult<Output = ()>,
    {
        self.declare_plain(name);
        self.forbid_on_frozen(name);
        self.properties.push(Arc::new(PropertyDescriptor {
            name,
            get: hooks::property_get(get),
            set: Some(hooks::property_set(set)),
        }));
        self
    }

    /// Class-level constant
    pub fn class_attr<V: IntoValue>(&mut self, name: &'static str, value: V) -> &mut Self {
        self.declare_plain(name);
        match value.into_value() {
            Ok(value) => self.class_attrs.push((name, value)),
            Err(err) => self.fail(BuildError::ClassAttr {
                ty: self.name,
                name: name.to_owned(),
                detail: err.to_string(),
            }),
        }
        self
    }

    pub fn repr<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = String>,
    {
        self.hook("__repr__", Receiver::Shared, R::CONVENTION);
        self.slots.repr = Some(hooks::repr(f));
        self
    }

    pub fn str<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = String>,
    {
        self.hook("__str__", Receiver::Shared, R::CONVENTION);
        self.slots.str = Some(hooks::repr(f));
        self
    }

    /// Equal instances must hash equal
    pub fn hash<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = i64>,
    {
        self.hook("__hash__", Receiver::Shared, R::CONVENTION);
        self.slots.hash = Some(HashPolicy::Custom(hooks::hash(f)));
        self
    }

    /// Explicit `__hash__ = None`
    pub fn unhashable(&mut self) -> &mut Self {
        self.declare("__hash__");
        self.slots.hash = Some(HashPolicy::Unhashable);
        self
    }

    pub fn bool<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = bool>,
    {
        self.hook("__bool__", Receiver::Shared, R::CONVENTION);
        self.slots.bool = Some(hooks::boolean(f));
        self
    }

    pub fn len<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = usize>,
    {
        self.hook("__len__", Receiver::Shared, R::CONVENTION);
        self.slots.len = Some(hooks::len(f));
        self
    }

    /// `a op b` for two instances of `T`
    pub fn binary<F, R>(&mut self, op: BinaryOp, f: F) -> &mut Self
    where
        F: Fn(&T, &T) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook(op.dunder(), Receiver::Shared, R::CONVENTION);
        self.slots.binary[op.index()] = Some(hooks::binary(f));
        self
    }

    /// `other op self` for an arbitrary host value on the left
    pub fn reflected<F, R>(&mut self, op: BinaryOp, f: F) -> &mut Self
    where
        F: Fn(&T, &Value) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook(op.reflected_dunder(), Receiver::Shared, R::CONVENTION);
        self.slots.reflected[op.index()] = Some(hooks::reflected(f));
        self
    }

    /// `self op= other`, mutating `self`
    pub fn inplace<F, R>(&mut self, op: BinaryOp, f: F) -> &mut Self
    where
        F: Fn(&mut T, &T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = ()>,
    {
        let name = op.inplace_dunder();
        self.hook(name, Receiver::Exclusive, R::CONVENTION);
        self.forbid_on_frozen(name);
        self.slots.inplace[op.index()] = Some(hooks::inplace(f));
        self
    }

    pub fn unary<F, R>(&mut self, op: UnaryOp, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook(op.dunder(), Receiver::Shared, R::CONVENTION);
        self.slots.unary[op.index()] = Some(hooks::unary(f));
        self
    }

    /// Rich comparison; declaring `Eq` without `hash` makes the type unhashable
    pub fn compare<F, R>(&mut self, op: CompareOp, f: F) -> &mut Self
    where
        F: Fn(&T, &T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = bool>,
    {
        self.hook(op.dunder(), Receiver::Shared, R::CONVENTION);
        self.slots.compare[op.index()] = Some(hooks::compare(f));
        self
    }

    /// Mapping-style `__getitem__`: the key is passed through as-is
    pub fn getitem<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, &Value) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook("__getitem__", Receiver::Shared, R::CONVENTION);
        self.slots.getitem = Some(GetItem::Mapping(hooks::getitem(f)));
        self
    }

    /// Sequence-style `__getitem__`: negative indices are wrapped against
    /// `__len__` and out-of-range indices raise before `f` runs
    pub fn seq_getitem<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, usize) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook("__getitem__", Receiver::Shared, R::CONVENTION);
        self.slots.getitem = Some(GetItem::Sequence(hooks::seq_getitem(f)));
        self
    }

    pub fn setitem<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut T, &Value, Value) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = ()>,
    {
        self.hook("__setitem__", Receiver::Exclusive, R::CONVENTION);
        self.slots.setitem = Some(SetItem::Mapping(hooks::setitem(f)));
        self
    }

    pub fn seq_setitem<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut T, usize, Value) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = ()>,
    {
        self.hook("__setitem__", Receiver::Exclusive, R::CONVENTION);
        self.slots.setitem = Some(SetItem::Sequence(hooks::seq_setitem(f)));
        self
    }

    pub fn delitem<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut T, &Value) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = ()>,
    {
        self.hook("__delitem__", Receiver::Exclusive, R::CONVENTION);
        self.slots.delitem = Some(DelItem::Mapping(hooks::delitem(f)));
        self
    }

    pub fn seq_delitem<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut T, usize) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = ()>,
    {
        self.hook("__delitem__", Receiver::Exclusive, R::CONVENTION);
        self.slots.delitem = Some(DelItem::Sequence(hooks::seq_delitem(f)));
        self
    }

    pub fn contains<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, &Value) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = bool>,
    {
        self.hook("__contains__", Receiver::Shared, R::CONVENTION);
        self.slots.contains = Some(hooks::contains(f));
        self
    }

    /// `__iter__` returning a new iterator object
    pub fn iter<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook("__iter__", Receiver::Shared, R::CONVENTION);
        self.slots.iter = Some(IterSlot::Factory(hooks::unary(f)));
        self
    }

    /// `__iter__` returning the object itself
    pub fn iter_self(&mut self) -> &mut Self {
        self.hook("__iter__", Receiver::Shared, ReturnConvention::Always);
        self.slots.iter = Some(IterSlot::SelfIter);
        self
    }

    /// `__next__`; `None` ends the iteration
    pub fn next<F, V>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut T) -> Option<V> + Send + Sync + 'static,
        V: IntoValue,
    {
        self.hook("__next__", Receiver::Exclusive, ReturnConvention::Always);
        self.slots.next = Some(hooks::next(f));
        self
    }

    /// Fallible `__next__`; `Ok(None)` ends the iteration
    pub fn try_next<F, R, V>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = Option<V>>,
        V: IntoValue,
    {
        self.hook("__next__", Receiver::Exclusive, R::CONVENTION);
        self.slots.next = Some(hooks::try_next(f));
        self
    }

    pub fn call<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, &[Value]) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook("__call__", Receiver::Shared, R::CONVENTION);
        self.slots.call = Some(hooks::call(f));
        self
    }

    /// Fallback for attributes normal lookup did not find
    pub fn getattr<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, &str) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook("__getattr__", Receiver::Shared, R::CONVENTION);
        self.slots.getattr = Some(hooks::getattr(f));
        self
    }

    /// Descriptor `__get__`: instances stored as class attributes bind on lookup
    pub fn descr_get<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, Option<&Value>, &'static HostType) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook("__get__", Receiver::Shared, R::CONVENTION);
        self.slots.descr_get = Some(hooks::descr_get(f));
        self
    }

    /// Descriptor `__set__`: makes the descriptor a data descriptor
    pub fn descr_set<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, &Value, Value) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = ()>,
    {
        self.hook("__set__", Receiver::Shared, R::CONVENTION);
        self.slots.descr_set = Some(hooks::descr_set(f));
        self
    }

    /// Default value for a missing key; requires a `dict` base
    pub fn missing<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, &Value) -> R + Send + Sync + 'static,
        R: IntoHookResult,
        R::Output: IntoValue,
    {
        self.hook("__missing__", Receiver::Shared, R::CONVENTION);
        self.slots.missing = Some(hooks::getitem(f));
        self
    }

    /// Export a memory region; the metadata is validated before any consumer sees it
    pub fn buffer<F, R>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T) -> R + Send + Sync + 'static,
        R: IntoHookResult<Output = BufferSpec>,
    {
        self.hook("__buffer__", Receiver::Shared, R::CONVENTION);
        self.slots.buffer = Some(hooks::buffer(f));
        self
    }

    /// Runs once, before any field is released
    pub fn cleanup<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.hook("__del__", Receiver::Exclusive, ReturnConvention::Always);
        self.slots.cleanup = Some(hooks::cleanup(f));
        self
    }

    /// Report references the declared fields do not cover
    pub fn traverse<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&T, &mut Visitor<'_>) -> i32 + Send + Sync + 'static,
    {
        self.hook("__traverse__", Receiver::Shared, ReturnConvention::Always);
        self.slots.traverse = Some(hooks::traverse(f));
        self
    }

    /// Drop references the declared fields do not cover
    pub fn clear<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.hook("__clear__", Receiver::Exclusive, ReturnConvention::Always);
        self.slots.clear = Some(hooks::clear(f));
        self
    }

    pub(crate) fn finish(self) -> Result<ClassParts<T>, BuildError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        self.flags.validate(self.name)?;

        let member_docs = self.member_docs;
        let fields: Vec<Arc<FieldDescriptor>> = self
            .fields
            .into_iter()
            .map(|mut field| {
                field.doc = member_docs.get(field.name).copied();
                Arc::new(field)
            })
            .collect();

        let mut attrs = HashMap::new();
        for field in fields.iter().filter(|field| field.is_public() && !field.is_base()) {
            attrs.insert(field.name.to_owned(), ClassAttr::Field(Arc::clone(field)));
        }
        for method in &self.methods {
            if matches!(method.kind, MethodKind::Instance | MethodKind::Class | MethodKind::Static) {
                attrs.insert(method.name.to_owned(), ClassAttr::Method(Arc::clone(method)));
            }
        }
        for property in &self.properties {
            attrs.insert(property.name.to_owned(), ClassAttr::Property(Arc::clone(property)));
        }
        let class_attrs = self.class_attrs.iter().map(|(name, _)| *name).collect();
        for (name, value) in self.class_attrs {
            attrs.insert(name.to_owned(), ClassAttr::Const(value));
        }

        let descriptor = TypeDescriptor {
            name: self.name,
            doc: self.doc,
            flags: self.flags,
            base: self.base.into(),
            parent: None,
            fields,
            methods: self.methods,
            properties: self.properties,
            class_attrs,
            member_docs,
        };

        Ok(ClassParts {
            descriptor,
            base: self.base,
            slots: self.slots,
            attrs,
            ctor: self.ctor,
            strong_ref_targets: self.strong_refs,
        })
    }
}
